//! Configuration for the type manager.
//!
//! Holds the defaults the manager uses when it has to invent a property
//! itself, such as the size of a freshly created pointer type.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(feature = "python-ext")]
use pyo3::prelude::*;

use crate::error::{Result, TypesError};

/// Settings consulted by [`crate::types::manager::TypeManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "python-ext", pyclass)]
#[serde(default)]
pub struct TypeSystemConfig {
    /// Size in bits of pointer types created by the manager.
    pub default_pointer_size: i64,
    /// Name of the synthetic element member of array types.
    pub array_member_name: String,
}

impl Default for TypeSystemConfig {
    fn default() -> Self {
        Self {
            default_pointer_size: 32,
            array_member_name: "array_elements".to_string(),
        }
    }
}

#[cfg(feature = "python-ext")]
#[pymethods]
impl TypeSystemConfig {
    #[new]
    pub fn py_new() -> Self {
        Self::default()
    }

    #[getter]
    pub fn get_default_pointer_size(&self) -> i64 {
        self.default_pointer_size
    }

    #[setter]
    pub fn set_default_pointer_size(&mut self, v: i64) {
        self.default_pointer_size = v;
    }

    #[getter]
    pub fn get_array_member_name(&self) -> String {
        self.array_member_name.clone()
    }

    #[setter]
    pub fn set_array_member_name(&mut self, v: String) {
        self.array_member_name = v;
    }
}

impl TypeSystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_pointer_size <= 0 {
            return Err(TypesError::invalid("default pointer size must be positive"));
        }
        if self.array_member_name.is_empty() {
            return Err(TypesError::invalid("array member name can not be empty"));
        }
        Ok(())
    }
}
