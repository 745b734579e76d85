#[cfg(feature = "python-ext")]
use pyo3::prelude::*;

/// Settings of the type manager
pub mod config;
/// Crate-wide error type
pub mod error;
/// Tracing setup and helper macros
pub mod logging;
/// Base types, members, substitutions, sections and instances
pub mod types;

pub use error::{Result, TypesError};

/// A Python module implemented in Rust.
#[cfg(feature = "python-ext")]
#[pymodule]
fn glaurung_types(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<crate::config::TypeSystemConfig>()?;
    m.add_class::<crate::types::base_type::BaseTypeCategory>()?;
    m.add_class::<crate::types::section::SectionPermission>()?;

    Ok(())
}
