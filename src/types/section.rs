//! Sections: contiguous memory regions of a module that type instances live in.
//!
//! Sections are represented by their half-open address range `[start, end)`,
//! their permissions and optionally the raw bytes backing them.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::info;

#[cfg(feature = "python-ext")]
use pyo3::prelude::*;

use crate::error::{Result, TypesError};
use crate::log_error;
use crate::types::ids::SectionId;

/// Access permissions of a section (read=1, write=2, execute=4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "python-ext", pyclass)]
pub struct SectionPermission {
    pub bits: u8,
}

impl SectionPermission {
    pub const READ: Self = Self { bits: 1 };
    pub const WRITE: Self = Self { bits: 2 };
    pub const EXECUTE: Self = Self { bits: 4 };
    pub const READ_WRITE: Self = Self { bits: 3 };
    pub const READ_EXECUTE: Self = Self { bits: 5 };
    pub const READ_WRITE_EXECUTE: Self = Self { bits: 7 };

    pub fn new(read: bool, write: bool, execute: bool) -> Self {
        let mut bits = 0u8;
        if read {
            bits |= 1;
        }
        if write {
            bits |= 2;
        }
        if execute {
            bits |= 4;
        }
        Self { bits }
    }

    /// Parse stored permission bits; anything above 7 is rejected.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits > 7 {
            return Err(TypesError::invalid(format!("invalid permission bits {:#x}", bits)));
        }
        Ok(Self { bits })
    }

    pub fn has_read(&self) -> bool {
        (self.bits & 1) != 0
    }

    pub fn has_write(&self) -> bool {
        (self.bits & 2) != 0
    }

    pub fn has_execute(&self) -> bool {
        (self.bits & 4) != 0
    }
}

#[cfg(feature = "python-ext")]
#[pymethods]
impl SectionPermission {
    #[new]
    pub fn py_new(read: bool, write: bool, execute: bool) -> Self {
        Self::new(read, write, execute)
    }

    fn __str__(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for SectionPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::new();
        perms.push(if self.has_read() { 'r' } else { '-' });
        perms.push(if self.has_write() { 'w' } else { '-' });
        perms.push(if self.has_execute() { 'x' } else { '-' });
        write!(f, "{}", perms)
    }
}

/// Memory region of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub module_id: u32,
    /// First address inside the section
    pub start: u64,
    /// First address behind the section
    pub end: u64,
    pub permission: SectionPermission,
    /// Raw bytes, if the section is backed by file data
    pub data: Option<Vec<u8>>,
}

impl Section {
    pub fn new(
        id: SectionId,
        name: impl Into<String>,
        module_id: u32,
        start: u64,
        end: u64,
        permission: SectionPermission,
        data: Option<Vec<u8>>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypesError::invalid("section name can not be empty"));
        }
        if start > end {
            return Err(TypesError::invalid(format!(
                "section start {:#x} lies behind its end {:#x}",
                start, end
            )));
        }
        Ok(Self {
            id,
            name,
            module_id,
            start,
            end,
            permission,
            data,
        })
    }

    /// Size of the address range in bytes.
    pub fn virtual_size(&self) -> u64 {
        self.end - self.start
    }

    /// Number of raw bytes backing the section.
    pub fn raw_size(&self) -> usize {
        self.data.as_ref().map(|data| data.len()).unwrap_or(0)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section '{}' [{:#x}, {:#x}) {}",
            self.name, self.start, self.end, self.permission
        )
    }
}

/// Persistence of sections.
pub trait SectionBackend {
    fn load_sections(&self) -> Result<Vec<Section>>;
    fn create_section(
        &mut self,
        name: &str,
        start: u64,
        end: u64,
        permission: SectionPermission,
        data: Option<&[u8]>,
    ) -> Result<Section>;
    fn delete_section(&mut self, id: SectionId) -> Result<()>;
    fn rename_section(&mut self, id: SectionId, name: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct SectionStore {
    module_id: u32,
    next_id: u32,
    sections: BTreeMap<SectionId, Section>,
    fail_writes: bool,
}

/// Section backend keeping all rows in memory; clones share the rows.
#[derive(Debug, Clone, Default)]
pub struct InMemorySectionBackend {
    store: Rc<RefCell<SectionStore>>,
}

impl InMemorySectionBackend {
    pub fn new(module_id: u32) -> Self {
        let backend = Self::default();
        backend.store.borrow_mut().module_id = module_id;
        backend
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.store.borrow_mut().fail_writes = fail;
    }

    pub fn section_count(&self) -> usize {
        self.store.borrow().sections.len()
    }

    pub fn raw_section(&self, id: SectionId) -> Option<Section> {
        self.store.borrow().sections.get(&id).cloned()
    }
}

impl SectionBackend for InMemorySectionBackend {
    fn load_sections(&self) -> Result<Vec<Section>> {
        Ok(self.store.borrow().sections.values().cloned().collect())
    }

    fn create_section(
        &mut self,
        name: &str,
        start: u64,
        end: u64,
        permission: SectionPermission,
        data: Option<&[u8]>,
    ) -> Result<Section> {
        let mut store = self.store.borrow_mut();
        if store.fail_writes {
            return Err(TypesError::CouldntSave("create section".to_string()));
        }
        let id = SectionId(store.next_id + 1);
        let section = Section::new(
            id,
            name,
            store.module_id,
            start,
            end,
            permission,
            data.map(|bytes| bytes.to_vec()),
        )
        .map_err(|e| TypesError::CouldntSave(e.to_string()))?;
        store.next_id = id.0;
        store.sections.insert(id, section.clone());
        Ok(section)
    }

    fn delete_section(&mut self, id: SectionId) -> Result<()> {
        let mut store = self.store.borrow_mut();
        if store.fail_writes {
            return Err(TypesError::CouldntDelete("delete section".to_string()));
        }
        store
            .sections
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TypesError::CouldntDelete(format!("{} is not stored", id)))
    }

    fn rename_section(&mut self, id: SectionId, name: &str) -> Result<()> {
        let mut store = self.store.borrow_mut();
        if store.fail_writes {
            return Err(TypesError::CouldntSave("rename section".to_string()));
        }
        let section = store
            .sections
            .get_mut(&id)
            .ok_or_else(|| TypesError::CouldntSave(format!("{} is not stored", id)))?;
        section.name = name.to_string();
        Ok(())
    }
}

/// All sections of a module.
pub struct SectionContainer {
    backend: Box<dyn SectionBackend>,
    sections: BTreeMap<SectionId, Section>,
}

impl SectionContainer {
    pub fn new(backend: impl SectionBackend + 'static) -> Result<Self> {
        let sections = backend
            .load_sections()?
            .into_iter()
            .map(|section| (section.id, section))
            .collect();
        Ok(Self {
            backend: Box::new(backend),
            sections,
        })
    }

    pub fn create_section(
        &mut self,
        name: &str,
        start: u64,
        end: u64,
        permission: SectionPermission,
        data: Option<&[u8]>,
    ) -> Result<&Section> {
        if name.is_empty() {
            return Err(TypesError::invalid("section name can not be empty"));
        }
        if start > end {
            return Err(TypesError::invalid(format!(
                "section start {:#x} lies behind its end {:#x}",
                start, end
            )));
        }
        let section = self
            .backend
            .create_section(name, start, end, permission, data)
            .map_err(|e| log_error!(e, "create_section"))?;
        info!(section = %section.id, name, start, end, "created section");
        let id = section.id;
        Ok(self.sections.entry(id).or_insert(section))
    }

    /// Delete a section and hand it back.
    pub fn delete_section(&mut self, id: SectionId) -> Result<Section> {
        if !self.sections.contains_key(&id) {
            return Err(TypesError::SectionNotFound(id));
        }
        self.backend
            .delete_section(id)
            .map_err(|e| log_error!(e, "delete_section"))?;
        info!(section = %id, "deleted section");
        self.sections.remove(&id).ok_or(TypesError::SectionNotFound(id))
    }

    pub fn rename_section(&mut self, id: SectionId, name: &str) -> Result<&Section> {
        if name.is_empty() {
            return Err(TypesError::invalid("section name can not be empty"));
        }
        if !self.sections.contains_key(&id) {
            return Err(TypesError::SectionNotFound(id));
        }
        self.backend
            .rename_section(id, name)
            .map_err(|e| log_error!(e, "rename_section"))?;
        let section = self
            .sections
            .get_mut(&id)
            .ok_or(TypesError::SectionNotFound(id))?;
        section.name = name.to_string();
        Ok(section)
    }

    pub fn get_section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(&id)
    }

    /// All sections in id order.
    pub fn get_sections(&self) -> Vec<&Section> {
        self.sections.values().collect()
    }

    pub fn section_containing(&self, address: u64) -> Option<&Section> {
        self.sections.values().find(|section| section.contains(address))
    }
}
