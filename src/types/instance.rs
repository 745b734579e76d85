//! Type instances: base types placed at a fixed offset inside a section.
//!
//! The container keeps instances indexed by id and by address, tracks which
//! operands reference an instance, and forwards instance comments to the
//! backend. Instances reference their type and section by id only.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{info, warn};

use crate::error::{Result, TypesError};
use crate::log_error;
use crate::types::base_type::BaseType;
use crate::types::ids::{InstanceId, SectionId, TypeId};
use crate::types::listeners::{EventRecorder, ListenerId, ListenerRegistry, TypeEvent};
use crate::types::section::{Section, SectionContainer};
use crate::types::substitution::OperandLocation;

/// Address of an instance: the start of its section plus the offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeInstanceAddress {
    pub base_address: u64,
    pub offset: u64,
}

impl TypeInstanceAddress {
    pub fn new(base_address: u64, offset: u64) -> Self {
        Self {
            base_address,
            offset,
        }
    }

    pub fn virtual_address(&self) -> u64 {
        self.base_address.wrapping_add(self.offset)
    }
}

impl fmt::Display for TypeInstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.base_address, self.offset)
    }
}

/// A base type placed in a section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInstance {
    pub id: InstanceId,
    pub name: Option<String>,
    pub base_type: TypeId,
    pub section: SectionId,
    pub module_id: u32,
    address: TypeInstanceAddress,
}

impl TypeInstance {
    /// Fails if `offset` lies behind the end of `section`.
    pub fn new(
        id: InstanceId,
        name: Option<String>,
        base_type: TypeId,
        section: &Section,
        offset: u64,
    ) -> Result<Self> {
        if offset > section.virtual_size() {
            return Err(TypesError::invalid(format!(
                "offset {:#x} lies outside of {}",
                offset, section
            )));
        }
        Ok(Self {
            id,
            name,
            base_type,
            section: section.id,
            module_id: section.module_id,
            address: TypeInstanceAddress::new(section.start, offset),
        })
    }

    pub fn address(&self) -> TypeInstanceAddress {
        self.address
    }

    pub fn section_offset(&self) -> u64 {
        self.address.offset
    }
}

impl fmt::Display for TypeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} @ {}", name, self.address),
            None => write!(f, "{} @ {}", self.id, self.address),
        }
    }
}

/// An operand that refers to a type instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInstanceReference {
    pub instance: InstanceId,
    pub location: OperandLocation,
    /// Whether the operand it belongs to is currently loaded
    pub active: bool,
}

/// A comment attached to a type instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceComment {
    pub id: u32,
    pub text: String,
}

/// Stored form of a type instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTypeInstance {
    pub id: InstanceId,
    pub name: Option<String>,
    pub base_type: TypeId,
    pub section: SectionId,
    pub offset: u64,
}

impl RawTypeInstance {
    pub fn new(
        id: InstanceId,
        name: Option<String>,
        base_type: TypeId,
        section: SectionId,
        offset: u64,
    ) -> Result<Self> {
        if id.0 == 0 {
            return Err(TypesError::invalid("instance id must be positive"));
        }
        Ok(Self {
            id,
            name,
            base_type,
            section,
            offset,
        })
    }

    /// Resolve the section and build the instance.
    pub fn to_instance(&self, sections: &SectionContainer) -> Result<TypeInstance> {
        let section = sections
            .get_section(self.section)
            .ok_or(TypesError::SectionNotFound(self.section))?;
        TypeInstance::new(self.id, self.name.clone(), self.base_type, section, self.offset)
    }
}

/// Stored form of a type instance reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTypeInstanceReference {
    pub instance: InstanceId,
    pub location: OperandLocation,
}

impl RawTypeInstanceReference {
    pub fn new(instance: InstanceId, location: OperandLocation) -> Self {
        Self { instance, location }
    }

    fn to_reference(&self) -> TypeInstanceReference {
        TypeInstanceReference {
            instance: self.instance,
            location: self.location,
            active: false,
        }
    }
}

/// Receives changes to type instances and their references.
pub trait TypeInstanceContainerListener {
    fn added_type_instance(&mut self, _instance: &TypeInstance) {}
    fn removed_type_instance(&mut self, _instance: &TypeInstance) {}
    fn changed_type_instance(&mut self, _instance: &TypeInstance) {}
    fn added_type_instance_reference(&mut self, _reference: &TypeInstanceReference) {}
    fn removed_type_instance_reference(&mut self, _reference: &TypeInstanceReference) {}
    fn changed_type_instance_reference(&mut self, _reference: &TypeInstanceReference) {}
}

impl TypeInstanceContainerListener for EventRecorder {
    fn added_type_instance(&mut self, instance: &TypeInstance) {
        self.record(TypeEvent::InstanceAdded(instance.id));
    }

    fn removed_type_instance(&mut self, instance: &TypeInstance) {
        self.record(TypeEvent::InstanceRemoved(instance.id));
    }

    fn changed_type_instance(&mut self, instance: &TypeInstance) {
        self.record(TypeEvent::InstanceChanged(instance.id));
    }

    fn added_type_instance_reference(&mut self, reference: &TypeInstanceReference) {
        self.record(TypeEvent::ReferenceAdded(reference.location));
    }

    fn removed_type_instance_reference(&mut self, reference: &TypeInstanceReference) {
        self.record(TypeEvent::ReferenceRemoved(reference.location));
    }

    fn changed_type_instance_reference(&mut self, reference: &TypeInstanceReference) {
        self.record(TypeEvent::ReferenceChanged(reference.location));
    }
}

/// Persistence of type instances, their references and comments.
pub trait TypeInstanceBackend {
    fn load_type_instances(&self) -> Result<Vec<RawTypeInstance>>;
    fn load_type_instance(&self, id: InstanceId) -> Result<RawTypeInstance>;
    fn load_type_instance_references(&self) -> Result<Vec<RawTypeInstanceReference>>;
    fn load_type_instance_reference(
        &self,
        instance: InstanceId,
        location: OperandLocation,
    ) -> Result<RawTypeInstanceReference>;

    fn create_type_instance(
        &mut self,
        name: &str,
        base_type: TypeId,
        section: SectionId,
        offset: u64,
    ) -> Result<RawTypeInstance>;
    fn create_type_instance_reference(
        &mut self,
        instance: InstanceId,
        location: OperandLocation,
    ) -> Result<RawTypeInstanceReference>;
    fn set_instance_name(&mut self, id: InstanceId, name: &str) -> Result<()>;
    /// Also deletes the references to the instance.
    fn delete_type_instance(&mut self, id: InstanceId) -> Result<()>;
    fn delete_type_instance_reference(&mut self, location: OperandLocation) -> Result<()>;

    /// Returns every comment of the instance after appending.
    fn append_comment(&mut self, instance: InstanceId, text: &str) -> Result<Vec<InstanceComment>>;
    fn edit_comment(&mut self, instance: InstanceId, comment: u32, text: &str) -> Result<InstanceComment>;
    fn delete_comment(&mut self, instance: InstanceId, comment: u32) -> Result<()>;
    fn load_comments(&self, instance: InstanceId) -> Result<Vec<InstanceComment>>;
}

#[derive(Debug, Default)]
struct InstanceStore {
    next_instance_id: u32,
    next_comment_id: u32,
    instances: BTreeMap<InstanceId, RawTypeInstance>,
    references: BTreeMap<OperandLocation, RawTypeInstanceReference>,
    comments: BTreeMap<InstanceId, Vec<InstanceComment>>,
    fail_writes: bool,
}

impl InstanceStore {
    fn check_write(&self, operation: &str) -> Result<()> {
        if self.fail_writes {
            return Err(TypesError::CouldntSave(operation.to_string()));
        }
        Ok(())
    }
}

/// Instance backend keeping all rows in memory; clones share the rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInstanceBackend {
    store: Rc<RefCell<InstanceStore>>,
}

impl InMemoryInstanceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.store.borrow_mut().fail_writes = fail;
    }

    pub fn raw_instance(&self, id: InstanceId) -> Option<RawTypeInstance> {
        self.store.borrow().instances.get(&id).cloned()
    }

    pub fn reference_count(&self) -> usize {
        self.store.borrow().references.len()
    }

    /// Write an instance row directly, bypassing any container.
    pub fn put_raw_instance(&self, row: RawTypeInstance) {
        let mut store = self.store.borrow_mut();
        store.next_instance_id = store.next_instance_id.max(row.id.0);
        store.instances.insert(row.id, row);
    }

    /// Write a reference row directly, bypassing any container.
    pub fn put_raw_reference(&self, row: RawTypeInstanceReference) {
        self.store.borrow_mut().references.insert(row.location, row);
    }
}

impl TypeInstanceBackend for InMemoryInstanceBackend {
    fn load_type_instances(&self) -> Result<Vec<RawTypeInstance>> {
        Ok(self.store.borrow().instances.values().cloned().collect())
    }

    fn load_type_instance(&self, id: InstanceId) -> Result<RawTypeInstance> {
        self.store
            .borrow()
            .instances
            .get(&id)
            .cloned()
            .ok_or_else(|| TypesError::CouldntLoad(format!("{} is not stored", id)))
    }

    fn load_type_instance_references(&self) -> Result<Vec<RawTypeInstanceReference>> {
        Ok(self.store.borrow().references.values().cloned().collect())
    }

    fn load_type_instance_reference(
        &self,
        instance: InstanceId,
        location: OperandLocation,
    ) -> Result<RawTypeInstanceReference> {
        self.store
            .borrow()
            .references
            .get(&location)
            .filter(|row| row.instance == instance)
            .cloned()
            .ok_or_else(|| TypesError::CouldntLoad(format!("no reference at {}", location)))
    }

    fn create_type_instance(
        &mut self,
        name: &str,
        base_type: TypeId,
        section: SectionId,
        offset: u64,
    ) -> Result<RawTypeInstance> {
        let mut store = self.store.borrow_mut();
        store.check_write("create type instance")?;
        let id = InstanceId(store.next_instance_id + 1);
        let row = RawTypeInstance::new(id, Some(name.to_string()), base_type, section, offset)?;
        store.next_instance_id = id.0;
        store.instances.insert(id, row.clone());
        Ok(row)
    }

    fn create_type_instance_reference(
        &mut self,
        instance: InstanceId,
        location: OperandLocation,
    ) -> Result<RawTypeInstanceReference> {
        let mut store = self.store.borrow_mut();
        store.check_write("create type instance reference")?;
        let row = RawTypeInstanceReference::new(instance, location);
        store.references.insert(location, row.clone());
        Ok(row)
    }

    fn set_instance_name(&mut self, id: InstanceId, name: &str) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("set instance name")?;
        let row = store
            .instances
            .get_mut(&id)
            .ok_or_else(|| TypesError::CouldntSave(format!("{} is not stored", id)))?;
        row.name = Some(name.to_string());
        Ok(())
    }

    fn delete_type_instance(&mut self, id: InstanceId) -> Result<()> {
        let mut store = self.store.borrow_mut();
        if store.fail_writes {
            return Err(TypesError::CouldntDelete("delete type instance".to_string()));
        }
        store
            .instances
            .remove(&id)
            .ok_or_else(|| TypesError::CouldntDelete(format!("{} is not stored", id)))?;
        store.references.retain(|_, row| row.instance != id);
        store.comments.remove(&id);
        Ok(())
    }

    fn delete_type_instance_reference(&mut self, location: OperandLocation) -> Result<()> {
        let mut store = self.store.borrow_mut();
        if store.fail_writes {
            return Err(TypesError::CouldntDelete("delete type instance reference".to_string()));
        }
        store
            .references
            .remove(&location)
            .map(|_| ())
            .ok_or_else(|| TypesError::CouldntDelete(format!("no reference at {}", location)))
    }

    fn append_comment(&mut self, instance: InstanceId, text: &str) -> Result<Vec<InstanceComment>> {
        let mut store = self.store.borrow_mut();
        store.check_write("append comment")?;
        let id = store.next_comment_id + 1;
        store.next_comment_id = id;
        let comments = store.comments.entry(instance).or_default();
        comments.push(InstanceComment {
            id,
            text: text.to_string(),
        });
        Ok(comments.clone())
    }

    fn edit_comment(&mut self, instance: InstanceId, comment: u32, text: &str) -> Result<InstanceComment> {
        let mut store = self.store.borrow_mut();
        store.check_write("edit comment")?;
        let stored = store
            .comments
            .get_mut(&instance)
            .and_then(|comments| comments.iter_mut().find(|c| c.id == comment))
            .ok_or_else(|| TypesError::CouldntSave(format!("unknown comment {}", comment)))?;
        stored.text = text.to_string();
        Ok(stored.clone())
    }

    fn delete_comment(&mut self, instance: InstanceId, comment: u32) -> Result<()> {
        let mut store = self.store.borrow_mut();
        if store.fail_writes {
            return Err(TypesError::CouldntDelete("delete comment".to_string()));
        }
        let comments = store
            .comments
            .get_mut(&instance)
            .ok_or_else(|| TypesError::CouldntDelete(format!("{} has no comments", instance)))?;
        let before = comments.len();
        comments.retain(|c| c.id != comment);
        if comments.len() == before {
            return Err(TypesError::CouldntDelete(format!("unknown comment {}", comment)));
        }
        Ok(())
    }

    fn load_comments(&self, instance: InstanceId) -> Result<Vec<InstanceComment>> {
        Ok(self
            .store
            .borrow()
            .comments
            .get(&instance)
            .cloned()
            .unwrap_or_default())
    }
}

/// All type instances of a module.
pub struct TypeInstanceContainer {
    backend: Box<dyn TypeInstanceBackend>,
    instances: BTreeMap<InstanceId, TypeInstance>,
    by_address: BTreeMap<TypeInstanceAddress, InstanceId>,
    references: BTreeMap<InstanceId, Vec<TypeInstanceReference>>,
    listeners: ListenerRegistry<dyn TypeInstanceContainerListener>,
}

impl TypeInstanceContainer {
    /// Create an empty container; call [`Self::initialize`] to load the stored instances.
    pub fn new(backend: impl TypeInstanceBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            instances: BTreeMap::new(),
            by_address: BTreeMap::new(),
            references: BTreeMap::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn TypeInstanceContainerListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Load every stored instance and reference. No listeners are notified.
    pub fn initialize(&mut self, sections: &SectionContainer) -> Result<()> {
        for raw in self.backend.load_type_instances()? {
            let instance = raw.to_instance(sections)?;
            self.insert_instance(instance);
        }
        for raw in self.backend.load_type_instance_references()? {
            self.insert_reference(raw.to_reference())?;
        }
        info!(instances = self.instances.len(), "type instances loaded");
        Ok(())
    }

    /// Place `base_type` at `offset` inside `section`.
    ///
    /// Only one instance may live at a given address.
    pub fn create_instance(
        &mut self,
        name: &str,
        comment: Option<&str>,
        base_type: &BaseType,
        section: &Section,
        offset: u64,
    ) -> Result<&TypeInstance> {
        if name.is_empty() {
            return Err(TypesError::invalid("instance name can not be empty"));
        }
        if comment.map(str::is_empty).unwrap_or(false) {
            return Err(TypesError::invalid("instance comment can not be empty"));
        }
        if offset > section.virtual_size() {
            return Err(TypesError::invalid(format!(
                "offset {:#x} lies outside of {}",
                offset, section
            )));
        }
        let address = TypeInstanceAddress::new(section.start, offset);
        if self.by_address.contains_key(&address) {
            warn!(%address, "an instance already exists at this address");
            return Err(TypesError::invalid(format!("an instance already exists at {}", address)));
        }
        let raw = self
            .backend
            .create_type_instance(name, base_type.id(), section.id, offset)
            .map_err(|e| log_error!(e, "create_type_instance"))?;
        let instance = TypeInstance::new(raw.id, raw.name, base_type.id(), section, offset)?;
        let id = instance.id;
        if let Some(text) = comment {
            self.backend.append_comment(id, text)?;
        }
        info!(instance = %id, name, %address, "created type instance");
        self.insert_instance(instance);
        let instance = self.instances.get(&id).ok_or(TypesError::InstanceNotFound(id))?;
        self.listeners
            .notify(|listener| listener.added_type_instance(instance));
        Ok(instance)
    }

    /// Record that the operand at `location` refers to `instance`.
    pub fn create_reference(
        &mut self,
        location: OperandLocation,
        instance: InstanceId,
    ) -> Result<&TypeInstanceReference> {
        if !self.instances.contains_key(&instance) {
            return Err(TypesError::InstanceNotFound(instance));
        }
        if self.find_reference(location).is_some() {
            return Err(TypesError::invalid(format!("{} already references an instance", location)));
        }
        let raw = self
            .backend
            .create_type_instance_reference(instance, location)
            .map_err(|e| log_error!(e, "create_type_instance_reference"))?;
        let mut reference = raw.to_reference();
        reference.active = true;
        self.insert_reference(reference)?;
        let reference = self
            .references
            .get(&instance)
            .and_then(|references| references.iter().find(|r| r.location == location))
            .ok_or_else(|| TypesError::invalid(format!("no reference at {}", location)))?;
        self.listeners
            .notify(|listener| listener.added_type_instance_reference(reference));
        Ok(reference)
    }

    /// Delete an instance together with all references to it.
    pub fn delete_instance(&mut self, id: InstanceId) -> Result<()> {
        if !self.instances.contains_key(&id) {
            return Err(TypesError::InstanceNotFound(id));
        }
        self.backend
            .delete_type_instance(id)
            .map_err(|e| log_error!(e, "delete_type_instance"))?;
        info!(instance = %id, "deleted type instance");
        self.remove_type_instance(id)
    }

    /// Drop an instance another client deleted; the backend is not touched.
    pub fn remove_type_instance(&mut self, id: InstanceId) -> Result<()> {
        let instance = self.instances.remove(&id).ok_or(TypesError::InstanceNotFound(id))?;
        self.by_address.remove(&instance.address());
        for reference in self.references.remove(&id).unwrap_or_default() {
            self.listeners
                .notify(|listener| listener.removed_type_instance_reference(&reference));
        }
        self.listeners
            .notify(|listener| listener.removed_type_instance(&instance));
        Ok(())
    }

    pub fn delete_reference(&mut self, location: OperandLocation) -> Result<()> {
        if self.find_reference(location).is_none() {
            return Err(TypesError::invalid(format!("no reference at {}", location)));
        }
        self.backend
            .delete_type_instance_reference(location)
            .map_err(|e| log_error!(e, "delete_type_instance_reference"))?;
        self.remove_reference(location)
    }

    /// Drop a reference another client deleted; the backend is not touched.
    pub fn remove_reference(&mut self, location: OperandLocation) -> Result<()> {
        let mut removed = None;
        for references in self.references.values_mut() {
            if let Some(index) = references.iter().position(|r| r.location == location) {
                removed = Some(references.remove(index));
                break;
            }
        }
        let mut reference =
            removed.ok_or_else(|| TypesError::invalid(format!("no reference at {}", location)))?;
        reference.active = false;
        self.listeners
            .notify(|listener| listener.removed_type_instance_reference(&reference));
        Ok(())
    }

    pub fn set_instance_name(&mut self, id: InstanceId, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TypesError::invalid("instance name can not be empty"));
        }
        if !self.instances.contains_key(&id) {
            return Err(TypesError::InstanceNotFound(id));
        }
        self.backend
            .set_instance_name(id, name)
            .map_err(|e| log_error!(e, "set_instance_name"))?;
        let instance = self.instances.get_mut(&id).ok_or(TypesError::InstanceNotFound(id))?;
        instance.name = Some(name.to_string());
        let instance = &*instance;
        self.listeners
            .notify(|listener| listener.changed_type_instance(instance));
        Ok(())
    }

    /// Instances inside `section`, ordered by offset.
    pub fn get_type_instances(&self, section: &Section) -> Vec<&TypeInstance> {
        let from = TypeInstanceAddress::new(section.start, 0);
        let to = TypeInstanceAddress::new(section.start, section.virtual_size());
        self.by_address
            .range(from..=to)
            .filter_map(|(_, id)| self.instances.get(id))
            .collect()
    }

    /// All instances in id order.
    pub fn get_all_type_instances(&self) -> Vec<&TypeInstance> {
        self.instances.values().collect()
    }

    pub fn get_type_instance(&self, address: TypeInstanceAddress) -> Option<&TypeInstance> {
        self.by_address
            .get(&address)
            .and_then(|id| self.instances.get(id))
    }

    pub fn get_type_instance_by_id(&self, id: InstanceId) -> Option<&TypeInstance> {
        self.instances.get(&id)
    }

    pub fn get_references(&self, id: InstanceId) -> &[TypeInstanceReference] {
        self.references.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_reference_count(&self, id: InstanceId) -> usize {
        self.get_references(id).len()
    }

    pub fn find_reference(&self, location: OperandLocation) -> Option<&TypeInstanceReference> {
        self.references
            .values()
            .flatten()
            .find(|reference| reference.location == location)
    }

    /// Load an instance another client created, or refresh it if already known.
    pub fn load_instance(&mut self, id: InstanceId, sections: &SectionContainer) -> Result<&TypeInstance> {
        if self.instances.contains_key(&id) {
            return self.reload_instance(id, sections);
        }
        let instance = self.backend.load_type_instance(id)?.to_instance(sections)?;
        self.insert_instance(instance);
        let instance = self.instances.get(&id).ok_or(TypesError::InstanceNotFound(id))?;
        self.listeners
            .notify(|listener| listener.added_type_instance(instance));
        Ok(instance)
    }

    /// Pick up a renamed instance, or load it if unknown so far.
    pub fn reload_instance(&mut self, id: InstanceId, sections: &SectionContainer) -> Result<&TypeInstance> {
        if !self.instances.contains_key(&id) {
            return self.load_instance(id, sections);
        }
        let raw = self.backend.load_type_instance(id)?;
        let instance = self.instances.get_mut(&id).ok_or(TypesError::InstanceNotFound(id))?;
        instance.name = raw.name;
        let instance = &*instance;
        self.listeners
            .notify(|listener| listener.changed_type_instance(instance));
        Ok(instance)
    }

    /// Load a reference another client created. No listeners are notified.
    pub fn load_instance_reference(
        &mut self,
        instance: InstanceId,
        location: OperandLocation,
    ) -> Result<&TypeInstanceReference> {
        let raw = self.backend.load_type_instance_reference(instance, location)?;
        self.insert_reference(raw.to_reference())?;
        self.find_reference(location)
            .ok_or_else(|| TypesError::invalid(format!("no reference at {}", location)))
    }

    /// Mark the reference inactive once its operand is unloaded.
    pub fn deactivate_type_instance_reference(&mut self, location: OperandLocation) -> Result<()> {
        self.set_reference_active(location, false)
    }

    /// Mark the reference active once its operand is loaded.
    ///
    /// Returns false if no reference exists at `location`.
    pub fn initialize_type_instance_reference(&mut self, location: OperandLocation) -> Result<bool> {
        if self.find_reference(location).is_none() {
            return Ok(false);
        }
        self.set_reference_active(location, true)?;
        Ok(true)
    }

    pub fn append_comment(&mut self, id: InstanceId, text: &str) -> Result<Vec<InstanceComment>> {
        if text.is_empty() {
            return Err(TypesError::invalid("comment can not be empty"));
        }
        let instance = self.instances.get(&id).ok_or(TypesError::InstanceNotFound(id))?;
        let comments = self
            .backend
            .append_comment(id, text)
            .map_err(|e| log_error!(e, "append_comment"))?;
        self.listeners
            .notify(|listener| listener.changed_type_instance(instance));
        Ok(comments)
    }

    pub fn edit_comment(&mut self, id: InstanceId, comment: u32, text: &str) -> Result<InstanceComment> {
        if text.is_empty() {
            return Err(TypesError::invalid("comment can not be empty"));
        }
        let instance = self.instances.get(&id).ok_or(TypesError::InstanceNotFound(id))?;
        let edited = self
            .backend
            .edit_comment(id, comment, text)
            .map_err(|e| log_error!(e, "edit_comment"))?;
        self.listeners
            .notify(|listener| listener.changed_type_instance(instance));
        Ok(edited)
    }

    pub fn delete_comment(&mut self, id: InstanceId, comment: u32) -> Result<()> {
        let instance = self.instances.get(&id).ok_or(TypesError::InstanceNotFound(id))?;
        self.backend
            .delete_comment(id, comment)
            .map_err(|e| log_error!(e, "delete_comment"))?;
        self.listeners
            .notify(|listener| listener.changed_type_instance(instance));
        Ok(())
    }

    pub fn get_comments(&self, id: InstanceId) -> Result<Vec<InstanceComment>> {
        if !self.instances.contains_key(&id) {
            return Err(TypesError::InstanceNotFound(id));
        }
        self.backend.load_comments(id)
    }

    fn insert_instance(&mut self, instance: TypeInstance) {
        self.by_address.insert(instance.address(), instance.id);
        self.instances.insert(instance.id, instance);
    }

    fn insert_reference(&mut self, reference: TypeInstanceReference) -> Result<()> {
        if !self.instances.contains_key(&reference.instance) {
            return Err(TypesError::InstanceNotFound(reference.instance));
        }
        let references = self.references.entry(reference.instance).or_default();
        references.retain(|existing| existing.location != reference.location);
        references.push(reference);
        Ok(())
    }

    fn set_reference_active(&mut self, location: OperandLocation, active: bool) -> Result<()> {
        let reference = self
            .references
            .values_mut()
            .flatten()
            .find(|reference| reference.location == location)
            .ok_or_else(|| TypesError::invalid(format!("no reference at {}", location)))?;
        reference.active = active;
        let reference = &*reference;
        self.listeners
            .notify(|listener| listener.changed_type_instance_reference(reference));
        Ok(())
    }
}
