//! Persistence boundary of the type manager.
//!
//! The manager never touches storage directly. It talks to a
//! [`TypeManagerBackend`] in terms of flat raw rows, and only applies a change
//! to its in-memory model after the backend accepted it.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::error::{Result, TypesError};
use crate::types::base_type::{BaseType, BaseTypeCategory};
use crate::types::ids::{MemberId, TypeId};
use crate::types::member::{MemberPosition, TypeMember};
use crate::types::substitution::{OperandLocation, TypeSubstitution};

/// Stored form of a base type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBaseType {
    pub id: TypeId,
    pub name: String,
    pub bit_size: i64,
    /// Type this type points to, for pointer types
    pub pointer_id: Option<TypeId>,
    pub signed: bool,
    pub category: BaseTypeCategory,
}

impl RawBaseType {
    pub fn new(
        id: TypeId,
        name: impl Into<String>,
        bit_size: i64,
        pointer_id: Option<TypeId>,
        signed: bool,
        category: BaseTypeCategory,
    ) -> Result<Self> {
        let name = name.into();
        if id.0 == 0 {
            return Err(TypesError::invalid("raw type id must be positive"));
        }
        if name.is_empty() {
            return Err(TypesError::invalid("raw type name can not be empty"));
        }
        if bit_size < 0 {
            return Err(TypesError::invalid("raw type size can not be negative"));
        }
        Ok(Self {
            id,
            name,
            bit_size,
            pointer_id,
            signed,
            category,
        })
    }

    /// Build the in-memory type; pointer links are established separately.
    pub fn to_base_type(&self) -> Result<BaseType> {
        BaseType::new(self.id, self.name.clone(), self.bit_size, self.signed, self.category)
    }
}

/// Stored form of a type member. Exactly one positional column is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTypeMember {
    pub id: MemberId,
    pub name: String,
    pub base_type: TypeId,
    pub parent: TypeId,
    pub offset: Option<i64>,
    pub argument_index: Option<i64>,
    pub number_of_elements: Option<i64>,
}

impl RawTypeMember {
    pub fn new(
        id: MemberId,
        name: impl Into<String>,
        base_type: TypeId,
        parent: TypeId,
        offset: Option<i64>,
        argument_index: Option<i64>,
        number_of_elements: Option<i64>,
    ) -> Result<Self> {
        for (column, value) in [
            ("offset", offset),
            ("argument index", argument_index),
            ("number of elements", number_of_elements),
        ] {
            if value.is_some_and(|value| value < 0) {
                return Err(TypesError::invalid(format!("raw member {} can not be negative", column)));
            }
        }
        Ok(Self {
            id,
            name: name.into(),
            base_type,
            parent,
            offset,
            argument_index,
            number_of_elements,
        })
    }

    pub fn from_member(member: &TypeMember) -> Self {
        Self {
            id: member.id,
            name: member.name.clone(),
            base_type: member.base_type,
            parent: member.parent,
            offset: member.bit_offset(),
            argument_index: member.argument_index(),
            number_of_elements: member.number_of_elements(),
        }
    }

    pub fn position(&self) -> Result<MemberPosition> {
        match (self.offset, self.number_of_elements, self.argument_index) {
            (Some(offset), None, None) => Ok(MemberPosition::Offset(offset)),
            (None, Some(count), None) => Ok(MemberPosition::Elements(count)),
            (None, None, Some(index)) => Ok(MemberPosition::ArgumentIndex(index)),
            _ => Err(TypesError::CouldntLoad(format!(
                "raw member {} must have exactly one position column",
                self.id
            ))),
        }
    }

    pub fn to_member(&self) -> Result<TypeMember> {
        let position = self.position()?;
        let value = match position {
            MemberPosition::Offset(v)
            | MemberPosition::Elements(v)
            | MemberPosition::ArgumentIndex(v) => v,
        };
        match position {
            MemberPosition::Offset(_) => {
                TypeMember::structure(self.id, self.parent, self.base_type, self.name.clone(), value)
            }
            MemberPosition::Elements(_) => {
                TypeMember::array(self.id, self.parent, self.base_type, self.name.clone(), value)
            }
            MemberPosition::ArgumentIndex(_) => TypeMember::function_prototype(
                self.id,
                self.parent,
                self.base_type,
                self.name.clone(),
                value,
            ),
        }
    }
}

/// Stored form of a type substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTypeSubstitution {
    pub location: OperandLocation,
    pub base_type: TypeId,
    pub member_path: Vec<MemberId>,
    pub offset: i64,
}

impl RawTypeSubstitution {
    pub fn new(
        location: OperandLocation,
        base_type: TypeId,
        member_path: Vec<MemberId>,
        offset: i64,
    ) -> Result<Self> {
        if offset < 0 {
            return Err(TypesError::invalid("raw substitution offset can not be negative"));
        }
        Ok(Self {
            location,
            base_type,
            member_path,
            offset,
        })
    }

    pub fn to_substitution(&self) -> Result<TypeSubstitution> {
        TypeSubstitution::new(self.location, self.base_type, self.member_path.clone(), self.offset)
    }
}

/// Everything a type manager needs to rebuild its model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeSystemSnapshot {
    pub types: Vec<RawBaseType>,
    pub members: Vec<RawTypeMember>,
    #[serde(default)]
    pub substitutions: Vec<RawTypeSubstitution>,
}

impl TypeSystemSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Storage operations used by the type manager.
///
/// Create operations hand out the new id in the returned row. Every error
/// aborts the manager operation before its in-memory model changes.
pub trait TypeManagerBackend {
    fn load_raw_base_types(&self) -> Result<Vec<RawBaseType>>;
    fn load_raw_type_members(&self) -> Result<Vec<RawTypeMember>>;
    fn load_raw_type_substitutions(&self) -> Result<Vec<RawTypeSubstitution>>;
    fn load_raw_base_type(&self, id: TypeId) -> Result<RawBaseType>;
    fn load_raw_type_member(&self, id: MemberId) -> Result<RawTypeMember>;

    fn create_type(
        &mut self,
        name: &str,
        bit_size: i64,
        signed: bool,
        pointer_id: Option<TypeId>,
        category: BaseTypeCategory,
    ) -> Result<RawBaseType>;
    fn create_structure_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<RawTypeMember>;
    fn create_union_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<RawTypeMember>;
    fn create_array_member(
        &mut self,
        parent: TypeId,
        element_type: TypeId,
        name: &str,
        number_of_elements: i64,
    ) -> Result<RawTypeMember>;
    fn create_function_prototype_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        argument_index: i64,
    ) -> Result<RawTypeMember>;

    fn update_type(&mut self, id: TypeId, name: &str, bit_size: i64, signed: bool) -> Result<()>;
    fn update_structure_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<()>;
    fn update_union_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<()>;
    fn update_function_prototype_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        argument_index: i64,
    ) -> Result<()>;
    fn update_array_member(
        &mut self,
        member: MemberId,
        element_type: TypeId,
        number_of_elements: i64,
    ) -> Result<()>;
    /// Shift `members` by `delta` and `implicitly_moved` by `implicit_delta`.
    fn update_member_offsets(
        &mut self,
        members: &[MemberId],
        delta: i64,
        implicitly_moved: &[MemberId],
        implicit_delta: i64,
    ) -> Result<()>;

    fn delete_type(&mut self, id: TypeId) -> Result<()>;
    fn delete_member(&mut self, id: MemberId) -> Result<()>;

    fn create_type_substitution(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: &[MemberId],
        offset: i64,
    ) -> Result<RawTypeSubstitution>;
    fn update_substitution(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: &[MemberId],
        offset: i64,
    ) -> Result<()>;
    fn delete_type_substitution(&mut self, location: OperandLocation) -> Result<()>;
}

#[derive(Debug, Default)]
struct Store {
    next_type_id: u32,
    next_member_id: u32,
    types: BTreeMap<TypeId, RawBaseType>,
    members: BTreeMap<MemberId, RawTypeMember>,
    substitutions: BTreeMap<OperandLocation, RawTypeSubstitution>,
    fail_writes: bool,
    fail_loads: bool,
    failing_operations: BTreeSet<String>,
}

impl Store {
    fn rejects(&self, operation: &str) -> bool {
        self.fail_writes || self.failing_operations.contains(operation)
    }

    fn check_write(&self, operation: &str) -> Result<()> {
        if self.rejects(operation) {
            return Err(TypesError::CouldntSave(format!("{} rejected by backend", operation)));
        }
        Ok(())
    }

    fn check_delete(&self, operation: &str) -> Result<()> {
        if self.rejects(operation) {
            return Err(TypesError::CouldntDelete(format!("{} rejected by backend", operation)));
        }
        Ok(())
    }

    fn check_load(&self) -> Result<()> {
        if self.fail_loads {
            return Err(TypesError::CouldntLoad("backend is unavailable".to_string()));
        }
        Ok(())
    }

    fn member_mut(&mut self, id: MemberId) -> Result<&mut RawTypeMember> {
        self.members
            .get_mut(&id)
            .ok_or_else(|| TypesError::CouldntSave(format!("{} is not stored", id)))
    }

    fn insert_member(&mut self, mut row: RawTypeMember) -> Result<RawTypeMember> {
        if !self.types.contains_key(&row.parent) || !self.types.contains_key(&row.base_type) {
            return Err(TypesError::CouldntSave(format!(
                "member '{}' references a type that is not stored",
                row.name
            )));
        }
        self.next_member_id += 1;
        row.id = MemberId(self.next_member_id);
        self.members.insert(row.id, row.clone());
        Ok(row)
    }
}

/// Backend keeping all rows in memory.
///
/// Clones share the same store, which lets tests inspect the stored rows or
/// simulate a second client while a manager owns another clone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTypeBackend {
    store: Rc<RefCell<Store>>,
}

impl InMemoryTypeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a backend with previously exported rows.
    pub fn from_snapshot(snapshot: &TypeSystemSnapshot) -> Self {
        let backend = Self::new();
        {
            let mut store = backend.store.borrow_mut();
            for row in &snapshot.types {
                store.next_type_id = store.next_type_id.max(row.id.0);
                store.types.insert(row.id, row.clone());
            }
            for row in &snapshot.members {
                store.next_member_id = store.next_member_id.max(row.id.0);
                store.members.insert(row.id, row.clone());
            }
            for row in &snapshot.substitutions {
                store.substitutions.insert(row.location, row.clone());
            }
        }
        backend
    }

    /// Make every following create, update and delete fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.store.borrow_mut().fail_writes = fail;
    }

    /// Make only the named write fail, e.g. `"create structure member"`.
    pub fn set_fail_operation(&self, operation: &str, fail: bool) {
        let mut store = self.store.borrow_mut();
        if fail {
            store.failing_operations.insert(operation.to_string());
        } else {
            store.failing_operations.remove(operation);
        }
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.store.borrow_mut().fail_loads = fail;
    }

    pub fn raw_type(&self, id: TypeId) -> Option<RawBaseType> {
        self.store.borrow().types.get(&id).cloned()
    }

    pub fn raw_member(&self, id: MemberId) -> Option<RawTypeMember> {
        self.store.borrow().members.get(&id).cloned()
    }

    pub fn raw_substitution(&self, location: OperandLocation) -> Option<RawTypeSubstitution> {
        self.store.borrow().substitutions.get(&location).cloned()
    }

    pub fn type_count(&self) -> usize {
        self.store.borrow().types.len()
    }

    pub fn member_count(&self) -> usize {
        self.store.borrow().members.len()
    }

    /// Write a type row directly, bypassing any manager.
    pub fn put_raw_type(&self, row: RawBaseType) {
        let mut store = self.store.borrow_mut();
        store.next_type_id = store.next_type_id.max(row.id.0);
        store.types.insert(row.id, row);
    }

    /// Write a member row directly, bypassing any manager.
    pub fn put_raw_member(&self, row: RawTypeMember) {
        let mut store = self.store.borrow_mut();
        store.next_member_id = store.next_member_id.max(row.id.0);
        store.members.insert(row.id, row);
    }

    pub fn snapshot(&self) -> TypeSystemSnapshot {
        let store = self.store.borrow();
        TypeSystemSnapshot {
            types: store.types.values().cloned().collect(),
            members: store.members.values().cloned().collect(),
            substitutions: store.substitutions.values().cloned().collect(),
        }
    }
}

impl TypeManagerBackend for InMemoryTypeBackend {
    fn load_raw_base_types(&self) -> Result<Vec<RawBaseType>> {
        let store = self.store.borrow();
        store.check_load()?;
        Ok(store.types.values().cloned().collect())
    }

    fn load_raw_type_members(&self) -> Result<Vec<RawTypeMember>> {
        let store = self.store.borrow();
        store.check_load()?;
        Ok(store.members.values().cloned().collect())
    }

    fn load_raw_type_substitutions(&self) -> Result<Vec<RawTypeSubstitution>> {
        let store = self.store.borrow();
        store.check_load()?;
        Ok(store.substitutions.values().cloned().collect())
    }

    fn load_raw_base_type(&self, id: TypeId) -> Result<RawBaseType> {
        let store = self.store.borrow();
        store.check_load()?;
        store
            .types
            .get(&id)
            .cloned()
            .ok_or_else(|| TypesError::CouldntLoad(format!("{} is not stored", id)))
    }

    fn load_raw_type_member(&self, id: MemberId) -> Result<RawTypeMember> {
        let store = self.store.borrow();
        store.check_load()?;
        store
            .members
            .get(&id)
            .cloned()
            .ok_or_else(|| TypesError::CouldntLoad(format!("{} is not stored", id)))
    }

    fn create_type(
        &mut self,
        name: &str,
        bit_size: i64,
        signed: bool,
        pointer_id: Option<TypeId>,
        category: BaseTypeCategory,
    ) -> Result<RawBaseType> {
        let mut store = self.store.borrow_mut();
        store.check_write("create type")?;
        let id = TypeId(store.next_type_id + 1);
        let row = RawBaseType::new(id, name, bit_size, pointer_id, signed, category)
            .map_err(|e| TypesError::CouldntSave(e.to_string()))?;
        store.next_type_id = id.0;
        store.types.insert(id, row.clone());
        Ok(row)
    }

    fn create_structure_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<RawTypeMember> {
        let mut store = self.store.borrow_mut();
        store.check_write("create structure member")?;
        let row = RawTypeMember::new(MemberId(0), name, member_type, parent, Some(offset), None, None)?;
        store.insert_member(row)
    }

    fn create_union_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<RawTypeMember> {
        let mut store = self.store.borrow_mut();
        store.check_write("create union member")?;
        let row = RawTypeMember::new(MemberId(0), name, member_type, parent, Some(offset), None, None)?;
        store.insert_member(row)
    }

    fn create_array_member(
        &mut self,
        parent: TypeId,
        element_type: TypeId,
        name: &str,
        number_of_elements: i64,
    ) -> Result<RawTypeMember> {
        let mut store = self.store.borrow_mut();
        store.check_write("create array member")?;
        let row = RawTypeMember::new(
            MemberId(0),
            name,
            element_type,
            parent,
            None,
            None,
            Some(number_of_elements),
        )?;
        store.insert_member(row)
    }

    fn create_function_prototype_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        argument_index: i64,
    ) -> Result<RawTypeMember> {
        let mut store = self.store.borrow_mut();
        store.check_write("create prototype member")?;
        let row = RawTypeMember::new(
            MemberId(0),
            name,
            member_type,
            parent,
            None,
            Some(argument_index),
            None,
        )?;
        store.insert_member(row)
    }

    fn update_type(&mut self, id: TypeId, name: &str, bit_size: i64, signed: bool) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("update type")?;
        let row = store
            .types
            .get_mut(&id)
            .ok_or_else(|| TypesError::CouldntSave(format!("{} is not stored", id)))?;
        row.name = name.to_string();
        row.bit_size = bit_size;
        row.signed = signed;
        Ok(())
    }

    fn update_structure_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("update structure member")?;
        let row = store.member_mut(member)?;
        row.base_type = member_type;
        row.name = name.to_string();
        row.offset = Some(offset);
        Ok(())
    }

    fn update_union_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<()> {
        self.update_structure_member(member, member_type, name, offset)
    }

    fn update_function_prototype_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        argument_index: i64,
    ) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("update prototype member")?;
        let row = store.member_mut(member)?;
        row.base_type = member_type;
        row.name = name.to_string();
        row.argument_index = Some(argument_index);
        Ok(())
    }

    fn update_array_member(
        &mut self,
        member: MemberId,
        element_type: TypeId,
        number_of_elements: i64,
    ) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("update array member")?;
        let row = store.member_mut(member)?;
        row.base_type = element_type;
        row.number_of_elements = Some(number_of_elements);
        Ok(())
    }

    fn update_member_offsets(
        &mut self,
        members: &[MemberId],
        delta: i64,
        implicitly_moved: &[MemberId],
        implicit_delta: i64,
    ) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("update member offsets")?;
        for (ids, shift) in [(members, delta), (implicitly_moved, implicit_delta)] {
            for id in ids {
                let row = store.member_mut(*id)?;
                row.offset = row.offset.map(|offset| offset + shift);
            }
        }
        Ok(())
    }

    fn delete_type(&mut self, id: TypeId) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_delete("delete type")?;
        if store.types.remove(&id).is_none() {
            return Err(TypesError::CouldntDelete(format!("{} is not stored", id)));
        }
        store
            .members
            .retain(|_, row| row.parent != id && row.base_type != id);
        Ok(())
    }

    fn delete_member(&mut self, id: MemberId) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_delete("delete member")?;
        store
            .members
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TypesError::CouldntDelete(format!("{} is not stored", id)))
    }

    fn create_type_substitution(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: &[MemberId],
        offset: i64,
    ) -> Result<RawTypeSubstitution> {
        let mut store = self.store.borrow_mut();
        store.check_write("create type substitution")?;
        let row = RawTypeSubstitution::new(location, base_type, member_path.to_vec(), offset)?;
        store.substitutions.insert(location, row.clone());
        Ok(row)
    }

    fn update_substitution(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: &[MemberId],
        offset: i64,
    ) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_write("update type substitution")?;
        let row = store
            .substitutions
            .get_mut(&location)
            .ok_or_else(|| TypesError::CouldntSave(format!("no substitution at {}", location)))?;
        row.base_type = base_type;
        row.member_path = member_path.to_vec();
        row.offset = offset;
        Ok(())
    }

    fn delete_type_substitution(&mut self, location: OperandLocation) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.check_delete("delete type substitution")?;
        store
            .substitutions
            .remove(&location)
            .map(|_| ())
            .ok_or_else(|| TypesError::CouldntDelete(format!("no substitution at {}", location)))
    }
}
