//! The type manager owns the type system and is the only way to change it.
//!
//! Every mutation follows the same protocol: validate the arguments, consult
//! the dependence graph, persist the change through the backend, apply it to
//! the in-memory universe, then notify listeners. Changes to the size of a
//! type ripple through every struct that embeds it, directly or nested; the
//! cascade re-computes the offsets of all members placed after such an
//! embedding and reports each shifted member individually.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::config::TypeSystemConfig;
use crate::error::{Result, TypesError};
use crate::types::backend::{
    RawBaseType, RawTypeMember, RawTypeSubstitution, TypeManagerBackend, TypeSystemSnapshot,
};
use crate::types::base_type::{build_array_name, BaseType, BaseTypeCategory};
use crate::types::dependence::TypeDependenceGraph;
use crate::types::ids::{MemberId, TypeId};
use crate::types::listeners::{
    ListenerId, ListenerRegistry, TypeChangedListener, TypeSubstitutionChangedListener,
};
use crate::types::member::{MemberPosition, TypeMember};
use crate::types::substitution::{OperandLocation, TypeSubstitution};
use crate::types::universe::{MemberMoveResult, TypeUniverse};
use crate::{log_error, span_trace};

/// Name given to prototypes created without one.
pub const DEFAULT_PROTOTYPE_NAME: &str = "function_prototype";

/// Bookkeeping for one size cascade.
struct Cascade {
    /// Types whose layout may change, including the type that changed first
    affected: BTreeSet<TypeId>,
    /// Types whose member offsets have not been fixed yet
    inconsistent: BTreeSet<TypeId>,
    /// Sizes before the change; prototypes are left out
    old_sizes: BTreeMap<TypeId, i64>,
}

/// Owner of all base types, members and type substitutions of a module.
pub struct TypeManager {
    backend: Box<dyn TypeManagerBackend>,
    config: TypeSystemConfig,
    universe: TypeUniverse,
    graph: TypeDependenceGraph,
    substitutions: BTreeMap<OperandLocation, TypeSubstitution>,
    type_listeners: ListenerRegistry<dyn TypeChangedListener>,
    substitution_listeners: ListenerRegistry<dyn TypeSubstitutionChangedListener>,
}

fn require_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TypesError::invalid(format!("{} name can not be empty", what)));
    }
    Ok(())
}

impl TypeManager {
    /// Load the type system stored in `backend` with the default configuration.
    pub fn new(backend: impl TypeManagerBackend + 'static) -> Result<Self> {
        Self::with_config(backend, TypeSystemConfig::default())
    }

    /// Load the type system stored in `backend`.
    ///
    /// Fails if the stored rows are inconsistent, e.g. a member references an
    /// unknown type or a type ends up containing itself.
    pub fn with_config(
        backend: impl TypeManagerBackend + 'static,
        config: TypeSystemConfig,
    ) -> Result<Self> {
        config.validate()?;
        let _span = span_trace!("load_type_system").entered();
        let raw_types = backend.load_raw_base_types()?;
        let raw_members = backend.load_raw_type_members()?;
        let raw_substitutions = backend.load_raw_type_substitutions()?;

        let mut universe = TypeUniverse::new();
        for raw in &raw_types {
            universe.insert_type(raw.to_base_type()?)?;
        }
        for raw in &raw_members {
            let member = raw.to_member()?;
            universe
                .add_member(member.parent, member)
                .map_err(|e| TypesError::CouldntLoad(format!("{}: {}", raw.id, e)))?;
        }
        for raw in &raw_types {
            if let Some(target) = raw.pointer_id {
                universe.append_to_pointer_hierarchy(target, raw.id)?;
            }
        }
        let graph = TypeDependenceGraph::from_universe(&universe).ok_or_else(|| {
            TypesError::CouldntLoad("stored types contain a cyclic declaration".to_string())
        })?;

        let mut substitutions = BTreeMap::new();
        for raw in &raw_substitutions {
            let substitution = raw.to_substitution()?;
            universe.base_type(substitution.base_type)?;
            substitutions.insert(substitution.location, substitution);
        }

        info!(
            types = universe.type_count(),
            members = raw_members.len(),
            substitutions = substitutions.len(),
            "type system loaded"
        );
        Ok(Self {
            backend: Box::new(backend),
            config,
            universe,
            graph,
            substitutions,
            type_listeners: ListenerRegistry::new(),
            substitution_listeners: ListenerRegistry::new(),
        })
    }

    pub fn config(&self) -> &TypeSystemConfig {
        &self.config
    }

    /// Read access to all types and members.
    pub fn universe(&self) -> &TypeUniverse {
        &self.universe
    }

    pub fn dependence_graph(&self) -> &TypeDependenceGraph {
        &self.graph
    }

    pub fn add_listener(&mut self, listener: Box<dyn TypeChangedListener>) -> ListenerId {
        self.type_listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.type_listeners.remove(id)
    }

    pub fn add_substitution_listener(
        &mut self,
        listener: Box<dyn TypeSubstitutionChangedListener>,
    ) -> ListenerId {
        self.substitution_listeners.add(listener)
    }

    pub fn remove_substitution_listener(&mut self, id: ListenerId) -> bool {
        self.substitution_listeners.remove(id)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn get_base_type(&self, id: TypeId) -> Result<&BaseType> {
        self.universe.base_type(id)
    }

    pub fn get_member(&self, id: MemberId) -> Result<&TypeMember> {
        self.universe.member(id)
    }

    /// All types in id order.
    pub fn get_types(&self) -> Vec<&BaseType> {
        self.universe.types().collect()
    }

    pub fn find_type_by_name(&self, name: &str) -> Option<&BaseType> {
        self.universe.types().find(|base_type| base_type.name() == name)
    }

    pub fn is_type_existing(&self, name: &str) -> bool {
        self.find_type_by_name(name).is_some()
    }

    /// Whether `candidate` is contained in `container`, directly or nested.
    pub fn is_contained_in(&self, container: TypeId, candidate: TypeId) -> bool {
        self.graph.is_type_contained_in(container, candidate)
    }

    /// Mark a type as the stack frame of a function. Not persisted.
    pub fn set_stack_frame(&mut self, id: TypeId) -> Result<()> {
        self.universe.base_type_mut(id)?.set_stack_frame(true);
        Ok(())
    }

    pub fn substitution_at(&self, location: OperandLocation) -> Option<&TypeSubstitution> {
        self.substitutions.get(&location)
    }

    pub fn get_substitutions(&self) -> Vec<&TypeSubstitution> {
        self.substitutions.values().collect()
    }

    /// Export the current model as raw rows.
    pub fn snapshot(&self) -> Result<TypeSystemSnapshot> {
        let mut types = Vec::with_capacity(self.universe.type_count());
        for base_type in self.universe.types() {
            types.push(RawBaseType::new(
                base_type.id(),
                base_type.name(),
                self.universe.bit_size(base_type.id())?,
                base_type.points_to(),
                base_type.is_signed(),
                base_type.category(),
            )?);
        }
        let members = self
            .universe
            .all_members()
            .map(RawTypeMember::from_member)
            .collect();
        let substitutions = self
            .substitutions
            .values()
            .map(|s| RawTypeSubstitution {
                location: s.location,
                base_type: s.base_type,
                member_path: s.member_path.clone(),
                offset: s.offset,
            })
            .collect();
        Ok(TypeSystemSnapshot {
            types,
            members,
            substitutions,
        })
    }

    // ---------------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------------

    pub fn create_atomic_type(&mut self, name: &str, bit_size: i64, signed: bool) -> Result<TypeId> {
        require_name(name, "type")?;
        if bit_size < 0 {
            return Err(TypesError::invalid("type size can not be negative"));
        }
        let id = self.instantiate_type(name, bit_size, signed, None, BaseTypeCategory::Atomic)?;
        self.emit_type_added(id)?;
        Ok(id)
    }

    pub fn create_structure(&mut self, name: &str) -> Result<TypeId> {
        require_name(name, "type")?;
        let id = self.instantiate_type(name, 0, false, None, BaseTypeCategory::Struct)?;
        self.emit_type_added(id)?;
        Ok(id)
    }

    pub fn create_union(&mut self, name: &str) -> Result<TypeId> {
        require_name(name, "type")?;
        let id = self.instantiate_type(name, 0, false, None, BaseTypeCategory::Union)?;
        self.emit_type_added(id)?;
        Ok(id)
    }

    /// Create an empty function prototype named [`DEFAULT_PROTOTYPE_NAME`].
    pub fn create_prototype(&mut self) -> Result<TypeId> {
        let id = self.instantiate_type(
            DEFAULT_PROTOTYPE_NAME,
            0,
            false,
            None,
            BaseTypeCategory::FunctionPrototype,
        )?;
        self.emit_type_added(id)?;
        Ok(id)
    }

    /// Create the array type `element[number_of_elements]`.
    pub fn create_array(&mut self, element: TypeId, number_of_elements: i64) -> Result<TypeId> {
        if number_of_elements <= 0 {
            return Err(TypesError::invalid("number of elements must be above zero"));
        }
        let element_type = self.universe.base_type(element)?;
        let name = build_array_name(element_type.name(), number_of_elements);
        let bit_size = self.universe.bit_size(element)? * number_of_elements;
        let id = self.instantiate_type(&name, bit_size, false, None, BaseTypeCategory::Array)?;
        let member_name = self.config.array_member_name.clone();
        let raw = self
            .backend
            .create_array_member(id, element, &member_name, number_of_elements)
            .map_err(|e| log_error!(e, "create_array_member"))?;
        self.register_member(raw)?;
        self.emit_type_added(id)?;
        Ok(id)
    }

    /// Return the pointer type pointing to `base`, creating it if needed.
    pub fn create_pointer_type(&mut self, base: TypeId) -> Result<TypeId> {
        let base_type = self.universe.base_type(base)?;
        if let Some(pointer) = base_type.pointed_to_by() {
            return Ok(pointer);
        }
        let level = self.universe.pointer_level(base)? as i64 + 1;
        let name = self.universe.pointer_type_name(base, level)?;
        let bit_size = self.config.default_pointer_size;
        let id = self.instantiate_type(&name, bit_size, false, Some(base), BaseTypeCategory::Pointer)?;
        self.emit_type_added(id)?;
        Ok(id)
    }

    /// Change name, size and signedness of a type.
    ///
    /// Only atomic and pointer types have a size of their own; for every other
    /// category `bit_size` must match the current derived size.
    pub fn update_type(&mut self, id: TypeId, name: &str, bit_size: i64, signed: bool) -> Result<()> {
        let _span = span_trace!("update_type", type_id = %id).entered();
        require_name(name, "type")?;
        if bit_size < 0 {
            return Err(TypesError::invalid("type size can not be negative"));
        }
        let category = self.universe.base_type(id)?.category();
        let size_changed = self.universe.bit_size(id)? != bit_size;
        if size_changed && !category.has_explicit_size() {
            return Err(TypesError::invalid(format!(
                "the size of {} types is derived from their members",
                category
            )));
        }
        let mut cascade = self.begin_cascade(id)?;
        self.backend
            .update_type(id, name, bit_size, signed)
            .map_err(|e| log_error!(e, "update_type"))?;
        let base_type = self.universe.base_type_mut(id)?;
        base_type.set_name(name)?;
        base_type.set_signed(signed);
        if size_changed {
            base_type.set_size(bit_size)?;
        }
        info!(type_id = %id, name, bit_size, "updated type");
        self.emit_types_updated(&cascade.affected);
        self.notify_substitutions_changed(&cascade.affected);
        if size_changed {
            self.ensure_consistency(&mut cascade)?;
        }
        Ok(())
    }

    pub fn rename_type(&mut self, id: TypeId, name: &str) -> Result<()> {
        let bit_size = self.universe.bit_size(id)?;
        let signed = self.universe.base_type(id)?.is_signed();
        self.update_type(id, name, bit_size, signed)
    }

    /// Change element type and count of an array type.
    pub fn update_array(
        &mut self,
        array: TypeId,
        element: TypeId,
        number_of_elements: i64,
    ) -> Result<()> {
        self.require_category(array, BaseTypeCategory::Array)?;
        if number_of_elements <= 0 {
            return Err(TypesError::invalid("number of elements must be above zero"));
        }
        let element_name = self.universe.base_type(element)?.name().to_string();
        let (member_id, member_name, old_element) = match self.universe.last_member(array)? {
            Some(member) => (member.id, member.name.clone(), member.base_type),
            None => return Err(TypesError::invalid(format!("{} has no element member", array))),
        };
        if old_element != element {
            self.check_cycle(array, element)?;
        }
        let mut cascade = self.begin_cascade(array)?;
        let name = build_array_name(&element_name, number_of_elements);
        let bit_size = self.universe.bit_size(element)? * number_of_elements;
        let signed = self.universe.base_type(array)?.is_signed();
        self.backend
            .update_array_member(member_id, element, number_of_elements)
            .map_err(|e| log_error!(e, "update_array_member"))?;
        self.backend.update_type(array, &name, bit_size, signed)?;
        self.universe.update_member(
            member_id,
            element,
            member_name,
            MemberPosition::Elements(number_of_elements),
        )?;
        self.graph.update_member(array, old_element, element);
        self.universe.base_type_mut(array)?.set_name(name)?;
        self.emit_types_updated(&cascade.affected);
        self.notify_substitutions_changed(&cascade.affected);
        cascade.inconsistent.remove(&array);
        self.ensure_consistency(&mut cascade)
    }

    /// Delete a type together with every member of that type.
    ///
    /// Returns `Ok(false)` without changing anything while a pointer type
    /// points to `id`. Structs that lose a member keep the gap; no offsets
    /// are recomputed.
    pub fn delete_type(&mut self, id: TypeId) -> Result<bool> {
        let _span = span_trace!("delete_type", type_id = %id).entered();
        let base_type = self.universe.base_type(id)?;
        if let Some(pointer) = base_type.pointed_to_by() {
            warn!(type_id = %id, pointer = %pointer, "type is still referenced by a pointer");
            return Ok(false);
        }
        let doomed = self.substitutions_bound_to(id);
        for location in &doomed {
            self.backend.delete_type_substitution(*location)?;
        }
        self.backend
            .delete_type(id)
            .map_err(|e| log_error!(e, "delete_type"))?;
        self.remove_type_locally(id, &doomed)?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Members
    // ---------------------------------------------------------------------

    /// Append a member behind the last member of a struct, to a union, or as
    /// the next argument of a prototype.
    pub fn append_member(&mut self, parent: TypeId, member_type: TypeId, name: &str) -> Result<MemberId> {
        match self.universe.base_type(parent)?.category() {
            BaseTypeCategory::Struct => {
                let offset = self.universe.bit_size(parent)?;
                self.create_structure_member(parent, member_type, name, offset)
            }
            BaseTypeCategory::Union => self.create_union_member(parent, member_type, name),
            BaseTypeCategory::FunctionPrototype => {
                let index = match self.universe.last_member(parent)? {
                    Some(last) => last.argument_index().unwrap_or(0) + 1,
                    None => 0,
                };
                self.create_function_prototype_member(parent, member_type, name, index)
            }
            category => Err(TypesError::invalid(format!(
                "can not add members to {} types",
                category
            ))),
        }
    }

    /// Insert a new member directly behind `existing`.
    pub fn insert_member_after(
        &mut self,
        existing: MemberId,
        member_type: TypeId,
        name: &str,
    ) -> Result<MemberId> {
        let member = self.universe.member(existing)?;
        let parent = member.parent;
        match (self.universe.base_type(parent)?.category(), member.position) {
            (BaseTypeCategory::Struct, MemberPosition::Offset(offset)) => {
                let offset = offset + self.universe.bit_size(member.base_type)?;
                self.create_structure_member(parent, member_type, name, offset)
            }
            (BaseTypeCategory::Union, _) => self.create_union_member(parent, member_type, name),
            (BaseTypeCategory::FunctionPrototype, MemberPosition::ArgumentIndex(index)) => {
                self.create_function_prototype_member(parent, member_type, name, index + 1)
            }
            (category, _) => Err(TypesError::invalid(format!(
                "can not insert members into {} types",
                category
            ))),
        }
    }

    /// Create a struct member at `offset`.
    ///
    /// Members at or behind the insertion point move back as far as needed to
    /// make room, and the growth of `parent` cascades to every struct that
    /// embeds it.
    pub fn create_structure_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<MemberId> {
        self.require_category(parent, BaseTypeCategory::Struct)?;
        self.create_offset_member(parent, member_type, name, offset)
    }

    pub fn create_union_member(&mut self, parent: TypeId, member_type: TypeId, name: &str) -> Result<MemberId> {
        self.require_category(parent, BaseTypeCategory::Union)?;
        self.create_offset_member(parent, member_type, name, 0)
    }

    pub fn create_function_prototype_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        argument_index: i64,
    ) -> Result<MemberId> {
        self.require_category(parent, BaseTypeCategory::FunctionPrototype)?;
        require_name(name, "member")?;
        if argument_index < 0 {
            return Err(TypesError::invalid("argument index can not be negative"));
        }
        self.universe.base_type(member_type)?;
        self.check_cycle(parent, member_type)?;
        let raw = self
            .backend
            .create_function_prototype_member(parent, member_type, name, argument_index)
            .map_err(|e| log_error!(e, "create_function_prototype_member"))?;
        let id = self.register_member(raw)?;
        self.emit_member_added(id)?;
        let affected = self.graph.update_type(parent);
        self.notify_substitutions_changed(&affected);
        Ok(id)
    }

    fn create_offset_member(
        &mut self,
        parent: TypeId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<MemberId> {
        let _span = span_trace!("create_member", parent = %parent, offset).entered();
        require_name(name, "member")?;
        if offset < 0 {
            return Err(TypesError::invalid("member offset can not be negative"));
        }
        self.universe.base_type(member_type)?;
        self.check_cycle(parent, member_type)?;

        // sizes have to be captured before anything moves
        let mut cascade = self.begin_cascade(parent)?;
        let category = self.universe.base_type(parent)?.category();
        let mut shifted = Vec::new();
        let mut move_delta = 0;
        if category == BaseTypeCategory::Struct {
            let subsequent = self.universe.subsequent_members_inclusive(parent, offset)?;
            if let Some(first) = subsequent.first() {
                let first_offset = self.universe.member(*first)?.bit_offset().unwrap_or(0);
                move_delta = offset + self.universe.bit_size(member_type)? - first_offset;
                if move_delta > 0 {
                    shifted = subsequent;
                }
            }
        }

        let created = if category == BaseTypeCategory::Struct {
            self.backend
                .create_structure_member(parent, member_type, name, offset)
        } else {
            self.backend.create_union_member(parent, member_type, name, offset)
        };
        let raw = created.map_err(|e| log_error!(e, "create_member"))?;
        if !shifted.is_empty() {
            if let Err(e) = self.backend.update_member_offsets(&shifted, move_delta, &[], 0) {
                if let Err(undo) = self.backend.delete_member(raw.id) {
                    log_error!(undo, "delete_member");
                }
                return Err(log_error!(e, "update_member_offsets"));
            }
        }

        for id in &shifted {
            let old_offset = self.universe.member(*id)?.bit_offset().unwrap_or(0);
            self.universe.set_member_offset(*id, old_offset + move_delta)?;
            debug!(member = %id, from = old_offset, to = old_offset + move_delta, "shifted member");
        }
        let id = self.register_member(raw)?;
        info!(member = %id, parent = %parent, offset, "created member");
        for sibling in &shifted {
            self.emit_member_updated(*sibling)?;
        }
        self.emit_member_added(id)?;
        self.notify_substitutions_changed(&cascade.affected);
        cascade.inconsistent.remove(&parent);
        self.ensure_consistency(&mut cascade)?;
        Ok(id)
    }

    /// Change type, name and offset of a struct member.
    ///
    /// Members behind it move by the size difference between the old and the
    /// new type; the change cascades to every struct that embeds the parent.
    pub fn update_structure_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<()> {
        let parent = self.universe.member(member)?.parent;
        self.require_category(parent, BaseTypeCategory::Struct)?;
        self.update_offset_member(member, member_type, name, offset)
    }

    pub fn update_union_member(&mut self, member: MemberId, member_type: TypeId, name: &str) -> Result<()> {
        let parent = self.universe.member(member)?.parent;
        self.require_category(parent, BaseTypeCategory::Union)?;
        self.update_offset_member(member, member_type, name, 0)
    }

    pub fn update_function_prototype_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        argument_index: i64,
    ) -> Result<()> {
        let (parent, old_type) = {
            let current = self.universe.member(member)?;
            (current.parent, current.base_type)
        };
        self.require_category(parent, BaseTypeCategory::FunctionPrototype)?;
        require_name(name, "member")?;
        if argument_index < 0 {
            return Err(TypesError::invalid("argument index can not be negative"));
        }
        self.universe.base_type(member_type)?;
        if old_type != member_type {
            self.check_cycle(parent, member_type)?;
        }
        self.backend
            .update_function_prototype_member(member, member_type, name, argument_index)
            .map_err(|e| log_error!(e, "update_function_prototype_member"))?;
        self.universe.update_member(
            member,
            member_type,
            name,
            MemberPosition::ArgumentIndex(argument_index),
        )?;
        let affected = self.graph.update_member(parent, old_type, member_type).affected_types;
        self.emit_member_updated(member)?;
        self.notify_substitutions_changed(&affected);
        Ok(())
    }

    fn update_offset_member(
        &mut self,
        member: MemberId,
        member_type: TypeId,
        name: &str,
        offset: i64,
    ) -> Result<()> {
        let _span = span_trace!("update_member", member = %member).entered();
        require_name(name, "member")?;
        if offset < 0 {
            return Err(TypesError::invalid("member offset can not be negative"));
        }
        self.universe.base_type(member_type)?;
        let (parent, old_type, old_offset) = {
            let current = self.universe.member(member)?;
            (current.parent, current.base_type, current.bit_offset().unwrap_or(0))
        };
        if old_type != member_type {
            self.check_cycle(parent, member_type)?;
        }
        let category = self.universe.base_type(parent)?.category();
        if category == BaseTypeCategory::Struct && old_type == member_type && old_offset != offset {
            return self.relocate_member(member, name, old_offset, offset);
        }
        let mut cascade = self.begin_cascade(parent)?;
        let size_delta = self.universe.bit_size(member_type)? - self.universe.bit_size(old_type)?;
        let stored = if category == BaseTypeCategory::Struct {
            self.backend
                .update_structure_member(member, member_type, name, offset)
        } else {
            self.backend.update_union_member(member, member_type, name, offset)
        };
        stored.map_err(|e| log_error!(e, "update_member"))?;
        self.universe
            .update_member(member, member_type, name, MemberPosition::Offset(offset))?;
        self.graph.update_member(parent, old_type, member_type);
        self.emit_member_updated(member)?;
        self.notify_substitutions_changed(&cascade.affected);

        if category == BaseTypeCategory::Struct && size_delta != 0 {
            for sibling in self.universe.subsequent_members(member)? {
                self.shift_member(sibling, size_delta)?;
            }
        }
        cascade.inconsistent.remove(&parent);
        self.ensure_consistency(&mut cascade)
    }

    /// Move a struct member to a new offset as a block of one, optionally
    /// renaming it on the way.
    fn relocate_member(&mut self, member: MemberId, name: &str, from: i64, to: i64) -> Result<()> {
        let (parent, member_type, renamed) = {
            let current = self.universe.member(member)?;
            (current.parent, current.base_type, current.name != name)
        };
        let delta = to - from;
        let plan = self.universe.plan_member_move(parent, &[member], delta)?;
        self.backend
            .update_member_offsets(&[member], delta, &plan.implicitly_moved, plan.implicit_delta)
            .map_err(|e| log_error!(e, "update_member_offsets"))?;
        if renamed {
            if let Err(e) = self.backend.update_structure_member(member, member_type, name, to) {
                let undone = self.backend.update_member_offsets(
                    &[member],
                    -delta,
                    &plan.implicitly_moved,
                    -plan.implicit_delta,
                );
                if let Err(undo) = undone {
                    log_error!(undo, "update_member_offsets");
                }
                return Err(log_error!(e, "update_structure_member"));
            }
            self.universe
                .update_member(member, member_type, name, MemberPosition::Offset(from))?;
        }
        let result = self.universe.move_members(parent, &[member], delta)?;
        debug!(member = %member, from, to, displaced = result.implicitly_moved.len(), "relocated member");
        if renamed {
            self.emit_member_updated(member)?;
        }
        let affected = self.graph.update_type(parent);
        self.emit_members_moved(&affected);
        Ok(())
    }

    /// Delete a member.
    ///
    /// Later members of a struct move forward by the size of the deleted
    /// member; the shrinking cascades to every struct that embeds the parent.
    pub fn delete_member(&mut self, member: MemberId) -> Result<()> {
        let _span = span_trace!("delete_member", member = %member).entered();
        let (parent, member_type) = {
            let current = self.universe.member(member)?;
            (current.parent, current.base_type)
        };
        let category = self.universe.base_type(parent)?.category();
        let mut cascade = self.begin_cascade(parent)?;
        let size = self.universe.bit_size(member_type)?;
        let later = if category == BaseTypeCategory::Struct && size != 0 {
            self.universe.subsequent_members(member)?
        } else {
            Vec::new()
        };
        let doomed: Vec<OperandLocation> = self
            .substitutions
            .values()
            .filter(|substitution| substitution.member_path.contains(&member))
            .map(|substitution| substitution.location)
            .collect();

        for location in &doomed {
            self.backend
                .delete_type_substitution(*location)
                .map_err(|e| log_error!(e, "delete_type_substitution"))?;
        }
        if !later.is_empty() {
            self.backend
                .update_member_offsets(&later, -size, &[], 0)
                .map_err(|e| log_error!(e, "update_member_offsets"))?;
        }
        if let Err(e) = self.backend.delete_member(member) {
            if !later.is_empty() {
                if let Err(undo) = self.backend.update_member_offsets(&later, size, &[], 0) {
                    log_error!(undo, "update_member_offsets");
                }
            }
            return Err(log_error!(e, "delete_member"));
        }

        let deleted: Vec<TypeSubstitution> = doomed
            .iter()
            .filter_map(|location| self.substitutions.remove(location))
            .collect();
        let removed = self.universe.delete_member(member)?;
        self.graph.delete_member(parent, member_type);
        for id in &later {
            let offset = self.universe.member(*id)?.bit_offset().unwrap_or(0);
            self.universe.set_member_offset(*id, offset - size)?;
        }
        info!(member = %member, parent = %parent, shifted = later.len(), "deleted member");
        if !deleted.is_empty() {
            self.substitution_listeners
                .notify(|listener| listener.substitutions_deleted(&deleted));
        }
        self.notify_substitutions_changed(&cascade.affected);
        self.emit_types_updated(&cascade.affected);
        self.type_listeners
            .notify(|listener| listener.member_deleted(&removed));
        if !later.is_empty() {
            self.emit_members_moved(&cascade.affected);
        }
        cascade.inconsistent.remove(&parent);
        self.ensure_consistency(&mut cascade)
    }

    /// Move a consecutive block of struct members by `delta` bits.
    pub fn move_members(
        &mut self,
        parent: TypeId,
        members: &[MemberId],
        delta: i64,
    ) -> Result<MemberMoveResult> {
        if delta == 0 {
            return Err(TypesError::invalid("move delta can not be zero"));
        }
        self.require_category(parent, BaseTypeCategory::Struct)?;
        let selection: Vec<MemberId> = members
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let plan = self.universe.plan_member_move(parent, &selection, delta)?;
        self.backend
            .update_member_offsets(&selection, delta, &plan.implicitly_moved, plan.implicit_delta)
            .map_err(|e| log_error!(e, "update_member_offsets"))?;
        let result = self.universe.move_members(parent, &selection, delta)?;
        debug!(parent = %parent, delta, displaced = result.implicitly_moved.len(), "moved members");
        let affected = self.graph.update_type(parent);
        self.emit_members_moved(&affected);
        Ok(result)
    }

    // ---------------------------------------------------------------------
    // Type substitutions
    // ---------------------------------------------------------------------

    pub fn create_type_substitution(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: Vec<MemberId>,
        offset: i64,
    ) -> Result<TypeSubstitution> {
        let substitution = TypeSubstitution::new(location, base_type, member_path, offset)?;
        self.check_substitution_targets(&substitution)?;
        if self.substitutions.contains_key(&location) {
            return Err(TypesError::invalid(format!(
                "operand {} already has a type substitution",
                location
            )));
        }
        let raw = self
            .backend
            .create_type_substitution(location, base_type, &substitution.member_path, offset)
            .map_err(|e| log_error!(e, "create_type_substitution"))?;
        let substitution = raw.to_substitution()?;
        self.substitutions.insert(location, substitution.clone());
        let added = [substitution.clone()];
        self.substitution_listeners
            .notify(|listener| listener.substitutions_added(&added));
        Ok(substitution)
    }

    pub fn update_type_substitution(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: Vec<MemberId>,
        offset: i64,
    ) -> Result<()> {
        let updated = TypeSubstitution::new(location, base_type, member_path, offset)?;
        self.check_substitution_targets(&updated)?;
        if !self.substitutions.contains_key(&location) {
            return Err(TypesError::invalid(format!("operand {} has no type substitution", location)));
        }
        self.backend
            .update_substitution(location, base_type, &updated.member_path, offset)
            .map_err(|e| log_error!(e, "update_substitution"))?;
        self.substitutions.insert(location, updated.clone());
        let changed = [updated];
        self.substitution_listeners
            .notify(|listener| listener.substitutions_changed(&changed));
        Ok(())
    }

    pub fn delete_type_substitution(&mut self, location: OperandLocation) -> Result<()> {
        if !self.substitutions.contains_key(&location) {
            return Err(TypesError::invalid(format!("operand {} has no type substitution", location)));
        }
        self.backend
            .delete_type_substitution(location)
            .map_err(|e| log_error!(e, "delete_type_substitution"))?;
        if let Some(removed) = self.substitutions.remove(&location) {
            let deleted = [removed];
            self.substitution_listeners
                .notify(|listener| listener.substitutions_deleted(&deleted));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reloading changes made by other clients; the backend is only read
    // ---------------------------------------------------------------------

    pub fn load_and_initialize_base_type(&mut self, id: TypeId) -> Result<()> {
        let raw = self.backend.load_raw_base_type(id)?;
        self.universe.insert_type(raw.to_base_type()?)?;
        if let Some(target) = raw.pointer_id {
            self.universe.append_to_pointer_hierarchy(target, id)?;
        }
        self.graph.add_type(id);
        self.emit_type_added(id)
    }

    pub fn load_and_initialize_type_member(&mut self, id: MemberId) -> Result<()> {
        let raw = self.backend.load_raw_type_member(id)?;
        self.check_cycle(raw.parent, raw.base_type)?;
        let parent = raw.parent;
        self.register_member(raw)?;
        let affected = self.graph.update_type(parent);
        self.emit_member_added(id)?;
        self.emit_types_updated(&affected);
        self.notify_substitutions_changed(&affected);
        Ok(())
    }

    pub fn load_and_update_base_type(&mut self, id: TypeId) -> Result<()> {
        let raw = self.backend.load_raw_base_type(id)?;
        let base_type = self.universe.base_type_mut(id)?;
        base_type.set_name(raw.name.clone())?;
        base_type.set_signed(raw.signed);
        if base_type.category().has_explicit_size() {
            base_type.set_size(raw.bit_size)?;
        }
        let affected = self.graph.update_type(id);
        self.emit_types_updated(&affected);
        self.notify_substitutions_changed(&affected);
        Ok(())
    }

    pub fn load_and_update_type_member(&mut self, id: MemberId) -> Result<()> {
        let raw = self.backend.load_raw_type_member(id)?;
        let (parent, old_type) = {
            let current = self.universe.member(id)?;
            (current.parent, current.base_type)
        };
        if old_type != raw.base_type {
            self.check_cycle(parent, raw.base_type)?;
        }
        self.universe
            .update_member(id, raw.base_type, raw.name.clone(), raw.position()?)?;
        let affected = self.graph.update_member(parent, old_type, raw.base_type).affected_types;
        self.emit_member_updated(id)?;
        self.notify_substitutions_changed(&affected);
        self.emit_types_updated(&affected);
        Ok(())
    }

    pub fn remove_base_type_instance(&mut self, id: TypeId) -> Result<()> {
        self.universe.base_type(id)?;
        let doomed = self.substitutions_bound_to(id);
        self.remove_type_locally(id, &doomed)
    }

    pub fn remove_member_instance(&mut self, id: MemberId) -> Result<()> {
        let removed = self.universe.delete_member(id)?;
        let affected = self.graph.delete_member(removed.parent, removed.base_type);
        self.notify_substitutions_changed(&affected);
        self.emit_types_updated(&affected);
        self.type_listeners
            .notify(|listener| listener.member_deleted(&removed));
        Ok(())
    }

    pub fn initialize_type_substitution(&mut self, raw: &RawTypeSubstitution) -> Result<()> {
        let substitution = raw.to_substitution()?;
        self.check_substitution_targets(&substitution)?;
        self.substitutions
            .insert(substitution.location, substitution.clone());
        let added = [substitution];
        self.substitution_listeners
            .notify(|listener| listener.substitutions_added(&added));
        Ok(())
    }

    pub fn update_type_substitution_local(
        &mut self,
        location: OperandLocation,
        base_type: TypeId,
        member_path: Vec<MemberId>,
        offset: i64,
    ) -> Result<()> {
        let updated = TypeSubstitution::new(location, base_type, member_path, offset)?;
        self.check_substitution_targets(&updated)?;
        if !self.substitutions.contains_key(&location) {
            return Err(TypesError::invalid(format!("operand {} has no type substitution", location)));
        }
        self.substitutions.insert(location, updated.clone());
        let changed = [updated];
        self.substitution_listeners
            .notify(|listener| listener.substitutions_changed(&changed));
        Ok(())
    }

    pub fn remove_type_substitution_instance(&mut self, location: OperandLocation) -> Result<()> {
        match self.substitutions.remove(&location) {
            Some(removed) => {
                let deleted = [removed];
                self.substitution_listeners
                    .notify(|listener| listener.substitutions_deleted(&deleted));
                Ok(())
            }
            None => Err(TypesError::invalid(format!("operand {} has no type substitution", location))),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn require_category(&self, id: TypeId, category: BaseTypeCategory) -> Result<()> {
        let base_type = self.universe.base_type(id)?;
        if base_type.category() != category {
            return Err(TypesError::invalid(format!(
                "{} is not a {} type",
                base_type, category
            )));
        }
        Ok(())
    }

    fn check_cycle(&self, parent: TypeId, member_type: TypeId) -> Result<()> {
        if self.graph.will_create_cycle(parent, member_type) {
            warn!(parent = %parent, member_type = %member_type, "rejected cyclic declaration");
            return Err(TypesError::CyclicDeclaration {
                parent,
                member: member_type,
            });
        }
        Ok(())
    }

    fn check_substitution_targets(&self, substitution: &TypeSubstitution) -> Result<()> {
        self.universe.base_type(substitution.base_type)?;
        for member in &substitution.member_path {
            self.universe.member(*member)?;
        }
        Ok(())
    }

    fn instantiate_type(
        &mut self,
        name: &str,
        bit_size: i64,
        signed: bool,
        points_to: Option<TypeId>,
        category: BaseTypeCategory,
    ) -> Result<TypeId> {
        let raw = self
            .backend
            .create_type(name, bit_size, signed, points_to, category)
            .map_err(|e| log_error!(e, "create_type"))?;
        let id = raw.id;
        self.universe.insert_type(raw.to_base_type()?)?;
        if let Some(target) = points_to {
            self.universe.append_to_pointer_hierarchy(target, id)?;
        }
        self.graph.add_type(id);
        info!(type_id = %id, name, %category, bit_size, "created type");
        Ok(id)
    }

    fn register_member(&mut self, raw: RawTypeMember) -> Result<MemberId> {
        let member = raw.to_member()?;
        let (id, parent, member_type) = (member.id, member.parent, member.base_type);
        self.universe.add_member(parent, member)?;
        if !self.graph.add_member(parent, member_type).valid {
            self.universe.delete_member(id)?;
            return Err(TypesError::CyclicDeclaration {
                parent,
                member: member_type,
            });
        }
        Ok(id)
    }

    /// Substitutions that render through `id` or through one of its members.
    fn substitutions_bound_to(&self, id: TypeId) -> Vec<OperandLocation> {
        self.substitutions
            .values()
            .filter(|substitution| {
                substitution.base_type == id
                    || substitution.member_path.iter().any(|member| {
                        self.universe
                            .member(*member)
                            .map(|member| member.base_type == id || member.parent == id)
                            .unwrap_or(true)
                    })
            })
            .map(|substitution| substitution.location)
            .collect()
    }

    fn remove_type_locally(&mut self, id: TypeId, doomed: &[OperandLocation]) -> Result<()> {
        for member_id in self.universe.members_referencing(id) {
            let removed = self.universe.delete_member(member_id)?;
            self.type_listeners
                .notify(|listener| listener.member_deleted(&removed));
        }
        let deleted: Vec<TypeSubstitution> = doomed
            .iter()
            .filter_map(|location| self.substitutions.remove(location))
            .collect();
        if !deleted.is_empty() {
            self.substitution_listeners
                .notify(|listener| listener.substitutions_deleted(&deleted));
        }
        self.graph.delete_type(id);
        let removed = self.universe.remove_type(id)?;
        info!(type_id = %id, name = removed.name(), "deleted type");
        self.type_listeners
            .notify(|listener| listener.type_deleted(&removed));
        Ok(())
    }

    fn begin_cascade(&self, changed: TypeId) -> Result<Cascade> {
        let affected = self.graph.update_type(changed);
        let mut old_sizes = BTreeMap::new();
        for id in &affected {
            if self.universe.base_type(*id)?.category() != BaseTypeCategory::FunctionPrototype {
                old_sizes.insert(*id, self.universe.bit_size(*id)?);
            }
        }
        Ok(Cascade {
            inconsistent: affected.clone(),
            affected,
            old_sizes,
        })
    }

    /// Fix member offsets of every inconsistent type, lowest id first.
    fn ensure_consistency(&mut self, cascade: &mut Cascade) -> Result<()> {
        while let Some(next) = cascade.inconsistent.iter().next().copied() {
            self.settle(next, cascade)?;
        }
        Ok(())
    }

    fn settle(&mut self, id: TypeId, cascade: &mut Cascade) -> Result<()> {
        if !cascade.inconsistent.remove(&id) {
            return Ok(());
        }
        if self.universe.base_type(id)?.category() == BaseTypeCategory::Struct {
            return self.adjust_member_offsets(id, cascade);
        }
        // derived sizes of arrays and unions are only right once their members are
        let member_types: Vec<TypeId> = self
            .universe
            .members(id)?
            .iter()
            .map(|member| member.base_type)
            .collect();
        for member_type in member_types {
            self.settle(member_type, cascade)?;
        }
        Ok(())
    }

    /// Shift every member behind a member whose type changed size.
    fn adjust_member_offsets(&mut self, struct_id: TypeId, cascade: &mut Cascade) -> Result<()> {
        let mut to_update = Vec::new();
        let mut include = false;
        for member in self.universe.members(struct_id)? {
            include |= cascade.affected.contains(&member.base_type);
            if include {
                to_update.push(member.id);
            }
        }

        let mut size_delta = 0;
        for id in to_update {
            let member_type = self.universe.member(id)?.base_type;
            if cascade.inconsistent.contains(&member_type) {
                self.settle(member_type, cascade)?;
            }
            if size_delta != 0 {
                self.shift_member(id, size_delta)?;
            }
            if let Some(old_size) = cascade.old_sizes.get(&member_type) {
                size_delta += self.universe.bit_size(member_type)? - old_size;
            }
        }
        Ok(())
    }

    fn shift_member(&mut self, id: MemberId, delta: i64) -> Result<()> {
        let (member_type, name, offset) = {
            let member = self.universe.member(id)?;
            (member.base_type, member.name.clone(), member.bit_offset().unwrap_or(0))
        };
        let new_offset = offset + delta;
        self.backend
            .update_structure_member(id, member_type, &name, new_offset)
            .map_err(|e| log_error!(e, "update_structure_member"))?;
        self.universe.set_member_offset(id, new_offset)?;
        debug!(member = %id, from = offset, to = new_offset, "shifted member");
        self.emit_member_updated(id)
    }

    fn notify_substitutions_changed(&mut self, affected: &BTreeSet<TypeId>) {
        let universe = &self.universe;
        let changed: Vec<TypeSubstitution> = self
            .substitutions
            .values()
            .filter(|substitution| {
                affected
                    .iter()
                    .any(|id| substitution.references_type(universe, *id))
            })
            .cloned()
            .collect();
        if !changed.is_empty() {
            self.substitution_listeners
                .notify(|listener| listener.substitutions_changed(&changed));
        }
    }

    fn emit_type_added(&mut self, id: TypeId) -> Result<()> {
        let base_type = self.universe.base_type(id)?;
        self.type_listeners
            .notify(|listener| listener.type_added(base_type));
        Ok(())
    }

    fn emit_member_added(&mut self, id: MemberId) -> Result<()> {
        let member = self.universe.member(id)?;
        self.type_listeners
            .notify(|listener| listener.member_added(member));
        Ok(())
    }

    fn emit_member_updated(&mut self, id: MemberId) -> Result<()> {
        let member = self.universe.member(id)?;
        self.type_listeners
            .notify(|listener| listener.member_updated(member));
        Ok(())
    }

    fn emit_types_updated(&mut self, affected: &BTreeSet<TypeId>) {
        self.type_listeners
            .notify(|listener| listener.types_updated(affected));
    }

    fn emit_members_moved(&mut self, affected: &BTreeSet<TypeId>) {
        self.type_listeners
            .notify(|listener| listener.members_moved(affected));
    }
}
