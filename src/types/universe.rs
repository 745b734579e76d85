//! The arena that owns every base type and type member.
//!
//! Types reference their members, members reference their parent and their own
//! type, and pointer types reference the type they point to, all by id. Derived
//! properties such as the size of a struct are computed here on demand so they
//! always reflect the current member layout. Only the type manager mutates the
//! universe; everybody else gets shared references.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, TypesError};
use crate::types::base_type::{BaseType, BaseTypeCategory};
use crate::types::ids::{MemberId, TypeId};
use crate::types::member::{MemberPosition, TypeMember};

/// Outcome of moving a block of members inside a struct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberMoveResult {
    /// Members that had to make room for the moved block
    pub implicitly_moved: Vec<MemberId>,
    /// Offset change applied to the implicitly moved members
    pub implicit_delta: i64,
}

/// Canonical store of base types and members, keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeUniverse {
    types: BTreeMap<TypeId, BaseType>,
    members: BTreeMap<MemberId, TypeMember>,
}

impl TypeUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_type(&self, id: TypeId) -> Result<&BaseType> {
        self.types.get(&id).ok_or(TypesError::TypeNotFound(id))
    }

    pub(crate) fn base_type_mut(&mut self, id: TypeId) -> Result<&mut BaseType> {
        self.types.get_mut(&id).ok_or(TypesError::TypeNotFound(id))
    }

    pub fn member(&self, id: MemberId) -> Result<&TypeMember> {
        self.members.get(&id).ok_or(TypesError::MemberNotFound(id))
    }

    pub fn contains_type(&self, id: TypeId) -> bool {
        self.types.contains_key(&id)
    }

    pub fn contains_member(&self, id: MemberId) -> bool {
        self.members.contains_key(&id)
    }

    /// All types in id order.
    pub fn types(&self) -> impl Iterator<Item = &BaseType> {
        self.types.values()
    }

    /// All members in id order.
    pub fn all_members(&self) -> impl Iterator<Item = &TypeMember> {
        self.members.values()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Members of a type in layout order.
    pub fn members(&self, id: TypeId) -> Result<Vec<&TypeMember>> {
        self.base_type(id)?
            .member_ids()
            .iter()
            .map(|member_id| self.member(*member_id))
            .collect()
    }

    pub fn member_count(&self, id: TypeId) -> Result<usize> {
        Ok(self.base_type(id)?.member_ids().len())
    }

    pub fn has_members(&self, id: TypeId) -> Result<bool> {
        Ok(self.member_count(id)? > 0)
    }

    pub fn first_member(&self, id: TypeId) -> Result<Option<&TypeMember>> {
        match self.base_type(id)?.member_ids().first() {
            Some(member_id) => Ok(Some(self.member(*member_id)?)),
            None => Ok(None),
        }
    }

    pub fn last_member(&self, id: TypeId) -> Result<Option<&TypeMember>> {
        match self.base_type(id)?.member_ids().last() {
            Some(member_id) => Ok(Some(self.member(*member_id)?)),
            None => Ok(None),
        }
    }

    /// Effective size of a type in bits.
    ///
    /// Atomic, pointer and prototype types report their stored size. Arrays
    /// multiply the element size by the element count, structs end where their
    /// last member ends, and unions are as large as their largest member.
    pub fn bit_size(&self, id: TypeId) -> Result<i64> {
        let base_type = self.base_type(id)?;
        match base_type.category() {
            BaseTypeCategory::Atomic
            | BaseTypeCategory::Pointer
            | BaseTypeCategory::FunctionPrototype => Ok(base_type.stored_bit_size()),
            BaseTypeCategory::Array => match self.last_member(id)? {
                Some(member) => Ok(member.number_of_elements().unwrap_or(0)
                    * self.bit_size(member.base_type)?),
                None => Ok(0),
            },
            BaseTypeCategory::Struct => match self.last_member(id)? {
                Some(member) => {
                    Ok(member.bit_offset().unwrap_or(0) + self.bit_size(member.base_type)?)
                }
                None => Ok(0),
            },
            BaseTypeCategory::Union => {
                let mut max_size = 0;
                for member in self.members(id)? {
                    max_size = max_size.max(self.bit_size(member.base_type)?);
                }
                Ok(max_size)
            }
        }
    }

    /// Size in bytes, rounded up to the next byte boundary.
    pub fn byte_size(&self, id: TypeId) -> Result<i64> {
        Ok((self.bit_size(id)? + 7) / 8)
    }

    /// Size of a member in bits, i.e. the size of its type.
    pub fn member_bit_size(&self, id: MemberId) -> Result<i64> {
        self.bit_size(self.member(id)?.base_type)
    }

    /// Members at or after the member that contains `bit_offset`.
    pub fn subsequent_members_inclusive(&self, id: TypeId, bit_offset: i64) -> Result<Vec<MemberId>> {
        self.require_offset_category(id)?;
        if bit_offset < 0 {
            return Err(TypesError::invalid("offset can not be negative"));
        }
        let members = self.members(id)?;
        let mut search_offset = bit_offset;
        for member in &members {
            let start = member.bit_offset().unwrap_or(0);
            let end = start + self.bit_size(member.base_type)?;
            if start <= bit_offset && bit_offset < end {
                search_offset = start;
                break;
            }
        }
        Ok(members
            .iter()
            .filter(|member| member.bit_offset().unwrap_or(0) >= search_offset)
            .map(|member| member.id)
            .collect())
    }

    /// Members placed strictly after `member` in its parent.
    pub fn subsequent_members(&self, member: MemberId) -> Result<Vec<MemberId>> {
        let parent = self.member(member)?.parent;
        self.require_offset_category(parent)?;
        let ids = self.base_type(parent)?.member_ids();
        let position = ids
            .iter()
            .position(|id| *id == member)
            .ok_or(TypesError::MemberNotFound(member))?;
        Ok(ids[position + 1..].to_vec())
    }

    /// Ids of all members whose type is `type_id`, in id order.
    pub fn members_referencing(&self, type_id: TypeId) -> Vec<MemberId> {
        self.members
            .values()
            .filter(|member| member.base_type == type_id)
            .map(|member| member.id)
            .collect()
    }

    /// Number of pointer links between a type and its value type.
    pub fn pointer_level(&self, id: TypeId) -> Result<usize> {
        let mut level = 0;
        let mut current = self.base_type(id)?;
        while let Some(target) = current.points_to() {
            level += 1;
            if level > self.types.len() {
                return Err(TypesError::invalid(format!("pointer chain of {} is circular", id)));
            }
            current = self.base_type(target)?;
        }
        Ok(level)
    }

    /// The type at the bottom of the pointer chain, e.g. `int` for `int **`.
    pub fn value_type(&self, id: TypeId) -> Result<TypeId> {
        let mut current = self.base_type(id)?;
        let mut steps = 0;
        while let Some(target) = current.points_to() {
            steps += 1;
            if steps > self.types.len() {
                return Err(TypesError::invalid(format!("pointer chain of {} is circular", id)));
            }
            current = self.base_type(target)?;
        }
        Ok(current.id())
    }

    pub fn value_type_name(&self, id: TypeId) -> Result<&str> {
        Ok(self.base_type(self.value_type(id)?)?.name())
    }

    /// Pointer type name for the value type of `id`, e.g. `"int **"` for level 2.
    pub fn pointer_type_name(&self, id: TypeId, pointer_level: i64) -> Result<String> {
        if pointer_level <= 0 {
            return Err(TypesError::invalid("pointer level must be greater than zero"));
        }
        Ok(format!(
            "{} {}",
            self.value_type_name(id)?,
            "*".repeat(pointer_level as usize)
        ))
    }

    fn require_offset_category(&self, id: TypeId) -> Result<()> {
        let base_type = self.base_type(id)?;
        if !base_type.category().is_offset_category() {
            return Err(TypesError::invalid(format!(
                "{} does not place members at offsets",
                base_type
            )));
        }
        Ok(())
    }

    pub(crate) fn insert_type(&mut self, base_type: BaseType) -> Result<()> {
        if self.types.contains_key(&base_type.id()) {
            return Err(TypesError::invalid(format!(
                "{} is already registered",
                base_type.id()
            )));
        }
        self.types.insert(base_type.id(), base_type);
        Ok(())
    }

    /// Remove a type and unlink it from the pointer hierarchy.
    ///
    /// Members of the removed type are dropped with it; members of other types
    /// that reference it have to be removed by the caller first.
    pub(crate) fn remove_type(&mut self, id: TypeId) -> Result<BaseType> {
        let removed = self.types.remove(&id).ok_or(TypesError::TypeNotFound(id))?;
        for member_id in removed.member_ids() {
            self.members.remove(member_id);
        }
        if let Some(target) = removed.points_to() {
            if let Some(target_type) = self.types.get_mut(&target) {
                target_type.set_pointed_to_by(None);
            }
        }
        if let Some(pointer) = removed.pointed_to_by() {
            if let Some(pointer_type) = self.types.get_mut(&pointer) {
                pointer_type.set_points_to(None);
            }
        }
        Ok(removed)
    }

    /// Add a member to `parent`.
    ///
    /// Returns `false` without changing anything when the member is already
    /// part of the parent.
    pub(crate) fn add_member(&mut self, parent: TypeId, member: TypeMember) -> Result<bool> {
        if member.parent != parent {
            return Err(TypesError::invalid(format!(
                "member '{}' belongs to {} and can not be added to {}",
                member.name, member.parent, parent
            )));
        }
        if let Some(existing) = self.members.get(&member.id) {
            if existing.parent == parent {
                return Ok(false);
            }
            return Err(TypesError::invalid(format!(
                "{} is already registered",
                member.id
            )));
        }
        if !self.types.contains_key(&member.base_type) {
            return Err(TypesError::TypeNotFound(member.base_type));
        }
        let parent_type = self.base_type(parent)?;
        check_position_matches(parent_type, &member.position)?;
        if parent_type.category() == BaseTypeCategory::Array && parent_type.member_ids().len() == 1
        {
            return Err(TypesError::invalid(format!(
                "array {} already has an element member",
                parent
            )));
        }
        let member_id = member.id;
        self.members.insert(member_id, member);
        self.base_type_mut(parent)?.members_mut().push(member_id);
        self.resort_members(parent)?;
        Ok(true)
    }

    pub(crate) fn delete_member(&mut self, id: MemberId) -> Result<TypeMember> {
        let member = self.members.remove(&id).ok_or(TypesError::MemberNotFound(id))?;
        if let Some(parent) = self.types.get_mut(&member.parent) {
            parent.members_mut().retain(|member_id| *member_id != id);
        }
        Ok(member)
    }

    /// Replace type, name and position of a member and restore the layout order.
    pub(crate) fn update_member(
        &mut self,
        id: MemberId,
        base_type: TypeId,
        name: impl Into<String>,
        position: MemberPosition,
    ) -> Result<()> {
        if !self.types.contains_key(&base_type) {
            return Err(TypesError::TypeNotFound(base_type));
        }
        let parent = self.member(id)?.parent;
        if parent == base_type {
            return Err(TypesError::CyclicDeclaration {
                parent,
                member: base_type,
            });
        }
        check_position_matches(self.base_type(parent)?, &position)?;
        let member = self.members.get_mut(&id).ok_or(TypesError::MemberNotFound(id))?;
        member.base_type = base_type;
        member.name = name.into();
        member.position = position;
        self.resort_members(parent)
    }

    pub(crate) fn set_member_offset(&mut self, id: MemberId, offset: i64) -> Result<()> {
        let member = self.members.get_mut(&id).ok_or(TypesError::MemberNotFound(id))?;
        match member.position {
            MemberPosition::Offset(_) => member.position = MemberPosition::Offset(offset),
            _ => {
                return Err(TypesError::invalid(format!(
                    "{} is not placed at an offset",
                    id
                )))
            }
        }
        let parent = member.parent;
        self.resort_members(parent)
    }

    /// Move a consecutive block of struct members by `delta` bits.
    ///
    /// The members found in the window the block moves into are shifted the
    /// other way by the size the block occupies, so the selected members and
    /// the displaced ones swap places.
    pub(crate) fn move_members(
        &mut self,
        parent: TypeId,
        selection: &[MemberId],
        delta: i64,
    ) -> Result<MemberMoveResult> {
        let result = self.plan_member_move(parent, selection, delta)?;
        self.apply_member_move(parent, selection, delta, &result)?;
        Ok(result)
    }

    /// Validate a block move and compute which members make room, without
    /// changing anything.
    pub fn plan_member_move(
        &self,
        parent: TypeId,
        selection: &[MemberId],
        delta: i64,
    ) -> Result<MemberMoveResult> {
        self.require_offset_category(parent)?;
        let selected: BTreeSet<MemberId> = selection.iter().copied().collect();
        if selected.is_empty() {
            return Err(TypesError::invalid("no members selected"));
        }
        let layout: Vec<&TypeMember> = self.members(parent)?;
        for id in &selected {
            if !layout.iter().any(|member| member.id == *id) {
                return Err(TypesError::invalid(format!(
                    "{} is not a member of {}",
                    id, parent
                )));
            }
        }
        let block: Vec<&TypeMember> = layout
            .iter()
            .copied()
            .filter(|member| selected.contains(&member.id))
            .collect();
        let (first, last) = match (block.first(), block.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(TypesError::invalid("no members selected")),
        };
        let parent_last = match layout.last() {
            Some(member) => *member,
            None => return Err(TypesError::invalid(format!("{} has no members", parent))),
        };

        let first_offset = first.bit_offset().unwrap_or(0);
        let last_offset = last.bit_offset().unwrap_or(0);
        let last_size = self.bit_size(last.base_type)?;
        let parent_end = parent_last.bit_offset().unwrap_or(0) + self.bit_size(parent_last.base_type)?;
        if first_offset + delta < 0 {
            return Err(TypesError::invalid("can not move members to a negative offset"));
        }
        if last_offset + delta > parent_end {
            return Err(TypesError::invalid("can not move members behind the last member"));
        }
        for pair in block.windows(2) {
            let previous_end =
                pair[0].bit_offset().unwrap_or(0) + self.bit_size(pair[0].base_type)?;
            if pair[1].bit_offset().unwrap_or(0) != previous_end {
                return Err(TypesError::invalid(
                    "can not move members that are not consecutive",
                ));
            }
        }

        let occupied = last_offset - first_offset + last_size;
        let (window_start, window_end, implicit_delta) = if delta < 0 {
            (first_offset + delta, first_offset, occupied)
        } else {
            let next = layout
                .iter()
                .skip_while(|member| member.id != last.id)
                .nth(1)
                .map(|member| member.bit_offset().unwrap_or(0));
            match next {
                Some(next_offset) => (next_offset, next_offset + delta, -occupied),
                None => {
                    return Err(TypesError::invalid(
                        "can not move the last members towards the end",
                    ))
                }
            }
        };
        let implicitly_moved: Vec<MemberId> = layout
            .iter()
            .filter(|member| !selected.contains(&member.id))
            .filter(|member| {
                let offset = member.bit_offset().unwrap_or(0);
                offset >= window_start && offset < window_end
            })
            .map(|member| member.id)
            .collect();

        Ok(MemberMoveResult {
            implicitly_moved,
            implicit_delta,
        })
    }

    fn apply_member_move(
        &mut self,
        parent: TypeId,
        selection: &[MemberId],
        delta: i64,
        plan: &MemberMoveResult,
    ) -> Result<()> {
        let selected: BTreeSet<MemberId> = selection.iter().copied().collect();
        for id in &plan.implicitly_moved {
            self.shift_offset(*id, plan.implicit_delta)?;
        }
        for id in &selected {
            self.shift_offset(*id, delta)?;
        }
        self.resort_members(parent)
    }

    fn shift_offset(&mut self, id: MemberId, delta: i64) -> Result<()> {
        let member = self.members.get_mut(&id).ok_or(TypesError::MemberNotFound(id))?;
        if let MemberPosition::Offset(offset) = member.position {
            member.position = MemberPosition::Offset(offset + delta);
        }
        Ok(())
    }

    /// Link `pointer` to point at `base`, one level above it.
    pub(crate) fn append_to_pointer_hierarchy(&mut self, base: TypeId, pointer: TypeId) -> Result<()> {
        if base == pointer {
            return Err(TypesError::invalid(
                "can not establish a pointer relation between identical types",
            ));
        }
        let pointer_type = self.base_type(pointer)?;
        if let Some(existing) = pointer_type.points_to() {
            return Err(TypesError::invalid(format!(
                "{} already points to {}",
                pointer, existing
            )));
        }
        let base_type = self.base_type(base)?;
        if let Some(existing) = base_type.pointed_to_by() {
            return Err(TypesError::invalid(format!(
                "{} is already pointed to by {}",
                base, existing
            )));
        }
        let mut current = base_type.points_to();
        let mut steps = 0;
        while let Some(target) = current {
            if target == pointer || steps > self.types.len() {
                return Err(TypesError::invalid(
                    "can not establish a circular pointer relation",
                ));
            }
            steps += 1;
            current = self.base_type(target)?.points_to();
        }
        self.base_type_mut(pointer)?.set_points_to(Some(base));
        self.base_type_mut(base)?.set_pointed_to_by(Some(pointer));
        Ok(())
    }

    fn resort_members(&mut self, parent: TypeId) -> Result<()> {
        let mut ids = std::mem::take(self.base_type_mut(parent)?.members_mut());
        let members = &self.members;
        ids.sort_by(|a, b| match (members.get(a), members.get(b)) {
            (Some(left), Some(right)) => left.layout_cmp(right),
            _ => a.cmp(b),
        });
        *self.base_type_mut(parent)?.members_mut() = ids;
        Ok(())
    }
}

fn check_position_matches(parent: &BaseType, position: &MemberPosition) -> Result<()> {
    let matches = matches!(
        (parent.category(), position),
        (BaseTypeCategory::Struct, MemberPosition::Offset(_))
            | (BaseTypeCategory::Union, MemberPosition::Offset(_))
            | (BaseTypeCategory::Array, MemberPosition::Elements(_))
            | (BaseTypeCategory::FunctionPrototype, MemberPosition::ArgumentIndex(_))
    );
    if matches {
        Ok(())
    } else {
        Err(TypesError::invalid(format!(
            "a member positioned {} can not be part of {}",
            position, parent
        )))
    }
}
