//! Type members: the slots of compound base types.
//!
//! A member references its parent and its own type by id, and carries exactly
//! one positional attribute whose kind depends on the parent's category.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::types::ids::{MemberId, TypeId};

/// Positional attribute of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberPosition {
    /// Bit offset inside a struct or union
    Offset(i64),
    /// Element count of the synthetic array member
    Elements(i64),
    /// Zero-based index of a function prototype argument
    ArgumentIndex(i64),
}

impl MemberPosition {
    pub fn offset(&self) -> Option<i64> {
        match self {
            MemberPosition::Offset(offset) => Some(*offset),
            _ => None,
        }
    }

    pub fn number_of_elements(&self) -> Option<i64> {
        match self {
            MemberPosition::Elements(count) => Some(*count),
            _ => None,
        }
    }

    pub fn argument_index(&self) -> Option<i64> {
        match self {
            MemberPosition::ArgumentIndex(index) => Some(*index),
            _ => None,
        }
    }

    /// Tuple used to order members of one parent; absent values sort first.
    fn sort_key(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        (
            self.offset(),
            self.number_of_elements(),
            self.argument_index(),
        )
    }
}

impl fmt::Display for MemberPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberPosition::Offset(offset) => write!(f, "@{}", offset),
            MemberPosition::Elements(count) => write!(f, "[{}]", count),
            MemberPosition::ArgumentIndex(index) => write!(f, "arg{}", index),
        }
    }
}

/// One slot of a compound base type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMember {
    pub id: MemberId,
    pub name: String,
    /// Type of the slot
    pub base_type: TypeId,
    /// Compound type that owns the slot
    pub parent: TypeId,
    pub position: MemberPosition,
}

impl TypeMember {
    /// Member of a struct or union at the given bit offset.
    pub fn structure(
        id: MemberId,
        parent: TypeId,
        base_type: TypeId,
        name: impl Into<String>,
        offset: i64,
    ) -> crate::Result<Self> {
        if offset < 0 {
            return Err(crate::TypesError::invalid("member offset can not be negative"));
        }
        Self::build(id, parent, base_type, name, MemberPosition::Offset(offset))
    }

    /// Synthetic element member of an array type.
    pub fn array(
        id: MemberId,
        parent: TypeId,
        base_type: TypeId,
        name: impl Into<String>,
        number_of_elements: i64,
    ) -> crate::Result<Self> {
        if number_of_elements < 0 {
            return Err(crate::TypesError::invalid(
                "number of elements can not be negative",
            ));
        }
        Self::build(
            id,
            parent,
            base_type,
            name,
            MemberPosition::Elements(number_of_elements),
        )
    }

    /// Argument of a function prototype.
    pub fn function_prototype(
        id: MemberId,
        parent: TypeId,
        base_type: TypeId,
        name: impl Into<String>,
        argument_index: i64,
    ) -> crate::Result<Self> {
        if argument_index < 0 {
            return Err(crate::TypesError::invalid(
                "argument index can not be negative",
            ));
        }
        Self::build(
            id,
            parent,
            base_type,
            name,
            MemberPosition::ArgumentIndex(argument_index),
        )
    }

    fn build(
        id: MemberId,
        parent: TypeId,
        base_type: TypeId,
        name: impl Into<String>,
        position: MemberPosition,
    ) -> crate::Result<Self> {
        if parent == base_type {
            return Err(crate::TypesError::CyclicDeclaration {
                parent,
                member: base_type,
            });
        }
        Ok(Self {
            id,
            name: name.into(),
            base_type,
            parent,
            position,
        })
    }

    pub fn bit_offset(&self) -> Option<i64> {
        self.position.offset()
    }

    pub fn number_of_elements(&self) -> Option<i64> {
        self.position.number_of_elements()
    }

    pub fn argument_index(&self) -> Option<i64> {
        self.position.argument_index()
    }

    /// Natural order of members inside their parent.
    pub fn layout_cmp(&self, other: &TypeMember) -> Ordering {
        self.position
            .sort_key()
            .cmp(&other.position.sort_key())
            .then(self.id.cmp(&other.id))
    }
}

impl fmt::Display for TypeMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.position, self.id)
    }
}
