//! Base types: the named, sized nodes of the type universe.
//!
//! A base type only stores what belongs to itself. Anything that needs other
//! types to answer (derived sizes, member order, pointer levels) is computed by
//! [`crate::types::universe::TypeUniverse`], which owns every type and member.

#[cfg(feature = "python-ext")]
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TypesError};
use crate::types::ids::{MemberId, TypeId};

/// The category of a base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "python-ext", pyclass(eq, eq_int))]
pub enum BaseTypeCategory {
    /// Primitive types like int, char or float
    Atomic,
    /// Pointer to another type
    Pointer,
    /// Fixed-size array with a single synthetic element member
    Array,
    /// C-style struct with members at bit offsets
    Struct,
    /// C-style union, all members at offset zero
    Union,
    /// Function signature, members are the arguments
    FunctionPrototype,
}

impl BaseTypeCategory {
    pub fn value(&self) -> &str {
        match self {
            BaseTypeCategory::Atomic => "atomic",
            BaseTypeCategory::Pointer => "pointer",
            BaseTypeCategory::Array => "array",
            BaseTypeCategory::Struct => "struct",
            BaseTypeCategory::Union => "union",
            BaseTypeCategory::FunctionPrototype => "function_prototype",
        }
    }

    /// Categories whose members are placed at bit offsets.
    pub fn is_offset_category(&self) -> bool {
        matches!(self, BaseTypeCategory::Struct | BaseTypeCategory::Union)
    }

    /// Categories that own members at all.
    pub fn is_compound(&self) -> bool {
        !matches!(self, BaseTypeCategory::Atomic | BaseTypeCategory::Pointer)
    }

    /// Categories whose size is stored rather than derived from members.
    pub fn has_explicit_size(&self) -> bool {
        matches!(self, BaseTypeCategory::Atomic | BaseTypeCategory::Pointer)
    }
}

impl fmt::Display for BaseTypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A named, sized type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseType {
    id: TypeId,
    name: String,
    /// Size in bits as stored; only authoritative for atomic, pointer and prototype types
    stored_bit_size: i64,
    signed: bool,
    category: BaseTypeCategory,
    /// Member ids in layout order, maintained by the universe
    members: Vec<MemberId>,
    points_to: Option<TypeId>,
    pointed_to_by: Option<TypeId>,
    is_stack_frame: bool,
}

impl BaseType {
    /// Create a new base type without members or pointer links.
    pub fn new(
        id: TypeId,
        name: impl Into<String>,
        bit_size: i64,
        signed: bool,
        category: BaseTypeCategory,
    ) -> Result<Self> {
        let name = name.into();
        if id.0 == 0 {
            return Err(TypesError::invalid("type id must be positive"));
        }
        if name.is_empty() {
            return Err(TypesError::invalid("type name can not be empty"));
        }
        if bit_size < 0 {
            return Err(TypesError::invalid("type size can not be negative"));
        }
        Ok(Self {
            id,
            name,
            stored_bit_size: bit_size,
            signed,
            category,
            members: Vec::new(),
            points_to: None,
            pointed_to_by: None,
            is_stack_frame: false,
        })
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn category(&self) -> BaseTypeCategory {
        self.category
    }

    /// The stored size; use the universe for the effective size of compound types.
    pub fn stored_bit_size(&self) -> i64 {
        self.stored_bit_size
    }

    /// Member ids in layout order.
    pub fn member_ids(&self) -> &[MemberId] {
        &self.members
    }

    pub fn points_to(&self) -> Option<TypeId> {
        self.points_to
    }

    pub fn pointed_to_by(&self) -> Option<TypeId> {
        self.pointed_to_by
    }

    pub fn is_stack_frame(&self) -> bool {
        self.is_stack_frame
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypesError::invalid("type name can not be empty"));
        }
        self.name = name;
        Ok(())
    }

    pub(crate) fn set_signed(&mut self, signed: bool) {
        self.signed = signed;
    }

    pub(crate) fn set_stack_frame(&mut self, is_stack_frame: bool) {
        self.is_stack_frame = is_stack_frame;
    }

    /// Set the size of an atomic or pointer type; other sizes are derived.
    pub(crate) fn set_size(&mut self, bit_size: i64) -> Result<()> {
        if bit_size < 0 {
            return Err(TypesError::invalid("type size can not be negative"));
        }
        if !self.category.has_explicit_size() {
            return Err(TypesError::invalid(format!(
                "can not set the size of {} type '{}'",
                self.category, self.name
            )));
        }
        self.stored_bit_size = bit_size;
        Ok(())
    }

    pub(crate) fn members_mut(&mut self) -> &mut Vec<MemberId> {
        &mut self.members
    }

    pub(crate) fn set_points_to(&mut self, target: Option<TypeId>) {
        self.points_to = target;
    }

    pub(crate) fn set_pointed_to_by(&mut self, pointer: Option<TypeId>) {
        self.pointed_to_by = pointer;
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.category, self.name, self.id)
    }
}

/// Name of an array type with the given element type name and count.
pub fn build_array_name(element_name: &str, number_of_elements: i64) -> String {
    format!("{}[{}]", element_name, number_of_elements)
}

/// Strip the element count from an array name, e.g. `array_one[123]` to `array_one`.
pub fn normalize_array_name(array_type: &BaseType) -> Result<String> {
    if array_type.category() != BaseTypeCategory::Array {
        return Err(TypesError::invalid(format!(
            "'{}' is not an array type",
            array_type.name()
        )));
    }
    Ok(array_type
        .name()
        .split('[')
        .next()
        .unwrap_or_default()
        .to_string())
}
