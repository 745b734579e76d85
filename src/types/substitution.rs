//! Type substitutions: operands displayed through a type.
//!
//! A substitution binds one operand of a disassembled instruction to a base
//! type, an optional member path and a bit offset, so the operand can be shown
//! as e.g. `DoubleNestedStruct.dns_int_member` instead of a raw displacement.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TypesError};
use crate::types::base_type::{normalize_array_name, BaseTypeCategory};
use crate::types::helpers::{descend, push_remainder};
use crate::types::ids::{MemberId, TypeId};
use crate::types::universe::TypeUniverse;

/// Location of an operand expression inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperandLocation {
    pub module_id: u32,
    /// Address of the instruction
    pub address: u64,
    /// Index of the operand inside the instruction
    pub position: u32,
    /// Node of the operand expression tree
    pub expression_id: u32,
}

impl OperandLocation {
    pub fn new(module_id: u32, address: u64, position: u32, expression_id: u32) -> Self {
        Self {
            module_id,
            address,
            position,
            expression_id,
        }
    }
}

impl fmt::Display for OperandLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x}:{}/{} (module {})",
            self.address, self.position, self.expression_id, self.module_id
        )
    }
}

/// Binding of an operand to a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSubstitution {
    pub location: OperandLocation,
    pub base_type: TypeId,
    /// Members from `base_type` to the leaf, possibly empty
    pub member_path: Vec<MemberId>,
    /// Bit offset relative to the leaf type of the path
    pub offset: i64,
}

impl TypeSubstitution {
    pub fn new(
        location: OperandLocation,
        base_type: TypeId,
        member_path: Vec<MemberId>,
        offset: i64,
    ) -> Result<Self> {
        if offset < 0 {
            return Err(TypesError::invalid("substitution offset can not be negative"));
        }
        Ok(Self {
            location,
            base_type,
            member_path,
            offset,
        })
    }

    /// The type the offset is relative to: the last path member's type, or the base type.
    pub fn leaf_type(&self, universe: &TypeUniverse) -> Result<TypeId> {
        match self.member_path.last() {
            Some(member) => Ok(universe.member(*member)?.base_type),
            None => Ok(self.base_type),
        }
    }

    /// Whether the substitution renders through `type_id`.
    pub fn references_type(&self, universe: &TypeUniverse, type_id: TypeId) -> bool {
        self.base_type == type_id
            || self.member_path.iter().any(|member| {
                universe
                    .member(*member)
                    .map(|member| member.base_type == type_id)
                    .unwrap_or(false)
            })
    }
}

/// Render the access path a substitution stands for, shifted by `extra_offset_bits`.
///
/// Offsets outside the leaf type are never rejected: they are rendered as a
/// `+N` or `-N` suffix on the closest thing the offset can be attached to.
pub fn generate_type_string(
    universe: &TypeUniverse,
    substitution: &TypeSubstitution,
    extra_offset_bits: i64,
) -> Result<String> {
    let base_type = universe.base_type(substitution.base_type)?;
    let mut rendered = match base_type.category() {
        BaseTypeCategory::Array if substitution.member_path.is_empty() => {
            normalize_array_name(base_type)?
        }
        _ => base_type.name().to_string(),
    };
    for member_id in &substitution.member_path {
        let member = universe.member(*member_id)?;
        if universe.base_type(member.parent)?.category().is_offset_category() {
            rendered.push('.');
            rendered.push_str(&member.name);
        }
    }

    let leaf = substitution.leaf_type(universe)?;
    let offset = substitution.offset + extra_offset_bits;
    match universe.base_type(leaf)?.category() {
        BaseTypeCategory::Atomic | BaseTypeCategory::Pointer | BaseTypeCategory::FunctionPrototype => {
            push_remainder(&mut rendered, offset);
        }
        BaseTypeCategory::Array | BaseTypeCategory::Struct | BaseTypeCategory::Union => {
            let descent = if offset >= 0 {
                descend(universe, leaf, offset)?
            } else {
                Default::default()
            };
            if descent.valid {
                rendered.push_str(&descent.suffix);
            } else {
                push_remainder(&mut rendered, offset);
            }
        }
    }
    Ok(rendered)
}
