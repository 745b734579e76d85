//! Offset resolution inside compound types.
//!
//! Given a type and a bit offset, these helpers find the innermost member the
//! offset falls into and render a C-like access path such as
//! `SimpleStruct.ss_array_member[1]`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};
use crate::types::base_type::{normalize_array_name, BaseTypeCategory};
use crate::types::ids::{MemberId, TypeId};
use crate::types::universe::TypeUniverse;

/// Result of resolving a bit offset inside a type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalkResult {
    pub is_valid: bool,
    /// Innermost member the offset falls into
    pub member: Option<MemberId>,
    /// Members traversed from the outermost type to `member`
    pub path: Vec<MemberId>,
    pub path_string: String,
}

impl WalkResult {
    fn invalid() -> Self {
        Self::default()
    }
}

/// Relative part of a walk, without the name of the type it started at.
#[derive(Debug, Default)]
pub(crate) struct Descent {
    pub valid: bool,
    pub member: Option<MemberId>,
    pub path: Vec<MemberId>,
    pub suffix: String,
}

/// Find the member located at `bit_offset` inside `type_id`.
///
/// Atomic, pointer and prototype types never contain a member. Array offsets
/// past the last element still resolve, with the overshoot as index and a
/// `+N` remainder.
pub fn find_member(universe: &TypeUniverse, type_id: TypeId, bit_offset: i64) -> Result<WalkResult> {
    let base_type = universe.base_type(type_id)?;
    if bit_offset < 0 {
        return Ok(WalkResult::invalid());
    }
    let root_name = match base_type.category() {
        BaseTypeCategory::Atomic | BaseTypeCategory::Pointer | BaseTypeCategory::FunctionPrototype => {
            return Ok(WalkResult::invalid())
        }
        BaseTypeCategory::Array => normalize_array_name(base_type)?,
        BaseTypeCategory::Struct | BaseTypeCategory::Union => base_type.name().to_string(),
    };
    let descent = descend(universe, type_id, bit_offset)?;
    if !descent.valid {
        return Ok(WalkResult::invalid());
    }
    Ok(WalkResult {
        is_valid: true,
        member: descent.member,
        path: descent.path,
        path_string: format!("{}{}", root_name, descent.suffix),
    })
}

/// Resolve `bit_offset` relative to the start of `type_id`.
///
/// Struct and union offsets must fall into a member. Leaf members and array
/// elements take any remainder as a `+N` suffix.
pub(crate) fn descend(universe: &TypeUniverse, type_id: TypeId, bit_offset: i64) -> Result<Descent> {
    let mut descent = Descent::default();
    let mut current = type_id;
    let mut offset = bit_offset;
    loop {
        let base_type = universe.base_type(current)?;
        match base_type.category() {
            BaseTypeCategory::Atomic
            | BaseTypeCategory::Pointer
            | BaseTypeCategory::FunctionPrototype => {
                push_remainder(&mut descent.suffix, offset);
                descent.valid = descent.member.is_some();
                return Ok(descent);
            }
            BaseTypeCategory::Array => {
                let element = match universe.last_member(current)? {
                    Some(element) => element,
                    None => return Ok(Descent::default()),
                };
                let element_size = universe.bit_size(element.base_type)?;
                if element_size == 0 {
                    return Ok(Descent::default());
                }
                let index = offset.div_euclid(element_size);
                let remainder = offset.rem_euclid(element_size);
                descent.suffix.push_str(&format!("[{}]", index));
                if descent.member.is_none() {
                    descent.path.push(element.id);
                    descent.member = Some(element.id);
                }
                let element_category = universe.base_type(element.base_type)?.category();
                if remainder != 0 && element_category.is_offset_category() {
                    current = element.base_type;
                    offset = remainder;
                    continue;
                }
                push_remainder(&mut descent.suffix, remainder);
                descent.valid = true;
                return Ok(descent);
            }
            BaseTypeCategory::Struct | BaseTypeCategory::Union => {
                let mut containing = None;
                for member in universe.members(current)? {
                    let start = member.bit_offset().unwrap_or(0);
                    let end = start + universe.bit_size(member.base_type)?;
                    if start <= offset && offset < end {
                        containing = Some(member);
                        break;
                    }
                }
                let member = match containing {
                    Some(member) => member,
                    None => return Ok(Descent::default()),
                };
                descent.path.push(member.id);
                descent.member = Some(member.id);
                descent.suffix.push('.');
                descent.suffix.push_str(&member.name);
                offset -= member.bit_offset().unwrap_or(0);
                current = member.base_type;
            }
        }
    }
}

pub(crate) fn push_remainder(suffix: &mut String, remainder: i64) {
    if remainder > 0 {
        suffix.push_str(&format!("+{}", remainder));
    } else if remainder < 0 {
        suffix.push_str(&format!("-{}", -remainder));
    }
}

/// Size of one array element in bytes.
pub fn get_array_element_byte_size(universe: &TypeUniverse, type_id: TypeId) -> Result<i64> {
    let base_type = universe.base_type(type_id)?;
    if base_type.category() != BaseTypeCategory::Array {
        return Err(TypesError::invalid(format!("{} is not an array type", base_type)));
    }
    match universe.last_member(type_id)? {
        Some(element) => universe.byte_size(element.base_type),
        None => Err(TypesError::invalid(format!("{} has no element member", base_type))),
    }
}

/// Check that `bit_offset` is exactly the start of a leaf member or of an
/// in-range array element of `type_id`.
pub fn is_valid_offset(universe: &TypeUniverse, type_id: TypeId, bit_offset: i64) -> Result<bool> {
    if bit_offset < 0 {
        return Ok(false);
    }
    let mut current = type_id;
    let mut offset = bit_offset;
    loop {
        match universe.base_type(current)?.category() {
            BaseTypeCategory::Atomic
            | BaseTypeCategory::Pointer
            | BaseTypeCategory::FunctionPrototype => return Ok(offset == 0),
            BaseTypeCategory::Array => {
                let element = match universe.last_member(current)? {
                    Some(element) => element,
                    None => return Ok(false),
                };
                let element_size = universe.bit_size(element.base_type)?;
                if element_size == 0 {
                    return Ok(false);
                }
                if offset / element_size >= element.number_of_elements().unwrap_or(0) {
                    return Ok(false);
                }
                current = element.base_type;
                offset %= element_size;
            }
            BaseTypeCategory::Struct | BaseTypeCategory::Union => {
                let mut next = None;
                for member in universe.members(current)? {
                    let start = member.bit_offset().unwrap_or(0);
                    if start <= offset && offset < start + universe.bit_size(member.base_type)? {
                        next = Some((member.base_type, offset - start));
                        break;
                    }
                }
                match next {
                    Some((member_type, relative)) => {
                        current = member_type;
                        offset = relative;
                    }
                    None => return Ok(false),
                }
            }
        }
    }
}
