//! Containment graph between base types.
//!
//! Every member of a compound type contributes one edge from the member's type
//! to the parent. The graph answers two questions for the type manager: would
//! a new member create a cyclic declaration, and which types change when a
//! type or member changes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::types::ids::TypeId;
use crate::types::universe::TypeUniverse;

/// Outcome of a graph update
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependenceResult {
    /// False if the update was rejected because it would create a cycle
    pub valid: bool,
    /// Types whose layout may have changed, including the updated type itself
    pub affected_types: BTreeSet<TypeId>,
}

impl DependenceResult {
    /// A rejected update
    pub fn invalid() -> Self {
        Self {
            valid: false,
            affected_types: BTreeSet::new(),
        }
    }

    /// An accepted update touching the given types
    pub fn valid(affected_types: BTreeSet<TypeId>) -> Self {
        Self {
            valid: true,
            affected_types,
        }
    }
}

/// Graph of "is contained in" relations between types.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeDependenceGraph {
    /// Member type to parent types, one entry per member
    contained_in: BTreeMap<TypeId, Vec<TypeId>>,
    /// Parent type to member types, one entry per member
    contains: BTreeMap<TypeId, Vec<TypeId>>,
}

impl TypeDependenceGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for all types and members of a universe.
    ///
    /// Returns `None` if the universe contains a cyclic declaration.
    pub fn from_universe(universe: &TypeUniverse) -> Option<Self> {
        let mut graph = Self::new();
        for base_type in universe.types() {
            graph.add_type(base_type.id());
        }
        for member in universe.all_members() {
            if !graph.add_member(member.parent, member.base_type).valid {
                return None;
            }
        }
        Some(graph)
    }

    /// Add a type node without edges
    pub fn add_type(&mut self, type_id: TypeId) {
        self.contained_in.entry(type_id).or_default();
        self.contains.entry(type_id).or_default();
    }

    /// Check whether a type node exists
    pub fn contains_type(&self, type_id: TypeId) -> bool {
        self.contains.contains_key(&type_id)
    }

    /// Add the edge for a new member of type `member_type` inside `parent`.
    pub fn add_member(&mut self, parent: TypeId, member_type: TypeId) -> DependenceResult {
        if self.will_create_cycle(parent, member_type) {
            return DependenceResult::invalid();
        }
        self.add_type(parent);
        self.add_type(member_type);
        self.insert_edge(parent, member_type);
        DependenceResult::valid(self.with_dependents(parent))
    }

    /// Remove one edge for a deleted member of type `member_type` inside `parent`.
    pub fn delete_member(&mut self, parent: TypeId, member_type: TypeId) -> BTreeSet<TypeId> {
        let affected = self.with_dependents(parent);
        self.remove_edge(parent, member_type);
        affected
    }

    /// Replace the edge of a member whose type changed from `old_type` to `new_type`.
    pub fn update_member(
        &mut self,
        parent: TypeId,
        old_type: TypeId,
        new_type: TypeId,
    ) -> DependenceResult {
        if old_type != new_type {
            if self.will_create_cycle(parent, new_type) {
                return DependenceResult::invalid();
            }
            self.remove_edge(parent, old_type);
            self.add_type(new_type);
            self.insert_edge(parent, new_type);
        }
        DependenceResult::valid(self.with_dependents(parent))
    }

    /// Types affected by a change to `type_id` itself, e.g. a new size.
    pub fn update_type(&self, type_id: TypeId) -> BTreeSet<TypeId> {
        self.with_dependents(type_id)
    }

    /// Remove a type node and all its edges.
    ///
    /// Returns the type together with every type that contained it before the
    /// removal.
    pub fn delete_type(&mut self, type_id: TypeId) -> BTreeSet<TypeId> {
        let affected = self.with_dependents(type_id);
        if let Some(parents) = self.contained_in.remove(&type_id) {
            for parent in parents {
                if let Some(children) = self.contains.get_mut(&parent) {
                    children.retain(|child| *child != type_id);
                }
            }
        }
        if let Some(children) = self.contains.remove(&type_id) {
            for child in children {
                if let Some(parents) = self.contained_in.get_mut(&child) {
                    parents.retain(|parent| *parent != type_id);
                }
            }
        }
        affected
    }

    /// Check if `candidate` is contained in `container`, directly or through
    /// nested members.
    pub fn is_type_contained_in(&self, container: TypeId, candidate: TypeId) -> bool {
        self.determine_dependent_types(candidate).contains(&container)
    }

    /// Check if adding a member of type `member_type` to `parent` would make a
    /// type contain itself.
    pub fn will_create_cycle(&self, parent: TypeId, member_type: TypeId) -> bool {
        parent == member_type || self.is_type_contained_in(member_type, parent)
    }

    /// All types that transitively contain `type_id`, excluding `type_id`.
    pub fn determine_dependent_types(&self, type_id: TypeId) -> BTreeSet<TypeId> {
        let mut dependents = BTreeSet::new();
        let mut queue = VecDeque::from([type_id]);
        while let Some(current) = queue.pop_front() {
            for parent in self.parents(current) {
                if dependents.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        dependents.remove(&type_id);
        dependents
    }

    /// Direct containers of a type, one entry per member
    pub fn parents(&self, type_id: TypeId) -> &[TypeId] {
        self.contained_in
            .get(&type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Direct member types of a type, one entry per member
    pub fn children(&self, type_id: TypeId) -> &[TypeId] {
        self.contains
            .get(&type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Get the number of type nodes
    pub fn type_count(&self) -> usize {
        self.contains.len()
    }

    /// Get the number of containment edges
    pub fn edge_count(&self) -> usize {
        self.contains.values().map(Vec::len).sum()
    }

    fn with_dependents(&self, type_id: TypeId) -> BTreeSet<TypeId> {
        let mut affected = self.determine_dependent_types(type_id);
        affected.insert(type_id);
        affected
    }

    fn insert_edge(&mut self, parent: TypeId, member_type: TypeId) {
        self.contained_in.entry(member_type).or_default().push(parent);
        self.contains.entry(parent).or_default().push(member_type);
    }

    fn remove_edge(&mut self, parent: TypeId, member_type: TypeId) {
        if let Some(parents) = self.contained_in.get_mut(&member_type) {
            if let Some(index) = parents.iter().position(|p| *p == parent) {
                parents.remove(index);
            }
        }
        if let Some(children) = self.contains.get_mut(&parent) {
            if let Some(index) = children.iter().position(|c| *c == member_type) {
                children.remove(index);
            }
        }
    }
}
