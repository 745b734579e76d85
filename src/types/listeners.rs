//! Change notification for the type system.
//!
//! Listeners are registered with the type manager and called synchronously
//! after a mutation has been applied. A listener must not call back into the
//! manager from a callback.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::types::base_type::BaseType;
use crate::types::ids::{InstanceId, MemberId, TypeId};
use crate::types::member::TypeMember;
use crate::types::substitution::{OperandLocation, TypeSubstitution};

/// Receives changes to base types and members.
///
/// All methods default to doing nothing so implementors only override what
/// they care about.
pub trait TypeChangedListener {
    fn type_added(&mut self, _base_type: &BaseType) {}
    fn type_deleted(&mut self, _base_type: &BaseType) {}
    /// Types whose name, size or layout changed
    fn types_updated(&mut self, _types: &BTreeSet<TypeId>) {}
    fn member_added(&mut self, _member: &TypeMember) {}
    fn member_deleted(&mut self, _member: &TypeMember) {}
    fn member_updated(&mut self, _member: &TypeMember) {}
    /// Members of a struct were moved; the set holds every affected type
    fn members_moved(&mut self, _types: &BTreeSet<TypeId>) {}
}

/// Receives changes to type substitutions.
pub trait TypeSubstitutionChangedListener {
    fn substitutions_added(&mut self, _substitutions: &[TypeSubstitution]) {}
    fn substitutions_changed(&mut self, _substitutions: &[TypeSubstitution]) {}
    fn substitutions_deleted(&mut self, _substitutions: &[TypeSubstitution]) {}
}

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered list of listeners; notification follows registration order.
pub struct ListenerRegistry<L: ?Sized> {
    next_id: u64,
    listeners: Vec<(ListenerId, Box<L>)>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Box<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false if no listener was registered under `id`.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&mut self, mut callback: impl FnMut(&mut L)) {
        for (_, listener) in self.listeners.iter_mut() {
            callback(listener.as_mut());
        }
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A recorded notification, in a form that is easy to compare in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeEvent {
    TypeAdded(TypeId),
    TypeDeleted(TypeId),
    TypesUpdated(BTreeSet<TypeId>),
    MemberAdded(MemberId),
    MemberDeleted(MemberId),
    MemberUpdated(MemberId),
    MembersMoved(BTreeSet<TypeId>),
    SubstitutionsAdded(Vec<OperandLocation>),
    SubstitutionsChanged(Vec<OperandLocation>),
    SubstitutionsDeleted(Vec<OperandLocation>),
    InstanceAdded(InstanceId),
    InstanceRemoved(InstanceId),
    InstanceChanged(InstanceId),
    ReferenceAdded(OperandLocation),
    ReferenceRemoved(OperandLocation),
    ReferenceChanged(OperandLocation),
}

/// Listener that records every notification into a shared log.
///
/// Clones share the log, so a test keeps one clone and registers another.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<TypeEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TypeEvent> {
        self.events.borrow().clone()
    }

    /// Return the recorded events and start over.
    pub fn take(&self) -> Vec<TypeEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn count(&self, predicate: impl Fn(&TypeEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|event| predicate(event)).count()
    }

    pub(crate) fn record(&self, event: TypeEvent) {
        self.events.borrow_mut().push(event);
    }
}

fn locations(substitutions: &[TypeSubstitution]) -> Vec<OperandLocation> {
    substitutions.iter().map(|s| s.location).collect()
}

impl TypeChangedListener for EventRecorder {
    fn type_added(&mut self, base_type: &BaseType) {
        self.record(TypeEvent::TypeAdded(base_type.id()));
    }

    fn type_deleted(&mut self, base_type: &BaseType) {
        self.record(TypeEvent::TypeDeleted(base_type.id()));
    }

    fn types_updated(&mut self, types: &BTreeSet<TypeId>) {
        self.record(TypeEvent::TypesUpdated(types.clone()));
    }

    fn member_added(&mut self, member: &TypeMember) {
        self.record(TypeEvent::MemberAdded(member.id));
    }

    fn member_deleted(&mut self, member: &TypeMember) {
        self.record(TypeEvent::MemberDeleted(member.id));
    }

    fn member_updated(&mut self, member: &TypeMember) {
        self.record(TypeEvent::MemberUpdated(member.id));
    }

    fn members_moved(&mut self, types: &BTreeSet<TypeId>) {
        self.record(TypeEvent::MembersMoved(types.clone()));
    }
}

impl TypeSubstitutionChangedListener for EventRecorder {
    fn substitutions_added(&mut self, substitutions: &[TypeSubstitution]) {
        self.record(TypeEvent::SubstitutionsAdded(locations(substitutions)));
    }

    fn substitutions_changed(&mut self, substitutions: &[TypeSubstitution]) {
        self.record(TypeEvent::SubstitutionsChanged(locations(substitutions)));
    }

    fn substitutions_deleted(&mut self, substitutions: &[TypeSubstitution]) {
        self.record(TypeEvent::SubstitutionsDeleted(locations(substitutions)));
    }
}
