//! C type modeling: base types, members, the dependence graph between them,
//! and the manager that keeps all of it consistent.

pub mod backend;
pub mod base_type;
pub mod dependence;
pub mod helpers;
pub mod ids;
pub mod instance;
pub mod listeners;
pub mod manager;
pub mod member;
pub mod section;
pub mod substitution;
pub mod universe;

pub use backend::{InMemoryTypeBackend, TypeManagerBackend, TypeSystemSnapshot};
pub use base_type::{BaseType, BaseTypeCategory};
pub use dependence::{DependenceResult, TypeDependenceGraph};
pub use ids::{InstanceId, MemberId, SectionId, TypeId};
pub use listeners::{EventRecorder, TypeChangedListener, TypeEvent, TypeSubstitutionChangedListener};
pub use manager::TypeManager;
pub use member::{MemberPosition, TypeMember};
pub use substitution::{OperandLocation, TypeSubstitution};
pub use universe::{MemberMoveResult, TypeUniverse};
