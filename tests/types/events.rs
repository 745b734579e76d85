use glaurung_types::types::{EventRecorder, TypeEvent};
use glaurung_types::TypesError;

use crate::common::TestTypeSystem;

#[test]
fn test_create_types_notifies_once_each() {
    let mut ts = TestTypeSystem::new();
    let long = ts.manager.create_atomic_type("long", 64, true).unwrap();
    let record = ts.manager.create_structure("Record").unwrap();
    let variant = ts.manager.create_union("Variant").unwrap();
    let array = ts.manager.create_array(long, 2).unwrap();
    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::TypeAdded(long),
            TypeEvent::TypeAdded(record),
            TypeEvent::TypeAdded(variant),
            TypeEvent::TypeAdded(array),
        ]
    );
    assert_eq!(ts.manager.get_base_type(array).unwrap().name(), "long[2]");
    assert_eq!(ts.size(array), 128);
}

#[test]
fn test_empty_names_and_sizes_rejected() {
    let mut ts = TestTypeSystem::new();
    assert!(ts.manager.create_atomic_type("", 8, false).is_err());
    assert!(ts.manager.create_atomic_type("byte", -8, false).is_err());
    assert!(ts.manager.create_structure("").is_err());
    assert!(ts.manager.create_array(ts.int_type, 0).is_err());
    assert!(ts.manager.append_member(ts.simple_struct, ts.int_type, "").is_err());
    assert!(ts.events.events().is_empty());
}

#[test]
fn test_pointer_types_are_shared() {
    let mut ts = TestTypeSystem::new();
    assert_eq!(ts.manager.create_pointer_type(ts.uint_type).unwrap(), ts.uint_pointer);
    let double = ts.manager.create_pointer_type(ts.uint_pointer).unwrap();
    assert_eq!(ts.manager.get_base_type(double).unwrap().name(), "unsigned int **");
    assert_eq!(ts.manager.universe().value_type(double).unwrap(), ts.uint_type);
    assert_eq!(ts.size(double), 32);
    assert_eq!(ts.events.events(), vec![TypeEvent::TypeAdded(double)]);
}

#[test]
fn test_delete_type_removes_referencing_members() {
    let mut ts = TestTypeSystem::new();
    assert!(ts.manager.delete_type(ts.int_type).unwrap());
    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::MemberDeleted(ts.ss_int),
            TypeEvent::MemberDeleted(ts.ns_int),
            TypeEvent::MemberDeleted(ts.dns_int),
            TypeEvent::MemberDeleted(ts.su_int),
            TypeEvent::MemberDeleted(ts.cu_int),
            TypeEvent::TypeDeleted(ts.int_type),
        ]
    );
    assert!(ts.manager.get_base_type(ts.int_type).is_err());
    assert!(ts.manager.get_member(ts.ss_int).is_err());
    assert!(ts.backend.raw_type(ts.int_type).is_none());
    assert!(ts.backend.raw_member(ts.dns_int).is_none());
    // the gap is kept
    assert_eq!(ts.offset(ts.ss_uint), 32);
    assert_eq!(ts.offset(ts.dns_pointer), 448);
}

#[test]
fn test_delete_type_refused_while_pointed_to() {
    let mut ts = TestTypeSystem::new();
    assert!(!ts.manager.delete_type(ts.uint_type).unwrap());
    assert!(ts.manager.get_base_type(ts.uint_type).is_ok());
    assert!(ts.events.events().is_empty());

    assert!(ts.manager.delete_type(ts.uint_pointer).unwrap());
    assert!(ts.manager.get_member(ts.dns_pointer).is_err());
    assert_eq!(ts.manager.get_base_type(ts.uint_type).unwrap().pointed_to_by(), None);
    assert!(ts.manager.delete_type(ts.uint_type).unwrap());
}

#[test]
fn test_delete_compound_type_drops_its_members() {
    let mut ts = TestTypeSystem::new();
    assert!(ts.manager.delete_type(ts.complex_union).unwrap());
    assert!(ts.manager.get_member(ts.cu_int).is_err());
    assert!(ts.manager.get_member(ts.cu_double_nested_struct).is_err());
    assert!(!ts
        .manager
        .dependence_graph()
        .parents(ts.double_nested_struct)
        .contains(&ts.complex_union));
}

#[test]
fn test_cyclic_declarations_rejected() {
    let mut ts = TestTypeSystem::new();
    let err = ts
        .manager
        .append_member(ts.simple_struct, ts.double_nested_struct, "cycle")
        .unwrap_err();
    assert!(matches!(err, TypesError::CyclicDeclaration { .. }));
    assert!(ts
        .manager
        .create_union_member(ts.simple_union, ts.simple_union, "self")
        .is_err());
    assert!(ts
        .manager
        .update_structure_member(ts.ss_uint, ts.nested_struct, "ss_uint", 32)
        .is_err());
    assert!(ts.events.events().is_empty());
    ts.assert_backend_in_sync();
}

#[test]
fn test_wrong_parent_category_rejected() {
    let mut ts = TestTypeSystem::new();
    assert!(ts
        .manager
        .create_structure_member(ts.simple_union, ts.int_type, "x", 0)
        .is_err());
    assert!(ts.manager.create_union_member(ts.simple_struct, ts.int_type, "x").is_err());
    assert!(ts.manager.append_member(ts.int_type, ts.int_type, "x").is_err());
    assert!(ts
        .manager
        .create_function_prototype_member(ts.simple_struct, ts.int_type, "x", 0)
        .is_err());
}

#[test]
fn test_removed_listener_is_silent() {
    let mut ts = TestTypeSystem::new();
    let second = EventRecorder::new();
    let id = ts.manager.add_listener(Box::new(second.clone()));
    ts.manager.create_structure("Observed").unwrap();
    assert!(ts.manager.remove_listener(id));
    assert!(!ts.manager.remove_listener(id));
    ts.manager.create_structure("Unobserved").unwrap();
    assert_eq!(second.events().len(), 1);
    assert_eq!(ts.events.events().len(), 2);
}

#[test]
fn test_prototype_arguments() {
    let mut ts = TestTypeSystem::new();
    let argc = ts.manager.append_member(ts.void_prototype, ts.int_type, "argc").unwrap();
    let argv = ts
        .manager
        .append_member(ts.void_prototype, ts.uint_pointer, "argv")
        .unwrap();
    assert_eq!(ts.manager.get_member(argc).unwrap().argument_index(), Some(0));
    assert_eq!(ts.manager.get_member(argv).unwrap().argument_index(), Some(1));
    assert_eq!(ts.size(ts.void_prototype), 0);
    assert!(ts.manager.is_contained_in(ts.void_prototype, ts.int_type));

    // growing an argument type does not touch the prototype layout
    ts.manager.update_type(ts.int_type, "int", 64, true).unwrap();
    assert_eq!(ts.manager.get_member(argc).unwrap().argument_index(), Some(0));
    assert_eq!(ts.size(ts.void_prototype), 0);
}
