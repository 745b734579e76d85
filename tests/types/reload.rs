//! A second manager over the same store stands in for another client; the
//! fixture manager then replays its changes through the reload operations.

use glaurung_types::types::backend::RawTypeSubstitution;
use glaurung_types::types::{OperandLocation, TypeEvent, TypeManager};

use crate::common::TestTypeSystem;

fn other_client(ts: &TestTypeSystem) -> TypeManager {
    TypeManager::new(ts.backend.clone()).unwrap()
}

#[test]
fn test_other_client_sees_same_layout() {
    let ts = TestTypeSystem::new();
    let other = other_client(&ts);
    assert_eq!(other.get_types().len(), 10);
    assert_eq!(other.universe().bit_size(ts.double_nested_struct).unwrap(), 480);
    assert_eq!(
        other.get_base_type(ts.uint_type).unwrap().pointed_to_by(),
        Some(ts.uint_pointer)
    );
    assert!(other.is_contained_in(ts.complex_union, ts.simple_struct));
}

#[test]
fn test_load_new_type_and_member() {
    let mut ts = TestTypeSystem::new();
    let mut other = other_client(&ts);
    let record = other.create_structure("Record").unwrap();
    let field = other.append_member(record, ts.simple_union, "payload").unwrap();

    ts.manager.load_and_initialize_base_type(record).unwrap();
    ts.manager.load_and_initialize_type_member(field).unwrap();

    assert_eq!(ts.manager.get_base_type(record).unwrap().name(), "Record");
    assert_eq!(ts.size(record), 32);
    assert!(ts.manager.is_contained_in(record, ts.int_type));
    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::TypeAdded(record),
            TypeEvent::MemberAdded(field),
            TypeEvent::TypesUpdated([record].into_iter().collect()),
        ]
    );
    // loading twice is an error, not a duplicate
    assert!(ts.manager.load_and_initialize_base_type(record).is_err());
}

#[test]
fn test_load_updated_type() {
    let mut ts = TestTypeSystem::new();
    let mut other = other_client(&ts);
    other.update_type(ts.uint_type, "uint32_t", 32, false).unwrap();

    ts.manager.load_and_update_base_type(ts.uint_type).unwrap();
    assert_eq!(ts.manager.get_base_type(ts.uint_type).unwrap().name(), "uint32_t");
    assert!(matches!(ts.events.events().first(), Some(TypeEvent::TypesUpdated(types)) if types.contains(&ts.simple_struct)));
}

#[test]
fn test_load_updated_member() {
    let mut ts = TestTypeSystem::new();
    let mut other = other_client(&ts);
    other
        .update_union_member(ts.su_uint, ts.uint_pointer, "su_pointer")
        .unwrap();

    ts.manager.load_and_update_type_member(ts.su_uint).unwrap();
    let member = ts.manager.get_member(ts.su_uint).unwrap();
    assert_eq!(member.name, "su_pointer");
    assert_eq!(member.base_type, ts.uint_pointer);
    assert!(ts.manager.is_contained_in(ts.simple_union, ts.uint_pointer));
    assert!(!ts.manager.is_contained_in(ts.simple_union, ts.uint_type));
    assert_eq!(ts.events.events().first(), Some(&TypeEvent::MemberUpdated(ts.su_uint)));
}

#[test]
fn test_remove_instances_locally() {
    let mut ts = TestTypeSystem::new();
    ts.manager.remove_member_instance(ts.cu_int).unwrap();
    assert!(ts.manager.get_member(ts.cu_int).is_err());
    // the stored row is left alone
    assert!(ts.backend.raw_member(ts.cu_int).is_some());

    ts.manager.remove_base_type_instance(ts.simple_union).unwrap();
    assert!(ts.manager.get_base_type(ts.simple_union).is_err());
    assert!(ts.backend.raw_type(ts.simple_union).is_some());
    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::TypesUpdated([ts.complex_union].into_iter().collect()),
            TypeEvent::MemberDeleted(ts.cu_int),
            TypeEvent::TypeDeleted(ts.simple_union),
        ]
    );
}

#[test]
fn test_substitution_reload() {
    let mut ts = TestTypeSystem::new();
    let location = OperandLocation::new(1, 0x4000, 1, 3);
    let raw = RawTypeSubstitution::new(location, ts.simple_struct, vec![], 32).unwrap();
    ts.manager.initialize_type_substitution(&raw).unwrap();
    assert_eq!(ts.manager.substitution_at(location).unwrap().offset, 32);

    ts.manager
        .update_type_substitution_local(location, ts.simple_struct, vec![ts.ss_array], 0)
        .unwrap();
    assert_eq!(
        ts.manager.substitution_at(location).unwrap().member_path,
        vec![ts.ss_array]
    );
    ts.manager.remove_type_substitution_instance(location).unwrap();
    assert!(ts.manager.substitution_at(location).is_none());
    assert!(ts.manager.remove_type_substitution_instance(location).is_err());
    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::SubstitutionsAdded(vec![location]),
            TypeEvent::SubstitutionsChanged(vec![location]),
            TypeEvent::SubstitutionsDeleted(vec![location]),
        ]
    );
    // none of it reached the store
    assert!(ts.backend.raw_substitution(location).is_none());
}
