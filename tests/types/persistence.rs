use glaurung_types::types::{InMemoryTypeBackend, TypeEvent, TypeManager, TypeSystemSnapshot};
use glaurung_types::TypesError;

use crate::common::test_utils::create_temp_file;
use crate::common::TestTypeSystem;

#[test]
fn test_failed_writes_change_nothing() {
    let mut ts = TestTypeSystem::new();
    let sizes = ts.capture_sizes();
    let offsets = ts.capture_offsets();
    ts.backend.set_fail_writes(true);

    assert!(ts
        .manager
        .create_structure_member(ts.simple_struct, ts.int_type, "front", 0)
        .unwrap_err()
        .is_persistence_failure());
    assert!(ts.manager.update_type(ts.int_type, "int", 64, true).is_err());
    assert!(ts.manager.delete_member(ts.ss_int).is_err());
    assert!(ts.manager.delete_type(ts.simple_union).is_err());
    assert!(ts
        .manager
        .move_members(ts.simple_struct, &[ts.ss_int], 32)
        .is_err());
    assert!(ts.manager.create_array(ts.int_type, 4).is_err());

    assert_eq!(ts.capture_sizes(), sizes);
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
    ts.backend.set_fail_writes(false);
    ts.assert_backend_in_sync();
}

#[test]
fn test_failed_member_create_keeps_siblings() {
    let mut ts = TestTypeSystem::new();
    let offsets = ts.capture_offsets();
    ts.backend.set_fail_operation("create structure member", true);
    assert!(matches!(
        ts.manager
            .create_structure_member(ts.simple_struct, ts.int_type, "front", 0),
        Err(TypesError::CouldntSave(_))
    ));
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
    ts.assert_backend_in_sync();
}

#[test]
fn test_failed_sibling_shift_discards_created_row() {
    let mut ts = TestTypeSystem::new();
    let offsets = ts.capture_offsets();
    let stored = ts.backend.member_count();
    ts.backend.set_fail_operation("update member offsets", true);
    assert!(ts
        .manager
        .create_structure_member(ts.simple_struct, ts.int_type, "front", 0)
        .is_err());
    assert_eq!(ts.backend.member_count(), stored);
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
    ts.assert_backend_in_sync();
}

#[test]
fn test_failed_member_delete_keeps_layout() {
    let mut ts = TestTypeSystem::new();
    let offsets = ts.capture_offsets();
    ts.backend.set_fail_operation("delete member", true);
    assert!(matches!(
        ts.manager.delete_member(ts.ss_int),
        Err(TypesError::CouldntDelete(_))
    ));
    ts.backend.set_fail_operation("delete member", false);
    ts.backend.set_fail_operation("update member offsets", true);
    assert!(ts.manager.delete_member(ts.ss_int).is_err());

    assert!(ts.backend.raw_member(ts.ss_int).is_some());
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
    ts.assert_backend_in_sync();
}

#[test]
fn test_failed_relocation_keeps_name_and_offsets() {
    let mut ts = TestTypeSystem::new();
    let offsets = ts.capture_offsets();
    ts.backend.set_fail_operation("update structure member", true);
    assert!(ts
        .manager
        .update_structure_member(ts.ss_uint, ts.uint_type, "first", 0)
        .is_err());
    assert_eq!(ts.manager.get_member(ts.ss_uint).unwrap().name, "ss_uint");
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
    ts.assert_backend_in_sync();
}

#[test]
fn test_failed_load() {
    let backend = InMemoryTypeBackend::new();
    backend.set_fail_loads(true);
    assert!(matches!(
        TypeManager::new(backend),
        Err(TypesError::CouldntLoad(_))
    ));
}

#[test]
fn test_snapshot_reloads_identically() {
    let ts = TestTypeSystem::new();
    let snapshot = ts.manager.snapshot().unwrap();
    let simple = snapshot
        .types
        .iter()
        .find(|row| row.id == ts.simple_struct)
        .unwrap();
    assert_eq!(simple.bit_size, 384);
    assert_eq!(snapshot.members.len(), 13);

    let file = create_temp_file(snapshot.to_json().unwrap().as_bytes());
    let json = std::fs::read_to_string(file.path()).unwrap();
    let restored = InMemoryTypeBackend::from_snapshot(&TypeSystemSnapshot::from_json(&json).unwrap());
    let mut manager = TypeManager::new(restored).unwrap();
    assert_eq!(manager.snapshot().unwrap(), snapshot);

    // ids keep counting where the stored rows end
    let next = manager.create_atomic_type("char", 8, true).unwrap();
    assert_eq!(next.value(), 11);
}

#[test]
fn test_stored_cycle_is_rejected() {
    let ts = TestTypeSystem::new();
    let mut snapshot = ts.manager.snapshot().unwrap();
    let row = snapshot
        .members
        .iter_mut()
        .find(|row| row.id == ts.ss_int)
        .unwrap();
    row.base_type = ts.double_nested_struct;
    let backend = InMemoryTypeBackend::from_snapshot(&snapshot);
    assert!(matches!(TypeManager::new(backend), Err(TypesError::CouldntLoad(_))));
}

#[test]
fn test_events_only_after_successful_write() {
    let mut ts = TestTypeSystem::new();
    ts.backend.set_fail_writes(true);
    assert!(ts.manager.create_structure("Never").is_err());
    ts.backend.set_fail_writes(false);
    let created = ts.manager.create_structure("Later").unwrap();
    assert_eq!(ts.events.events(), vec![TypeEvent::TypeAdded(created)]);
    assert_eq!(created.value(), 11);
}
