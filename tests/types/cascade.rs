use glaurung_types::types::TypeEvent;

use crate::common::TestTypeSystem;

#[test]
fn test_fixture_layout() {
    let ts = TestTypeSystem::new();
    assert_eq!(ts.size(ts.uint_array), 320);
    assert_eq!(ts.size(ts.simple_struct), 384);
    assert_eq!(ts.size(ts.nested_struct), 416);
    assert_eq!(ts.size(ts.double_nested_struct), 480);
    assert_eq!(ts.size(ts.simple_union), 32);
    assert_eq!(ts.size(ts.complex_union), 480);
    assert_eq!(ts.offset(ts.ss_array), 64);
    assert_eq!(ts.offset(ts.dns_int), 416);
    assert_eq!(ts.offset(ts.dns_pointer), 448);
    assert_eq!(ts.offset(ts.cu_double_nested_struct), 0);
    ts.assert_backend_in_sync();
}

#[test]
fn test_growing_atomic_type_shifts_every_embedding() {
    let ts = TestTypeSystem::new();
    let mut manager = ts.manager;
    manager.update_type(ts.int_type, "newName", 64, true).unwrap();

    assert_eq!(manager.get_base_type(ts.int_type).unwrap().name(), "newName");
    let universe = manager.universe();
    let offset = |id| universe.member(id).unwrap().bit_offset().unwrap();
    assert_eq!(offset(ts.ss_uint), 64);
    assert_eq!(offset(ts.ss_array), 96);
    assert_eq!(offset(ts.ns_simple_struct), 64);
    assert_eq!(offset(ts.dns_int), 480);
    assert_eq!(offset(ts.dns_pointer), 544);
    assert_eq!(universe.bit_size(ts.simple_struct).unwrap(), 416);
    assert_eq!(universe.bit_size(ts.nested_struct).unwrap(), 480);
    assert_eq!(universe.bit_size(ts.double_nested_struct).unwrap(), 576);
    assert_eq!(universe.bit_size(ts.simple_union).unwrap(), 64);
    assert_eq!(universe.bit_size(ts.complex_union).unwrap(), 576);

    let events = ts.events.events();
    assert_eq!(
        events,
        vec![
            TypeEvent::TypesUpdated(
                [
                    ts.int_type,
                    ts.simple_struct,
                    ts.nested_struct,
                    ts.double_nested_struct,
                    ts.simple_union,
                    ts.complex_union,
                ]
                .into_iter()
                .collect()
            ),
            TypeEvent::MemberUpdated(ts.ss_uint),
            TypeEvent::MemberUpdated(ts.ss_array),
            TypeEvent::MemberUpdated(ts.ns_simple_struct),
            TypeEvent::MemberUpdated(ts.dns_int),
            TypeEvent::MemberUpdated(ts.dns_pointer),
        ]
    );
    // offsets of members in front of the changed one stay put
    assert_eq!(offset(ts.ss_int), 0);
    assert_eq!(offset(ts.dns_nested_struct), 0);
}

#[test]
fn test_shrinking_and_regrowing_restores_layout() {
    let mut ts = TestTypeSystem::new();
    let before = ts.capture_offsets();
    ts.manager.update_type(ts.int_type, "int", 8, true).unwrap();
    assert_eq!(ts.offset(ts.ss_uint), 8);
    assert_eq!(ts.size(ts.double_nested_struct), 480 - 3 * 24);
    ts.manager.update_type(ts.int_type, "int", 32, true).unwrap();
    assert_eq!(ts.capture_offsets(), before);
    ts.assert_backend_in_sync();
}

#[test]
fn test_rename_does_not_cascade() {
    let mut ts = TestTypeSystem::new();
    let before = ts.capture_offsets();
    ts.manager.rename_type(ts.int_type, "signed int").unwrap();
    assert_eq!(ts.capture_offsets(), before);
    assert!(ts
        .events
        .events()
        .iter()
        .all(|event| !matches!(event, TypeEvent::MemberUpdated(_))));
    assert!(ts.manager.is_type_existing("signed int"));
    assert!(!ts.manager.is_type_existing("int"));
}

#[test]
fn test_derived_size_can_not_be_set() {
    let mut ts = TestTypeSystem::new();
    assert!(ts
        .manager
        .update_type(ts.simple_struct, "SimpleStruct", 64, false)
        .is_err());
    // same size is accepted, it only renames
    ts.manager
        .update_type(ts.simple_struct, "Simple", 384, false)
        .unwrap();
    assert_eq!(ts.manager.get_base_type(ts.simple_struct).unwrap().name(), "Simple");
}

#[test]
fn test_insert_at_front_moves_members_and_embeddings() {
    let mut ts = TestTypeSystem::new();
    let added = ts
        .manager
        .create_structure_member(ts.simple_struct, ts.int_type, "front", 0)
        .unwrap();
    assert_eq!(ts.offset(added), 0);
    assert_eq!(ts.offset(ts.ss_int), 32);
    assert_eq!(ts.offset(ts.ss_uint), 64);
    assert_eq!(ts.offset(ts.ss_array), 96);
    assert_eq!(ts.size(ts.simple_struct), 416);
    assert_eq!(ts.offset(ts.dns_int), 448);
    assert_eq!(ts.offset(ts.dns_pointer), 480);
    assert_eq!(ts.size(ts.complex_union), 512);
    assert_eq!(ts.offset(ts.ns_int), 0);
    assert_eq!(ts.offset(ts.ns_simple_struct), 32);

    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::MemberUpdated(ts.ss_int),
            TypeEvent::MemberUpdated(ts.ss_uint),
            TypeEvent::MemberUpdated(ts.ss_array),
            TypeEvent::MemberAdded(added),
            TypeEvent::MemberUpdated(ts.dns_int),
            TypeEvent::MemberUpdated(ts.dns_pointer),
        ]
    );
    ts.assert_backend_in_sync();
}

#[test]
fn test_insert_overlapping_member() {
    let mut ts = TestTypeSystem::new();
    let added = ts
        .manager
        .create_structure_member(ts.simple_struct, ts.int_type, "overlap", 383)
        .unwrap();
    assert_eq!(ts.offset(added), 383);
    assert_eq!(ts.offset(ts.ss_int), 0);
    assert_eq!(ts.offset(ts.ss_uint), 32);
    assert_eq!(ts.offset(ts.ss_array), 415);
    assert_eq!(ts.size(ts.simple_struct), 735);
}

#[test]
fn test_insert_into_gap_moves_nothing() {
    let mut ts = TestTypeSystem::new();
    let gap = ts.manager.create_structure("Gap").unwrap();
    let first = ts.manager.create_structure_member(gap, ts.int_type, "a", 0).unwrap();
    let last = ts.manager.create_structure_member(gap, ts.int_type, "b", 96).unwrap();
    ts.events.clear();
    let middle = ts.manager.create_structure_member(gap, ts.int_type, "m", 32).unwrap();
    assert_eq!(ts.offset(first), 0);
    assert_eq!(ts.offset(middle), 32);
    assert_eq!(ts.offset(last), 96);
    assert_eq!(ts.events.events(), vec![TypeEvent::MemberAdded(middle)]);
}

#[test]
fn test_insert_member_after() {
    let mut ts = TestTypeSystem::new();
    let added = ts
        .manager
        .insert_member_after(ts.ss_int, ts.uint_type, "after_int")
        .unwrap();
    assert_eq!(ts.offset(added), 32);
    assert_eq!(ts.offset(ts.ss_uint), 64);
    let ids: Vec<_> = ts
        .manager
        .universe()
        .members(ts.simple_struct)
        .unwrap()
        .iter()
        .map(|member| member.id)
        .collect();
    assert_eq!(ids, vec![ts.ss_int, added, ts.ss_uint, ts.ss_array]);
}

#[test]
fn test_delete_member_closes_gap() {
    let mut ts = TestTypeSystem::new();
    ts.manager.delete_member(ts.ss_int).unwrap();
    assert_eq!(ts.offset(ts.ss_uint), 0);
    assert_eq!(ts.offset(ts.ss_array), 32);
    assert_eq!(ts.size(ts.simple_struct), 352);
    assert_eq!(ts.offset(ts.dns_int), 384);
    assert_eq!(ts.offset(ts.dns_pointer), 416);

    assert_eq!(
        ts.events.events(),
        vec![
            TypeEvent::TypesUpdated(
                [
                    ts.simple_struct,
                    ts.nested_struct,
                    ts.double_nested_struct,
                    ts.complex_union,
                ]
                .into_iter()
                .collect()
            ),
            TypeEvent::MemberDeleted(ts.ss_int),
            TypeEvent::MembersMoved(
                [
                    ts.simple_struct,
                    ts.nested_struct,
                    ts.double_nested_struct,
                    ts.complex_union,
                ]
                .into_iter()
                .collect()
            ),
            TypeEvent::MemberUpdated(ts.dns_int),
            TypeEvent::MemberUpdated(ts.dns_pointer),
        ]
    );
    assert!(ts.backend.raw_member(ts.ss_int).is_none());
    ts.assert_backend_in_sync();
}

#[test]
fn test_delete_last_member_moves_nothing() {
    let mut ts = TestTypeSystem::new();
    ts.manager.delete_member(ts.dns_pointer).unwrap();
    assert_eq!(ts.size(ts.double_nested_struct), 448);
    assert_eq!(ts.size(ts.complex_union), 448);
    assert_eq!(
        ts.events.count(|event| matches!(event, TypeEvent::MembersMoved(_))),
        0
    );
}

#[test]
fn test_delete_union_member() {
    let mut ts = TestTypeSystem::new();
    ts.manager.delete_member(ts.cu_double_nested_struct).unwrap();
    assert_eq!(ts.size(ts.complex_union), 32);
    assert!(!ts
        .manager
        .is_contained_in(ts.complex_union, ts.double_nested_struct));
}

#[test]
fn test_update_member_type_shifts_siblings() {
    let mut ts = TestTypeSystem::new();
    ts.manager
        .update_structure_member(ts.ss_uint, ts.uint_array, "ss_uint_array", 32)
        .unwrap();
    assert_eq!(ts.offset(ts.ss_array), 352);
    assert_eq!(ts.size(ts.simple_struct), 672);
    assert_eq!(ts.offset(ts.ns_simple_struct), 32);
    assert_eq!(ts.offset(ts.dns_int), 704);
    assert_eq!(ts.manager.get_member(ts.ss_uint).unwrap().name, "ss_uint_array");
    assert!(ts.manager.is_contained_in(ts.simple_struct, ts.uint_array));
    ts.assert_backend_in_sync();
}

#[test]
fn test_update_union_member_changes_union_size() {
    let mut ts = TestTypeSystem::new();
    ts.manager
        .update_union_member(ts.su_uint, ts.uint_array, "su_array")
        .unwrap();
    assert_eq!(ts.size(ts.simple_union), 320);
    assert!(ts
        .manager
        .update_structure_member(ts.su_int, ts.int_type, "x", 0)
        .is_err());
}

#[test]
fn test_update_array_cascades() {
    let mut ts = TestTypeSystem::new();
    ts.manager.update_array(ts.uint_array, ts.uint_type, 4).unwrap();
    assert_eq!(
        ts.manager.get_base_type(ts.uint_array).unwrap().name(),
        "unsigned int[4]"
    );
    assert_eq!(ts.size(ts.uint_array), 128);
    assert_eq!(ts.size(ts.simple_struct), 192);
    assert_eq!(ts.offset(ts.dns_int), 224);
    assert_eq!(ts.offset(ts.dns_pointer), 256);
    ts.assert_backend_in_sync();

    assert!(ts.manager.update_array(ts.uint_array, ts.uint_type, 0).is_err());
    assert!(ts.manager.update_array(ts.simple_struct, ts.uint_type, 2).is_err());
}

#[test]
fn test_move_members_swaps_places() {
    let mut ts = TestTypeSystem::new();
    let result = ts
        .manager
        .move_members(ts.simple_struct, &[ts.ss_int], 32)
        .unwrap();
    assert_eq!(result.implicitly_moved, vec![ts.ss_uint]);
    assert_eq!(result.implicit_delta, -32);
    assert_eq!(ts.offset(ts.ss_uint), 0);
    assert_eq!(ts.offset(ts.ss_int), 32);
    assert_eq!(ts.size(ts.simple_struct), 384);
    assert_eq!(
        ts.events.events(),
        vec![TypeEvent::MembersMoved(
            [
                ts.simple_struct,
                ts.nested_struct,
                ts.double_nested_struct,
                ts.complex_union,
            ]
            .into_iter()
            .collect()
        )]
    );
    ts.assert_backend_in_sync();
}

#[test]
fn test_move_members_rejects_invalid_moves() {
    let mut ts = TestTypeSystem::new();
    let before = ts.capture_offsets();
    assert!(ts.manager.move_members(ts.simple_struct, &[ts.ss_int], 0).is_err());
    assert!(ts.manager.move_members(ts.simple_struct, &[ts.ss_int], -32).is_err());
    assert!(ts
        .manager
        .move_members(ts.simple_struct, &[ts.ss_int, ts.ss_array], 32)
        .is_err());
    assert!(ts.manager.move_members(ts.simple_union, &[ts.su_int], 32).is_err());
    assert_eq!(ts.capture_offsets(), before);
    assert!(ts.events.events().is_empty());
}

#[test]
fn test_move_trailing_members_forward_rejected() {
    let mut ts = TestTypeSystem::new();
    let sizes = ts.capture_sizes();
    let offsets = ts.capture_offsets();
    assert!(ts
        .manager
        .move_members(ts.simple_struct, &[ts.ss_array], 32)
        .is_err());
    assert!(ts
        .manager
        .move_members(ts.simple_struct, &[ts.ss_uint, ts.ss_array], 32)
        .is_err());
    assert!(ts
        .manager
        .move_members(ts.double_nested_struct, &[ts.dns_pointer], 32)
        .is_err());
    assert_eq!(ts.capture_sizes(), sizes);
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
    ts.assert_backend_in_sync();
}

#[test]
fn test_update_member_offset_moves_member() {
    let mut ts = TestTypeSystem::new();
    ts.manager
        .update_structure_member(ts.ss_int, ts.int_type, "ss_int", 32)
        .unwrap();
    assert_eq!(ts.offset(ts.ss_uint), 0);
    assert_eq!(ts.offset(ts.ss_int), 32);
    assert_eq!(ts.offset(ts.ss_array), 64);
    assert_eq!(ts.size(ts.simple_struct), 384);
    assert_eq!(ts.offset(ts.dns_int), 416);
    assert_eq!(
        ts.events.events(),
        vec![TypeEvent::MembersMoved(
            [
                ts.simple_struct,
                ts.nested_struct,
                ts.double_nested_struct,
                ts.complex_union,
            ]
            .into_iter()
            .collect()
        )]
    );
    ts.assert_backend_in_sync();
}

#[test]
fn test_update_member_offset_and_name() {
    let mut ts = TestTypeSystem::new();
    ts.manager
        .update_structure_member(ts.ss_uint, ts.uint_type, "first", 0)
        .unwrap();
    assert_eq!(ts.offset(ts.ss_uint), 0);
    assert_eq!(ts.offset(ts.ss_int), 32);
    assert_eq!(ts.offset(ts.ss_array), 64);
    assert_eq!(ts.manager.get_member(ts.ss_uint).unwrap().name, "first");
    assert_eq!(ts.backend.raw_member(ts.ss_uint).unwrap().name, "first");
    let events = ts.events.events();
    assert_eq!(events[0], TypeEvent::MemberUpdated(ts.ss_uint));
    assert!(matches!(events[1], TypeEvent::MembersMoved(_)));
    assert_eq!(events.len(), 2);
    ts.assert_backend_in_sync();
}

#[test]
fn test_update_member_offset_past_layout_rejected() {
    let mut ts = TestTypeSystem::new();
    let offsets = ts.capture_offsets();
    assert!(ts
        .manager
        .update_structure_member(ts.ss_array, ts.uint_array, "ss_array", 96)
        .is_err());
    assert!(ts
        .manager
        .update_structure_member(ts.ss_int, ts.int_type, "ss_int", 1000)
        .is_err());
    assert_eq!(ts.capture_offsets(), offsets);
    assert!(ts.events.events().is_empty());
}
