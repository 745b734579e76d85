use glaurung_types::types::instance::{
    InMemoryInstanceBackend, RawTypeInstance, RawTypeInstanceReference, TypeInstanceAddress,
    TypeInstanceContainer,
};
use glaurung_types::types::section::{InMemorySectionBackend, SectionContainer, SectionPermission};
use glaurung_types::types::{EventRecorder, InstanceId, OperandLocation, SectionId, TypeEvent};

use crate::common::TestTypeSystem;

struct Module {
    ts: TestTypeSystem,
    sections: SectionContainer,
    data: SectionId,
    backend: InMemoryInstanceBackend,
    instances: TypeInstanceContainer,
    events: EventRecorder,
}

fn module() -> Module {
    let ts = TestTypeSystem::new();
    let mut sections = SectionContainer::new(InMemorySectionBackend::new(7)).unwrap();
    sections
        .create_section(".text", 0x401000, 0x402000, SectionPermission::READ_EXECUTE, None)
        .unwrap();
    let data = sections
        .create_section(".data", 0x403000, 0x403400, SectionPermission::READ_WRITE, None)
        .unwrap()
        .id;
    let backend = InMemoryInstanceBackend::new();
    let mut instances = TypeInstanceContainer::new(backend.clone());
    instances.initialize(&sections).unwrap();
    let events = EventRecorder::new();
    instances.add_listener(Box::new(events.clone()));
    Module {
        ts,
        sections,
        data,
        backend,
        instances,
        events,
    }
}

fn create(module: &mut Module, name: &str, offset: u64) -> InstanceId {
    let base_type = module.ts.manager.get_base_type(module.ts.simple_struct).unwrap();
    let section = module.sections.get_section(module.data).unwrap();
    module
        .instances
        .create_instance(name, None, base_type, section, offset)
        .unwrap()
        .id
}

#[test]
fn test_section_lookup() {
    let module = module();
    let data = module.sections.get_section(module.data).unwrap();
    assert_eq!(data.module_id, 7);
    assert_eq!(data.permission.to_string(), "rw-");
    assert_eq!(
        module.sections.section_containing(0x401800).map(|s| s.name.as_str()),
        Some(".text")
    );
    assert!(module.sections.section_containing(0x402800).is_none());
}

#[test]
fn test_instances_are_ordered_per_section() {
    let mut module = module();
    let late = create(&mut module, "late", 0x300);
    let early = create(&mut module, "early", 0x10);
    let data = module.sections.get_section(module.data).unwrap();
    let ids: Vec<_> = module
        .instances
        .get_type_instances(data)
        .iter()
        .map(|instance| instance.id)
        .collect();
    assert_eq!(ids, vec![early, late]);

    let text = module.sections.get_sections()[0];
    assert!(module.instances.get_type_instances(text).is_empty());

    let instance = module.instances.get_type_instance_by_id(late).unwrap();
    assert_eq!(instance.address().virtual_address(), 0x403300);
    assert_eq!(instance.section_offset(), 0x300);
    assert_eq!(instance.base_type, module.ts.simple_struct);
    assert_eq!(instance.to_string(), "late @ 0x403000+0x300");
    assert_eq!(
        module.events.events(),
        vec![TypeEvent::InstanceAdded(late), TypeEvent::InstanceAdded(early)]
    );
}

#[test]
fn test_instance_outside_section_rejected() {
    let mut module = module();
    let base_type = module.ts.manager.get_base_type(module.ts.int_type).unwrap();
    let section = module.sections.get_section(module.data).unwrap();
    assert!(module
        .instances
        .create_instance("far", None, base_type, section, 0x401)
        .is_err());
    assert!(module
        .instances
        .create_instance("", None, base_type, section, 0)
        .is_err());
    assert!(module.instances.get_all_type_instances().is_empty());
}

#[test]
fn test_references_follow_instance_lifetime() {
    let mut module = module();
    let id = create(&mut module, "global", 0x20);
    let first = OperandLocation::new(7, 0x401010, 1, 4);
    let second = OperandLocation::new(7, 0x401020, 0, 9);
    module.instances.create_reference(first, id).unwrap();
    module.instances.create_reference(second, id).unwrap();
    assert!(module.instances.create_reference(first, id).is_err());
    assert!(module
        .instances
        .create_reference(OperandLocation::new(7, 0, 0, 0), InstanceId(99))
        .is_err());
    assert_eq!(module.instances.get_reference_count(id), 2);
    assert!(module.instances.find_reference(second).unwrap().active);
    assert_eq!(module.backend.reference_count(), 2);

    module.instances.delete_reference(second).unwrap();
    assert!(module.instances.find_reference(second).is_none());
    assert_eq!(module.backend.reference_count(), 1);

    module.events.clear();
    module.instances.delete_instance(id).unwrap();
    assert_eq!(
        module.events.events(),
        vec![TypeEvent::ReferenceRemoved(first), TypeEvent::InstanceRemoved(id)]
    );
    assert!(module.backend.raw_instance(id).is_none());
    assert_eq!(module.backend.reference_count(), 0);
    assert!(module
        .instances
        .get_type_instance(TypeInstanceAddress::new(0x403000, 0x20))
        .is_none());
}

#[test]
fn test_rename_and_comments() {
    let mut module = module();
    let id = create(&mut module, "global", 0);
    module.events.clear();
    module.instances.set_instance_name(id, "renamed").unwrap();
    assert_eq!(
        module.backend.raw_instance(id).unwrap().name.as_deref(),
        Some("renamed")
    );

    let comments = module.instances.append_comment(id, "first").unwrap();
    assert_eq!(comments.len(), 1);
    let comments = module.instances.append_comment(id, "second").unwrap();
    let edited = module
        .instances
        .edit_comment(id, comments[0].id, "edited")
        .unwrap();
    assert_eq!(edited.text, "edited");
    module.instances.delete_comment(id, comments[1].id).unwrap();
    let remaining = module.instances.get_comments(id).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].text, "edited");
    assert!(module.instances.append_comment(id, "").is_err());
    assert_eq!(
        module
            .events
            .count(|event| *event == TypeEvent::InstanceChanged(id)),
        5
    );
}

#[test]
fn test_failed_write_leaves_container_untouched() {
    let mut module = module();
    module.backend.set_fail_writes(true);
    let base_type = module.ts.manager.get_base_type(module.ts.int_type).unwrap();
    let section = module.sections.get_section(module.data).unwrap();
    assert!(module
        .instances
        .create_instance("global", None, base_type, section, 0)
        .unwrap_err()
        .is_persistence_failure());
    assert!(module.instances.get_all_type_instances().is_empty());
    assert!(module.events.events().is_empty());
}

#[test]
fn test_reload_from_other_client() {
    let mut module = module();
    let location = OperandLocation::new(7, 0x401000, 0, 1);
    module.backend.put_raw_instance(
        RawTypeInstance::new(
            InstanceId(5),
            Some("remote".to_string()),
            module.ts.int_type,
            module.data,
            0x40,
        )
        .unwrap(),
    );
    module
        .backend
        .put_raw_reference(RawTypeInstanceReference::new(InstanceId(5), location));

    let loaded = module.instances.load_instance(InstanceId(5), &module.sections).unwrap();
    assert_eq!(loaded.name.as_deref(), Some("remote"));
    let reference = module
        .instances
        .load_instance_reference(InstanceId(5), location)
        .unwrap();
    assert!(!reference.active);
    assert!(module.instances.initialize_type_instance_reference(location).unwrap());
    module.instances.deactivate_type_instance_reference(location).unwrap();

    module.backend.put_raw_instance(
        RawTypeInstance::new(
            InstanceId(5),
            Some("renamed".to_string()),
            module.ts.int_type,
            module.data,
            0x40,
        )
        .unwrap(),
    );
    let reloaded = module.instances.reload_instance(InstanceId(5), &module.sections).unwrap();
    assert_eq!(reloaded.name.as_deref(), Some("renamed"));

    module.instances.remove_reference(location).unwrap();
    module.instances.remove_type_instance(InstanceId(5)).unwrap();
    assert!(module.instances.get_type_instance_by_id(InstanceId(5)).is_none());
    // local removal keeps the stored row
    assert!(module.backend.raw_instance(InstanceId(5)).is_some());

    assert_eq!(
        module.events.events(),
        vec![
            TypeEvent::InstanceAdded(InstanceId(5)),
            TypeEvent::ReferenceChanged(location),
            TypeEvent::ReferenceChanged(location),
            TypeEvent::InstanceChanged(InstanceId(5)),
            TypeEvent::ReferenceRemoved(location),
            TypeEvent::InstanceRemoved(InstanceId(5)),
        ]
    );
}

#[test]
fn test_initialize_loads_stored_rows_silently() {
    let module = module();
    module.backend.put_raw_instance(
        RawTypeInstance::new(InstanceId(1), None, module.ts.uint_type, module.data, 0).unwrap(),
    );
    let mut fresh = TypeInstanceContainer::new(module.backend.clone());
    let recorder = EventRecorder::new();
    fresh.add_listener(Box::new(recorder.clone()));
    fresh.initialize(&module.sections).unwrap();
    assert_eq!(fresh.get_all_type_instances().len(), 1);
    assert!(recorder.events().is_empty());
}
