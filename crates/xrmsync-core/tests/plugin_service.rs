mod support;

use support::MemoryDataverse;
use xrmsync_core::error::XrmError;
use xrmsync_core::model::{IsolationMode, SolutionComponentType};
use xrmsync_core::plugins::{AssemblyRegistration, IdSource, SolutionAttach};
use xrmsync_core::solution::MembershipOutcome;

#[tokio::test]
async fn register_assembly_uses_returned_id() {
    let store = MemoryDataverse::new();
    let service = store.service();

    let registered = service
        .register_assembly(AssemblyRegistration::new("Acme.Plugins", "TVo="))
        .await
        .unwrap();

    assert_eq!(registered.id_source, IdSource::Response);
    assert!(matches!(registered.solution, SolutionAttach::NotRequested));
    let (assembly, content) = store.assembly(&registered.id).unwrap();
    assert_eq!(assembly.name, "Acme.Plugins");
    assert_eq!(assembly.isolation_mode, Some(IsolationMode::Sandbox));
    assert_eq!(content, "TVo=");
}

#[tokio::test]
async fn register_assembly_looks_up_missing_id() {
    let store = MemoryDataverse::new();
    store.omit_created_ids();
    let service = store.service();

    let registered = service
        .register_assembly(AssemblyRegistration::new("Acme.Plugins", "TVo="))
        .await
        .unwrap();

    assert_eq!(registered.id_source, IdSource::Lookup);
    assert!(store.assembly(&registered.id).is_some());
    assert!(
        store
            .calls()
            .contains(&"find_assembly_by_name:Acme.Plugins".to_string())
    );
}

#[tokio::test]
async fn register_assembly_joins_solution() {
    let store = MemoryDataverse::new();
    store.seed_solution("AcmeCore");
    let service = store.service();

    let registered = service
        .register_assembly(
            AssemblyRegistration::new("Acme.Plugins", "TVo=").with_solution("AcmeCore"),
        )
        .await
        .unwrap();

    assert!(matches!(
        registered.solution,
        SolutionAttach::Done(MembershipOutcome::Added)
    ));
    assert_eq!(
        store.solution_components("AcmeCore"),
        vec![(registered.id.clone(), 91)]
    );
}

#[tokio::test]
async fn solution_failure_leaves_assembly_registered() {
    let store = MemoryDataverse::new();
    let service = store.service();

    let registered = service
        .register_assembly(
            AssemblyRegistration::new("Acme.Plugins", "TVo=").with_solution("Missing"),
        )
        .await
        .unwrap();

    match &registered.solution {
        SolutionAttach::Failed(XrmError::NotFound { kind, name }) => {
            assert_eq!(*kind, "solution");
            assert_eq!(name, "Missing");
        }
        other => panic!("unexpected attach result: {other:?}"),
    }
    assert!(store.assembly(&registered.id).is_some());
}

#[tokio::test]
async fn registering_into_default_solution_skips_attach() {
    let store = MemoryDataverse::new();
    let service = store.service_with_default("Active");

    let registered = service
        .register_assembly(
            AssemblyRegistration::new("Acme.Plugins", "TVo=").with_solution("ACTIVE"),
        )
        .await
        .unwrap();

    assert!(matches!(
        registered.solution,
        SolutionAttach::Done(MembershipOutcome::SkippedDefault)
    ));
    assert!(store.write_calls().iter().all(|c| c.starts_with("create_assembly")));
}

#[tokio::test]
async fn attaching_twice_is_a_no_op() {
    let store = MemoryDataverse::new();
    store.seed_solution("AcmeCore");
    let assembly = store.seed_assembly("Acme.Plugins");
    let type_id = store.seed_type(&assembly, "Acme.A");
    let service = store.service();

    let first = service
        .attach_to_solution(&type_id, SolutionComponentType::PluginType, "AcmeCore")
        .await
        .unwrap();
    let second = service
        .attach_to_solution(&type_id, SolutionComponentType::PluginType, "AcmeCore")
        .await
        .unwrap();

    assert_eq!(first, MembershipOutcome::Added);
    assert_eq!(second, MembershipOutcome::AlreadyPresent);
    assert_eq!(store.solution_components("AcmeCore").len(), 1);
}

#[tokio::test]
async fn update_assembly_replaces_content() {
    let store = MemoryDataverse::new();
    let assembly = store.seed_assembly("Acme.Plugins");
    let service = store.service();

    service.update_assembly(&assembly, "TVqQAA==").await.unwrap();

    let (_, content) = store.assembly(&assembly).unwrap();
    assert_eq!(content, "TVqQAA==");
}

#[tokio::test]
async fn create_type_falls_back_to_lookup() {
    let store = MemoryDataverse::new();
    store.omit_created_ids();
    let assembly = store.seed_assembly("Acme.Plugins");
    let service = store.service();

    let created = service.create_type(&assembly, "Acme.A").await.unwrap();

    assert_eq!(created.source, IdSource::Lookup);
    assert_eq!(store.type_id(&assembly, "Acme.A"), Some(created.id));
}

#[tokio::test]
async fn find_assembly_by_name_returns_none_when_absent() {
    let store = MemoryDataverse::new();
    store.seed_assembly("Acme.Plugins");
    let service = store.service();

    assert!(service.find_assembly_by_name("Other").await.unwrap().is_none());
    assert_eq!(service.list_assemblies().await.unwrap().len(), 1);
}
