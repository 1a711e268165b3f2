//! Resource bundle provisioning integration tests.

mod common;

use common::{key, TestHarness};
use ldap_sync_service::error::SyncError;
use ldap_sync_service::services::memory::StoreOp;
use ldap_sync_service::services::InMemoryResourceStore;

#[tokio::test]
async fn test_ensure_twice_yields_one_bundle() {
    let harness = TestHarness::new(&[]);

    let first = harness.provisioner.ensure(&key("alice")).await.unwrap();
    let second = harness.provisioner.ensure(&key("alice")).await.unwrap();

    assert_eq!((first.changed, first.unchanged), (3, 0));
    assert_eq!((second.changed, second.unchanged), (0, 3));
    assert!(harness.has_bundle("alice"));
    assert_eq!(harness.store.object_refs().len(), 3);
}

#[tokio::test]
async fn test_ensure_creates_container_first() {
    let harness = TestHarness::new(&[]);

    harness.provisioner.ensure(&key("alice")).await.unwrap();

    let targets: Vec<String> = harness
        .store
        .calls()
        .into_iter()
        .filter(|c| c.op == StoreOp::CreateObject)
        .map(|c| c.target)
        .collect();
    assert_eq!(
        targets,
        vec![
            "namespace/alice",
            "configmap/alice/alice-config",
            "pod/alice/alice-pod"
        ]
    );
}

#[tokio::test]
async fn test_interrupted_ensure_resumes_with_missing_member_only() {
    let harness = TestHarness::new(&[]);
    harness
        .store
        .fail_next(StoreOp::CreateObject, "pod/dave/dave-pod", 1);

    let err = harness.provisioner.ensure(&key("dave")).await.unwrap_err();
    assert!(matches!(err, SyncError::ResourceStoreUnavailable(_)));
    assert!(!harness.has_bundle("dave"));

    let changes = harness.provisioner.ensure(&key("dave")).await.unwrap();

    assert_eq!(changes.changed, 1);
    assert_eq!(changes.unchanged, 2);
    assert!(harness.has_bundle("dave"));
}

#[tokio::test]
async fn test_teardown_without_bundle_is_a_no_op() {
    let harness = TestHarness::new(&[]);

    let changes = harness.provisioner.teardown(&key("ghost")).await.unwrap();

    assert_eq!(changes.changed, 0);
    assert!(harness.store.object_refs().is_empty());
}

#[tokio::test]
async fn test_teardown_relies_on_cascading_store() {
    let harness = TestHarness::new(&[]);
    harness.provisioner.ensure(&key("erin")).await.unwrap();
    harness.store.clear_calls();

    harness.provisioner.teardown(&key("erin")).await.unwrap();

    assert_eq!(harness.store.count(StoreOp::DeleteObject), 1);
    assert!(harness.has_no_bundle("erin"));
}

#[tokio::test]
async fn test_teardown_deletes_scoped_members_when_store_does_not_cascade() {
    let harness = TestHarness::with_store(&[], InMemoryResourceStore::without_cascade());
    harness.provisioner.ensure(&key("erin")).await.unwrap();
    harness.store.clear_calls();

    let changes = harness.provisioner.teardown(&key("erin")).await.unwrap();

    assert_eq!(changes.changed, 3);
    assert_eq!(harness.store.count(StoreOp::DeleteObject), 3);
    assert!(harness.has_no_bundle("erin"));
    assert!(harness.store.object_refs().is_empty());
}

#[tokio::test]
async fn test_teardown_resumes_after_partial_failure() {
    let harness = TestHarness::with_store(&[], InMemoryResourceStore::without_cascade());
    harness.provisioner.ensure(&key("finn")).await.unwrap();
    harness
        .store
        .fail_next(StoreOp::DeleteObject, "configmap/finn/finn-config", 1);

    assert!(harness.provisioner.teardown(&key("finn")).await.is_err());
    assert!(!harness.has_no_bundle("finn"));

    harness.provisioner.teardown(&key("finn")).await.unwrap();
    assert!(harness.has_no_bundle("finn"));
}
