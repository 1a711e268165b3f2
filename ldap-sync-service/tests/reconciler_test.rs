//! Per-identity reconciler integration tests.

mod common;

use common::{key, TestHarness};
use ldap_sync_service::error::SyncError;
use ldap_sync_service::models::BundleState;
use ldap_sync_service::services::memory::StoreOp;
use ldap_sync_service::services::ReconcileOutcome;

#[tokio::test]
async fn test_member_is_provisioned() {
    let harness = TestHarness::new(&["alice"]);
    harness.store.insert_record(&key("alice"), BundleState::Absent);

    let outcome = harness.reconciler.reconcile(&key("alice")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Provisioned { created: 3 });
    assert_eq!(
        harness.store.record_state("alice"),
        Some(BundleState::Provisioned)
    );
    assert!(harness.has_bundle("alice"));
}

#[tokio::test]
async fn test_steady_state_reconcile_writes_nothing() {
    let harness = TestHarness::new(&["alice"]);
    harness.store.insert_record(&key("alice"), BundleState::Absent);
    harness.reconciler.reconcile(&key("alice")).await.unwrap();
    harness.store.clear_calls();

    let outcome = harness.reconciler.reconcile(&key("alice")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Provisioned { created: 0 });
    assert_eq!(harness.store.count(StoreOp::SetBundleState), 0);
    assert_eq!(harness.store.count(StoreOp::DeleteObject), 0);
}

#[tokio::test]
async fn test_absent_identity_is_removed_once() {
    let harness = TestHarness::new(&[]);
    harness.store.insert_record(&key("carol"), BundleState::Provisioned);
    harness.provisioner.ensure(&key("carol")).await.unwrap();
    harness.store.clear_calls();

    let outcomes = [
        harness.reconciler.reconcile(&key("carol")).await.unwrap(),
        harness.reconciler.reconcile(&key("carol")).await.unwrap(),
        harness.reconciler.reconcile(&key("carol")).await.unwrap(),
    ];

    assert_eq!(
        outcomes,
        [
            ReconcileOutcome::Decommissioned,
            ReconcileOutcome::RecordGone,
            ReconcileOutcome::RecordGone,
        ]
    );
    assert_eq!(harness.store.count(StoreOp::DeleteRecord), 1);
    assert_eq!(harness.store.count(StoreOp::DeleteObject), 1);
    assert!(harness.store.record_keys().is_empty());
    assert!(harness.has_no_bundle("carol"));
}

#[tokio::test]
async fn test_missing_record_is_a_no_op() {
    let harness = TestHarness::new(&["alice"]);

    let outcome = harness.reconciler.reconcile(&key("alice")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::RecordGone);
    assert!(harness
        .store
        .calls()
        .iter()
        .all(|c| c.op == StoreOp::GetRecord));
    assert!(harness.has_no_bundle("alice"));
}

#[tokio::test]
async fn test_directory_outage_leaves_state_untouched() {
    let harness = TestHarness::new(&["alice"]);
    harness.store.insert_record(&key("alice"), BundleState::Absent);
    harness.directory.set_unavailable(true);

    let err = harness.reconciler.reconcile(&key("alice")).await.unwrap_err();

    assert!(matches!(err, SyncError::DirectoryUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(harness.store.record_state("alice"), Some(BundleState::Absent));
    assert!(harness.has_no_bundle("alice"));

    harness.directory.set_unavailable(false);
    let outcome = harness.reconciler.reconcile(&key("alice")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Provisioned { created: 3 });
}

#[tokio::test]
async fn test_interrupted_provisioning_is_resumed() {
    let harness = TestHarness::new(&["dave"]);
    harness.store.insert_record(&key("dave"), BundleState::Absent);
    harness
        .store
        .fail_next(StoreOp::CreateObject, "pod/dave/dave-pod", 1);

    let err = harness.reconciler.reconcile(&key("dave")).await.unwrap_err();
    assert!(matches!(err, SyncError::ResourceStoreUnavailable(_)));
    assert_eq!(
        harness.store.record_state("dave"),
        Some(BundleState::Provisioning)
    );

    let outcome = harness.reconciler.reconcile(&key("dave")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Provisioned { created: 1 });
    assert_eq!(
        harness.store.record_state("dave"),
        Some(BundleState::Provisioned)
    );
}

#[tokio::test]
async fn test_member_leaving_directory_is_decommissioned() {
    let harness = TestHarness::new(&["bob"]);
    harness.store.insert_record(&key("bob"), BundleState::Absent);
    harness.reconciler.reconcile(&key("bob")).await.unwrap();

    harness.directory.set_members(&[]);
    let outcome = harness.reconciler.reconcile(&key("bob")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Decommissioned);
    assert!(harness.store.record_keys().is_empty());
    assert!(harness.has_no_bundle("bob"));
}

#[tokio::test]
async fn test_failed_teardown_keeps_record_for_retry() {
    let harness = TestHarness::new(&[]);
    harness.store.insert_record(&key("carol"), BundleState::Provisioned);
    harness.provisioner.ensure(&key("carol")).await.unwrap();
    harness
        .store
        .fail_next(StoreOp::DeleteObject, "namespace/carol", 1);

    assert!(harness.reconciler.reconcile(&key("carol")).await.is_err());
    assert_eq!(
        harness.store.record_state("carol"),
        Some(BundleState::Decommissioning)
    );

    let outcome = harness.reconciler.reconcile(&key("carol")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Decommissioned);
    assert!(harness.store.record_keys().is_empty());
}
