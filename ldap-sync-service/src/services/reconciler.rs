//! Per-identity reconciliation: re-verify membership and converge the bundle.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::directory::DirectoryClient;
use super::metrics::{record_error, record_reconcile};
use super::provisioner::ResourceBundleProvisioner;
use super::store::{ResourceStore, StoreError, StoreOutcome};
use crate::error::SyncError;
use crate::models::{BundleState, IdentityKey, IdentityRecord};

/// Phases a single reconcile pass moves through.
///
/// `Verifying` is entered on every trigger. A pass ends in `Provisioned`, in
/// `Decommissioned`, or immediately when the record has already been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Verifying,
    Provisioning,
    Provisioned,
    Decommissioning,
    Decommissioned,
}

/// Terminal result of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record was deleted before this pass; nothing to do.
    RecordGone,
    /// The key is a directory member and its bundle exists.
    Provisioned { created: usize },
    /// The key left the directory; bundle and record are removed.
    Decommissioned,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordGone => "record_gone",
            Self::Provisioned { .. } => "provisioned",
            Self::Decommissioned => "decommissioned",
        }
    }
}

/// Level-triggered reconciler for one identity record.
///
/// The outcome depends only on current directory and store state, so invoking it
/// repeatedly for the same key, or again after an interrupted pass, converges on the
/// same end state. No locking is done here; safety rests on every store call being
/// idempotent.
pub struct IdentityReconciler {
    directory: Arc<dyn DirectoryClient>,
    store: Arc<dyn ResourceStore>,
    provisioner: Arc<ResourceBundleProvisioner>,
}

impl IdentityReconciler {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        store: Arc<dyn ResourceStore>,
        provisioner: Arc<ResourceBundleProvisioner>,
    ) -> Self {
        Self {
            directory,
            store,
            provisioner,
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn reconcile(&self, key: &IdentityKey) -> Result<ReconcileOutcome, SyncError> {
        let result = self.run_pass(key).await;
        match &result {
            Ok(outcome) => record_reconcile(outcome.as_str()),
            Err(e) => {
                record_reconcile("error");
                record_error(e.error_type());
                warn!(error = %e, retryable = e.is_retryable(), "Reconcile pass failed");
            }
        }
        result
    }

    async fn run_pass(&self, key: &IdentityKey) -> Result<ReconcileOutcome, SyncError> {
        let mut phase = ReconcilePhase::Verifying;

        let Some(record) = self.store.get_record(key).await? else {
            info!(?phase, "Identity record no longer exists, nothing to reconcile");
            return Ok(ReconcileOutcome::RecordGone);
        };

        let is_member = self.directory.fetch_one(key).await?;

        if is_member {
            phase = ReconcilePhase::Provisioning;
            if !self.transition(&record, BundleState::Provisioning, phase).await? {
                return Ok(ReconcileOutcome::RecordGone);
            }

            let changes = self.provisioner.ensure(key).await?;

            phase = ReconcilePhase::Provisioned;
            if !self.still_tracked(&record, phase).await? {
                // Removed while we provisioned: a bundle must not outlive its record.
                info!(?phase, "Identity record removed while provisioning, tearing down");
                self.provisioner.teardown(key).await?;
                return Ok(ReconcileOutcome::RecordGone);
            }
            Ok(ReconcileOutcome::Provisioned {
                created: changes.changed,
            })
        } else {
            info!("Identity not found in directory, decommissioning");
            phase = ReconcilePhase::Decommissioning;
            if !self.transition(&record, BundleState::Decommissioning, phase).await? {
                // A concurrent pass removed the record; the bundle may still remain.
                self.provisioner.teardown(key).await?;
                return Ok(ReconcileOutcome::Decommissioned);
            }

            self.provisioner.teardown(key).await?;
            self.store.delete_record(key).await.absorb_not_found()?;

            phase = ReconcilePhase::Decommissioned;
            info!(?phase, "Identity decommissioned");
            Ok(ReconcileOutcome::Decommissioned)
        }
    }

    /// Mark the record `Provisioned` and report whether it still exists. An
    /// already `Provisioned` record gets no write, so it is read back instead.
    async fn still_tracked(
        &self,
        record: &IdentityRecord,
        phase: ReconcilePhase,
    ) -> Result<bool, SyncError> {
        if record.state == BundleState::Provisioned {
            return Ok(self.store.get_record(&record.key).await?.is_some());
        }
        self.transition(record, BundleState::Provisioned, phase).await
    }

    /// Persist `state` unless the record already carries it, skipping the write so
    /// a converged record produces no change notifications. Returns false when the
    /// record disappeared underneath us.
    async fn transition(
        &self,
        record: &IdentityRecord,
        state: BundleState,
        phase: ReconcilePhase,
    ) -> Result<bool, SyncError> {
        if record.state == state || skip_intermediate(record.state, state) {
            return Ok(true);
        }

        match self.store.set_bundle_state(&record.key, state).await {
            Ok(()) => {
                info!(?phase, from = %record.state, to = %state, "Bundle state updated");
                Ok(true)
            }
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// A record already `Provisioned` stays so while its bundle is re-ensured.
fn skip_intermediate(current: BundleState, next: BundleState) -> bool {
    current == BundleState::Provisioned && next == BundleState::Provisioning
}
