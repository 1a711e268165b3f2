//! Full-population sync: diff the directory against every tracked record.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::directory::DirectoryClient;
use super::metrics::{record_error, record_sync_item, record_sync_pass};
use super::provisioner::ResourceBundleProvisioner;
use super::store::{Applied, ResourceStore, StoreOutcome};
use crate::error::{ItemAction, ItemFailure, SyncError};
use crate::models::IdentityKey;

/// Create and delete intents computed from one directory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// In the directory, not yet tracked.
    pub to_create: BTreeSet<IdentityKey>,
    /// Tracked, no longer in the directory.
    pub to_delete: BTreeSet<IdentityKey>,
}

impl SyncPlan {
    /// Set difference in both directions using hashed membership.
    pub fn compute(directory: &HashSet<IdentityKey>, tracked: &HashSet<IdentityKey>) -> Self {
        Self {
            to_create: directory.difference(tracked).cloned().collect(),
            to_delete: tracked.difference(directory).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Aggregate result of one bulk pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    /// Items whose intended state already held, e.g. created concurrently.
    pub unchanged: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fail with `PartialBatchFailure` if any item failed.
    pub fn into_result(self) -> Result<Self, SyncError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(SyncError::PartialBatchFailure {
                failures: self.failures,
            })
        }
    }

    fn record(&mut self, key: &IdentityKey, action: ItemAction, result: Result<Applied, SyncError>) {
        match result {
            Ok(Applied::Changed) => {
                record_sync_item(action.as_str(), "changed");
                match action {
                    ItemAction::Create => self.created.push(key.to_string()),
                    ItemAction::Delete => self.deleted.push(key.to_string()),
                }
            }
            Ok(Applied::Unchanged) => {
                record_sync_item(action.as_str(), "unchanged");
                self.unchanged.push(key.to_string());
            }
            Err(e) => {
                record_sync_item(action.as_str(), "failed");
                record_error(e.error_type());
                warn!(key = %key, action = action.as_str(), error = %e, "Bulk sync item failed");
                self.failures.push(ItemFailure::new(key.as_str(), action, &e));
            }
        }
    }
}

/// Reconciles the complete directory membership against all identity records.
///
/// Each item is attempted independently: one failing key never stops the others,
/// and every failure is returned in the report.
pub struct BulkSyncEngine {
    directory: Arc<dyn DirectoryClient>,
    store: Arc<dyn ResourceStore>,
    provisioner: Arc<ResourceBundleProvisioner>,
    concurrency: usize,
}

impl BulkSyncEngine {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        store: Arc<dyn ResourceStore>,
        provisioner: Arc<ResourceBundleProvisioner>,
        concurrency: usize,
    ) -> Self {
        Self {
            directory,
            store,
            provisioner,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one pass. Returns `Err` only when the inputs could not be read; item
    /// failures are carried in the report.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let result = self.run_pass().await;
        match &result {
            Ok(report) if report.is_complete() => record_sync_pass("success"),
            Ok(_) => record_sync_pass("partial"),
            Err(e) => {
                record_sync_pass("failed");
                record_error(e.error_type());
            }
        }
        result
    }

    async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        let snapshot = self.directory.fetch_all().await?;
        let records = self.store.list_records().await?;

        let mut report = SyncReport::default();

        let mut directory_keys = HashSet::with_capacity(snapshot.len());
        for raw in &snapshot {
            match IdentityKey::parse(raw) {
                Ok(key) => {
                    directory_keys.insert(key);
                }
                Err(e) => {
                    warn!(identifier = %raw, "Skipping directory entry with an unusable identifier");
                    record_error(e.error_type());
                    report
                        .failures
                        .push(ItemFailure::new(raw.as_str(), ItemAction::Create, &e));
                }
            }
        }
        let tracked_keys: HashSet<IdentityKey> = records.into_iter().map(|r| r.key).collect();

        let plan = SyncPlan::compute(&directory_keys, &tracked_keys);
        info!(
            directory = directory_keys.len(),
            tracked = tracked_keys.len(),
            to_create = plan.to_create.len(),
            to_delete = plan.to_delete.len(),
            "Computed bulk sync plan"
        );

        // Creates first, so no key is briefly untracked while a per-key check runs.
        let created: Vec<(IdentityKey, Result<Applied, SyncError>)> =
            stream::iter(plan.to_create.into_iter())
                .map(move |key| async move {
                    let result = self.create(&key).await;
                    (key, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        for (key, result) in created {
            report.record(&key, ItemAction::Create, result);
        }

        let deleted: Vec<(IdentityKey, Result<Applied, SyncError>)> =
            stream::iter(plan.to_delete.into_iter())
                .map(move |key| async move {
                    let result = self.delete(&key).await;
                    (key, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        for (key, result) in deleted {
            report.record(&key, ItemAction::Delete, result);
        }

        info!(
            created = report.created.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged.len(),
            failed = report.failures.len(),
            "Bulk sync pass finished"
        );
        Ok(report)
    }

    async fn create(&self, key: &IdentityKey) -> Result<Applied, SyncError> {
        let applied = self.store.create_record(key).await.absorb_conflict()?;
        if applied == Applied::Changed {
            info!(key = %key, "Created identity record");
        }
        Ok(applied)
    }

    /// Tear the bundle down before the record, so a failed teardown leaves the
    /// record in place for the next pass to retry.
    async fn delete(&self, key: &IdentityKey) -> Result<Applied, SyncError> {
        self.provisioner.teardown(key).await?;
        let applied = self.store.delete_record(key).await.absorb_not_found()?;
        if applied == Applied::Changed {
            info!(key = %key, "Deleted identity record");
        }
        // A reconcile that saw the record before it was deleted may have
        // recreated the bundle after the first teardown.
        self.provisioner.teardown(key).await?;
        Ok(applied)
    }
}
