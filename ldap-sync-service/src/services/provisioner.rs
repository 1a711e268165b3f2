//! Creates and tears down the resource bundle of one identity.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::store::{Applied, ResourceStore, StoreOutcome};
use crate::error::SyncError;
use crate::models::{BundleTemplate, IdentityKey, ResourceBundle};

/// Per-member outcome of a provisioning call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleChanges {
    pub changed: usize,
    pub unchanged: usize,
}

impl BundleChanges {
    fn count(&mut self, applied: Applied) {
        match applied {
            Applied::Changed => self.changed += 1,
            Applied::Unchanged => self.unchanged += 1,
        }
    }
}

/// Drives one identity's bundle to existence or absence.
///
/// Bundle creation is an ordered list of steps, each idempotent on its own, so a
/// call interrupted part way is completed by simply calling again.
pub struct ResourceBundleProvisioner {
    store: Arc<dyn ResourceStore>,
    template: BundleTemplate,
}

impl ResourceBundleProvisioner {
    pub fn new(store: Arc<dyn ResourceStore>, template: BundleTemplate) -> Self {
        Self { store, template }
    }

    pub fn bundle_for(&self, key: &IdentityKey) -> ResourceBundle {
        ResourceBundle::derive(key, &self.template)
    }

    /// Create the container, then its configuration, then its workload.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn ensure(&self, key: &IdentityKey) -> Result<BundleChanges, SyncError> {
        let bundle = self.bundle_for(key);
        let mut changes = BundleChanges::default();

        for member in bundle.creation_order() {
            let target = member.object_ref();
            let applied = self.store.create_object(member).await.absorb_conflict()?;
            debug!(object = %target, ?applied, "Ensured bundle member");
            changes.count(applied);
        }

        if changes.changed > 0 {
            info!(
                created = changes.changed,
                existing = changes.unchanged,
                "Resource bundle provisioned"
            );
        }
        Ok(changes)
    }

    /// Delete the bundle. Scoped members go first unless the store cascades.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn teardown(&self, key: &IdentityKey) -> Result<BundleChanges, SyncError> {
        let bundle = self.bundle_for(key);
        let mut changes = BundleChanges::default();

        if !self.store.cascades_scoped_deletes() {
            for member in bundle.scoped_members() {
                let target = member.object_ref();
                let applied = self.store.delete_object(&target).await.absorb_not_found()?;
                debug!(object = %target, ?applied, "Removed scoped bundle member");
                changes.count(applied);
            }
        }

        let container = bundle.container.object_ref();
        let applied = self
            .store
            .delete_object(&container)
            .await
            .absorb_not_found()?;
        changes.count(applied);

        if changes.changed > 0 {
            info!(removed = changes.changed, "Resource bundle torn down");
        }
        Ok(changes)
    }
}
