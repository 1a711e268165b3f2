//! Resource store abstraction: identity records and the objects bundled for them.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{BundleObject, BundleState, IdentityKey, IdentityRecord, ObjectRef};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Unavailable(anyhow::Error),
}

/// Whether a mutating call changed the store or found it already converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
}

/// Folds the idempotent outcomes of a store call into success.
pub trait StoreOutcome {
    /// A create that hit an existing object is success.
    fn absorb_conflict(self) -> Result<Applied, StoreError>;
    /// A delete that found nothing to delete is success.
    fn absorb_not_found(self) -> Result<Applied, StoreError>;
}

impl StoreOutcome for Result<(), StoreError> {
    fn absorb_conflict(self) -> Result<Applied, StoreError> {
        match self {
            Ok(()) => Ok(Applied::Changed),
            Err(StoreError::AlreadyExists) => Ok(Applied::Unchanged),
            Err(e) => Err(e),
        }
    }

    fn absorb_not_found(self) -> Result<Applied, StoreError> {
        match self {
            Ok(()) => Ok(Applied::Changed),
            Err(StoreError::NotFound) => Ok(Applied::Unchanged),
            Err(e) => Err(e),
        }
    }
}

/// Cluster-state store holding identity records and derived resources.
///
/// Implementations are plain request/response adapters: no state is shared across
/// calls, and every call may race with another call for the same key.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_records(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    async fn get_record(&self, key: &IdentityKey) -> Result<Option<IdentityRecord>, StoreError>;

    async fn create_record(&self, key: &IdentityKey) -> Result<(), StoreError>;

    async fn delete_record(&self, key: &IdentityKey) -> Result<(), StoreError>;

    async fn set_bundle_state(
        &self,
        key: &IdentityKey,
        state: BundleState,
    ) -> Result<(), StoreError>;

    async fn create_object(&self, object: &BundleObject) -> Result<(), StoreError>;

    async fn delete_object(&self, target: &ObjectRef) -> Result<(), StoreError>;

    /// True when deleting a container also deletes everything scoped to it.
    fn cascades_scoped_deletes(&self) -> bool;

    async fn health_check(&self) -> Result<(), StoreError>;
}
