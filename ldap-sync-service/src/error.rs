//! Error taxonomy for the reconciliation core.

use service_core::retry::Retryable;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::services::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(anyhow::Error),

    #[error("Resource store unavailable: {0}")]
    ResourceStoreUnavailable(anyhow::Error),

    #[error("{operation} exceeded its deadline of {timeout:?}")]
    DeadlineExceeded {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid identity key '{0}': must be a lowercase RFC 1123 label of at most 63 characters")]
    InvalidIdentityKey(String),

    #[error("Bulk sync failed for {} item(s): {}", .failures.len(), summarize(.failures))]
    PartialBatchFailure { failures: Vec<ItemFailure> },
}

impl SyncError {
    /// Every failure is retryable except a key that can never be valid. A batch
    /// is worth retrying only while some of its items are.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::InvalidIdentityKey(_) => false,
            SyncError::PartialBatchFailure { failures } => failures.iter().any(|f| f.retryable),
            _ => true,
        }
    }

    /// Short label used for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::DirectoryUnavailable(_) => "directory_unavailable",
            SyncError::ResourceStoreUnavailable(_) => "resource_store_unavailable",
            SyncError::DeadlineExceeded { .. } => "deadline_exceeded",
            SyncError::Cancelled => "cancelled",
            SyncError::InvalidIdentityKey(_) => "invalid_identity_key",
            SyncError::PartialBatchFailure { .. } => "partial_batch_failure",
        }
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        SyncError::is_retryable(self)
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(source) => SyncError::ResourceStoreUnavailable(source),
            other => SyncError::ResourceStoreUnavailable(anyhow::anyhow!(
                "unexpected store outcome: {}",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Create,
    Delete,
}

impl ItemAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

/// One key the bulk pass could not converge, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: String,
    pub action: ItemAction,
    pub reason: String,
    pub retryable: bool,
}

impl ItemFailure {
    pub fn new(key: impl Into<String>, action: ItemAction, error: &SyncError) -> Self {
        Self {
            key: key.into(),
            action,
            reason: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.action.as_str(), self.key, self.reason)
    }
}

fn summarize(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(ItemFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
