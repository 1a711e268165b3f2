//! Services module for ldap-sync-service.

pub mod bulk_sync;
pub mod directory;
pub mod kube_store;
pub mod memory;
pub mod metrics;
pub mod provisioner;
pub mod reconciler;
pub mod store;

pub use bulk_sync::{BulkSyncEngine, SyncPlan, SyncReport};
pub use directory::{DirectoryClient, LdapDirectoryClient};
pub use kube_store::KubeResourceStore;
pub use memory::InMemoryResourceStore;
pub use metrics::{get_metrics, init_metrics};
pub use provisioner::ResourceBundleProvisioner;
pub use reconciler::{IdentityReconciler, ReconcileOutcome};
pub use store::{ResourceStore, StoreError};
