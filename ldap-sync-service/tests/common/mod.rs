//! Common test utilities for ldap-sync-service integration tests.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use ldap_sync_service::error::SyncError;
use ldap_sync_service::models::{
    BundleObject, BundleState, BundleTemplate, DirectorySnapshot, IdentityKey, IdentityRecord,
    ObjectRef,
};
use ldap_sync_service::services::memory::StoreOp;
use ldap_sync_service::services::{
    BulkSyncEngine, DirectoryClient, IdentityReconciler, InMemoryResourceStore,
    ResourceBundleProvisioner, ResourceStore, StoreError,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ldap_sync_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn key(raw: &str) -> IdentityKey {
    IdentityKey::parse(raw).expect("test keys are valid")
}

/// Directory whose membership is set by the test.
#[derive(Default)]
pub struct StaticDirectory {
    members: Mutex<DirectorySnapshot>,
    unavailable: AtomicBool,
}

#[allow(dead_code)]
impl StaticDirectory {
    pub fn with_members(members: &[&str]) -> Arc<Self> {
        let directory = Arc::new(Self::default());
        directory.set_members(members);
        directory
    }

    pub fn set_members(&self, members: &[&str]) {
        *self.members.lock().unwrap() = members.iter().map(|m| m.to_string()).collect();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::DirectoryUnavailable(anyhow::anyhow!(
                "connection refused"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn fetch_all(&self) -> Result<DirectorySnapshot, SyncError> {
        self.check()?;
        Ok(self.members.lock().unwrap().clone())
    }

    async fn fetch_one(&self, key: &IdentityKey) -> Result<bool, SyncError> {
        self.check()?;
        Ok(self.members.lock().unwrap().contains(key.as_str()))
    }
}

/// The full reconciliation core wired over an in-memory store.
#[allow(dead_code)]
pub struct TestHarness {
    pub directory: Arc<StaticDirectory>,
    pub store: Arc<InMemoryResourceStore>,
    pub provisioner: Arc<ResourceBundleProvisioner>,
    pub reconciler: IdentityReconciler,
    pub engine: Arc<BulkSyncEngine>,
}

#[allow(dead_code)]
impl TestHarness {
    pub fn new(members: &[&str]) -> Self {
        Self::with_store(members, InMemoryResourceStore::new())
    }

    pub fn with_store(members: &[&str], store: InMemoryResourceStore) -> Self {
        init_tracing();

        let directory = StaticDirectory::with_members(members);
        let store = Arc::new(store);
        let provisioner = Arc::new(ResourceBundleProvisioner::new(
            store.clone(),
            BundleTemplate::default(),
        ));
        let reconciler =
            IdentityReconciler::new(directory.clone(), store.clone(), provisioner.clone());
        let engine = Arc::new(BulkSyncEngine::new(
            directory.clone(),
            store.clone(),
            provisioner.clone(),
            4,
        ));

        Self {
            directory,
            store,
            provisioner,
            reconciler,
            engine,
        }
    }

    /// Whether every member of `raw`'s bundle exists.
    pub fn has_bundle(&self, raw: &str) -> bool {
        self.provisioner
            .bundle_for(&key(raw))
            .creation_order()
            .iter()
            .all(|member| self.store.contains(&member.object_ref()))
    }

    /// Whether no member of `raw`'s bundle exists.
    pub fn has_no_bundle(&self, raw: &str) -> bool {
        self.provisioner
            .bundle_for(&key(raw))
            .creation_order()
            .iter()
            .all(|member| !self.store.contains(&member.object_ref()))
    }
}

/// Store that runs a one-shot hook just before a chosen call reaches the inner
/// in-memory store, so another pass can be slotted into the middle of this one.
///
/// Hooks should act on `inner` directly; going through this wrapper again would
/// re-enter the hook table.
#[allow(dead_code)]
pub struct InterleavingStore {
    pub inner: Arc<InMemoryResourceStore>,
    hooks: Mutex<HashMap<(StoreOp, String), BoxFuture<'static, ()>>>,
}

#[allow(dead_code)]
impl InterleavingStore {
    pub fn new(inner: Arc<InMemoryResourceStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hooks: Mutex::new(HashMap::new()),
        })
    }

    /// Run `hook` once, before the next `op` against `target`.
    pub fn before<F>(&self, op: StoreOp, target: impl Into<String>, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .lock()
            .unwrap()
            .insert((op, target.into()), hook.boxed());
    }

    async fn interleave(&self, op: StoreOp, target: &str) {
        let hook = self.hooks.lock().unwrap().remove(&(op, target.to_string()));
        if let Some(hook) = hook {
            hook.await;
        }
    }
}

#[async_trait]
impl ResourceStore for InterleavingStore {
    async fn list_records(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        self.interleave(StoreOp::ListRecords, "*").await;
        self.inner.list_records().await
    }

    async fn get_record(&self, key: &IdentityKey) -> Result<Option<IdentityRecord>, StoreError> {
        self.interleave(StoreOp::GetRecord, key.as_str()).await;
        self.inner.get_record(key).await
    }

    async fn create_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        self.interleave(StoreOp::CreateRecord, key.as_str()).await;
        self.inner.create_record(key).await
    }

    async fn delete_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        self.interleave(StoreOp::DeleteRecord, key.as_str()).await;
        self.inner.delete_record(key).await
    }

    async fn set_bundle_state(
        &self,
        key: &IdentityKey,
        state: BundleState,
    ) -> Result<(), StoreError> {
        self.interleave(StoreOp::SetBundleState, key.as_str()).await;
        self.inner.set_bundle_state(key, state).await
    }

    async fn create_object(&self, object: &BundleObject) -> Result<(), StoreError> {
        self.interleave(StoreOp::CreateObject, &object.object_ref().to_string())
            .await;
        self.inner.create_object(object).await
    }

    async fn delete_object(&self, target: &ObjectRef) -> Result<(), StoreError> {
        self.interleave(StoreOp::DeleteObject, &target.to_string())
            .await;
        self.inner.delete_object(target).await
    }

    fn cascades_scoped_deletes(&self) -> bool {
        self.inner.cascades_scoped_deletes()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

/// What a bulk pass does to a key that left the directory: tear the bundle
/// down, then delete the record. Runs straight against `store`.
#[allow(dead_code)]
pub async fn bulk_remove(store: Arc<InMemoryResourceStore>, raw: &str) {
    let provisioner = ResourceBundleProvisioner::new(store.clone(), BundleTemplate::default());
    provisioner.teardown(&key(raw)).await.unwrap();
    store.delete_record(&key(raw)).await.unwrap();
}
