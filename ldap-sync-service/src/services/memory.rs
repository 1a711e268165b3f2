//! In-process resource store for tests and local dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::store::{ResourceStore, StoreError};
use crate::models::{BundleObject, BundleState, IdentityKey, IdentityRecord, ObjectRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListRecords,
    GetRecord,
    CreateRecord,
    DeleteRecord,
    SetBundleState,
    CreateObject,
    DeleteObject,
}

/// One call observed by the store, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub target: String,
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<IdentityKey, BundleState>,
    objects: BTreeMap<ObjectRef, BundleObject>,
    faults: HashMap<(StoreOp, String), u32>,
    calls: Vec<StoreCall>,
}

impl MemoryState {
    /// Log the call and consume a pending injected fault, if any.
    fn enter(&mut self, op: StoreOp, target: &str) -> Result<(), StoreError> {
        self.calls.push(StoreCall {
            op,
            target: target.to_string(),
        });

        let fault_key = (op, target.to_string());
        match self.faults.get_mut(&fault_key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(anyhow::anyhow!(
                    "injected fault on {:?} {}",
                    op,
                    target
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Map-backed [`ResourceStore`] with Kubernetes-like create/delete semantics.
///
/// Creating a namespaced object inside a missing namespace fails with `NotFound`.
/// Whether deleting a namespace removes its contents is chosen at construction.
pub struct InMemoryResourceStore {
    state: Mutex<MemoryState>,
    cascade_deletes: bool,
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResourceStore {
    /// A store whose namespace deletion cascades, like Kubernetes.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            cascade_deletes: true,
        }
    }

    /// A store that leaves scoped objects behind when their namespace is deleted.
    pub fn without_cascade() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            cascade_deletes: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a record directly, bypassing the call log.
    pub fn insert_record(&self, key: &IdentityKey, state: BundleState) {
        self.lock().records.insert(key.clone(), state);
    }

    /// Seed an object directly, bypassing the call log.
    pub fn insert_object(&self, object: BundleObject) {
        self.lock().objects.insert(object.object_ref(), object);
    }

    /// Fail the next `times` calls of `op` against `target` with `Unavailable`.
    ///
    /// Record operations are targeted by key, object operations by the
    /// object's display form such as `pod/dave/dave-pod`.
    pub fn fail_next(&self, op: StoreOp, target: impl Into<String>, times: u32) {
        self.lock().faults.insert((op, target.into()), times);
    }

    pub fn record_keys(&self) -> BTreeSet<String> {
        self.lock()
            .records
            .keys()
            .map(|k| k.as_str().to_string())
            .collect()
    }

    pub fn record_state(&self, key: &str) -> Option<BundleState> {
        self.lock()
            .records
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, state)| *state)
    }

    pub fn contains(&self, target: &ObjectRef) -> bool {
        self.lock().objects.contains_key(target)
    }

    pub fn object_refs(&self) -> Vec<ObjectRef> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn list_records(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut state = self.lock();
        state.enter(StoreOp::ListRecords, "*")?;
        Ok(state
            .records
            .iter()
            .map(|(key, bundle_state)| IdentityRecord {
                key: key.clone(),
                state: *bundle_state,
            })
            .collect())
    }

    async fn get_record(&self, key: &IdentityKey) -> Result<Option<IdentityRecord>, StoreError> {
        let mut state = self.lock();
        state.enter(StoreOp::GetRecord, key.as_str())?;
        Ok(state.records.get(key).map(|bundle_state| IdentityRecord {
            key: key.clone(),
            state: *bundle_state,
        }))
    }

    async fn create_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter(StoreOp::CreateRecord, key.as_str())?;
        if state.records.contains_key(key) {
            return Err(StoreError::AlreadyExists);
        }
        state.records.insert(key.clone(), BundleState::Absent);
        Ok(())
    }

    async fn delete_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter(StoreOp::DeleteRecord, key.as_str())?;
        state
            .records
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn set_bundle_state(
        &self,
        key: &IdentityKey,
        bundle_state: BundleState,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter(StoreOp::SetBundleState, key.as_str())?;
        match state.records.get_mut(key) {
            Some(current) => {
                *current = bundle_state;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn create_object(&self, object: &BundleObject) -> Result<(), StoreError> {
        let target = object.object_ref();
        let mut state = self.lock();
        state.enter(StoreOp::CreateObject, &target.to_string())?;

        if let Some(namespace) = &target.namespace {
            let scope_exists = state
                .objects
                .keys()
                .any(|r| r.namespace.is_none() && &r.name == namespace);
            if !scope_exists {
                return Err(StoreError::NotFound);
            }
        }
        if state.objects.contains_key(&target) {
            return Err(StoreError::AlreadyExists);
        }
        state.objects.insert(target, object.clone());
        Ok(())
    }

    async fn delete_object(&self, target: &ObjectRef) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.enter(StoreOp::DeleteObject, &target.to_string())?;
        if state.objects.remove(target).is_none() {
            return Err(StoreError::NotFound);
        }
        if self.cascade_deletes && target.namespace.is_none() {
            state
                .objects
                .retain(|r, _| r.namespace.as_deref() != Some(target.name.as_str()));
        }
        Ok(())
    }

    fn cascades_scoped_deletes(&self) -> bool {
        self.cascade_deletes
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
