//! Kubernetes-backed resource store.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Container, Namespace, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{instrument, warn};

use super::store::{ResourceStore, StoreError};
use crate::models::{
    BundleObject, BundleState, IdentityKey, IdentityRecord, LdapUser, ObjectRef, ResourceKind,
};

const WORKLOAD_CONTAINER: &str = "workload";

/// [`ResourceStore`] over the Kubernetes API.
///
/// Identity records are `LdapUser` objects in one namespace. A bundle is a
/// `Namespace` plus a `ConfigMap` and a `Pod` inside it; deleting the namespace
/// deletes its contents.
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
    records: Api<LdapUser>,
    namespaces: Api<Namespace>,
    request_timeout: Duration,
}

impl KubeResourceStore {
    pub fn new(client: Client, record_namespace: &str, request_timeout: Duration) -> Self {
        Self {
            records: Api::namespaced(client.clone(), record_namespace),
            namespaces: Api::all(client.clone()),
            client,
            request_timeout,
        }
    }

    /// The records API, for the change-notification watcher.
    pub fn records(&self) -> Api<LdapUser> {
        self.records.clone()
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn call<T>(
        &self,
        operation: &str,
        request: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(StoreError::Unavailable(anyhow::anyhow!(
                "{} timed out after {:?}",
                operation,
                self.request_timeout
            ))),
        }
    }
}

/// Map API status codes onto the store's idempotency outcomes.
fn classify(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists
        }
        other => StoreError::Unavailable(anyhow::Error::new(other)),
    }
}

fn scoped_namespace(target: &ObjectRef) -> Result<&str, StoreError> {
    target.namespace.as_deref().ok_or_else(|| {
        StoreError::Unavailable(anyhow::anyhow!("{} has no namespace", target))
    })
}

/// Records are addressed by object name; `spec.username` is informational.
fn to_record(user: LdapUser) -> Option<IdentityRecord> {
    let state = user.bundle_state();
    let name = user.name_any();
    if user.spec.username != name {
        warn!(record = %name, username = %user.spec.username, "Record name differs from its username, keying by name");
    }
    match IdentityKey::parse(&name) {
        Ok(key) => Some(IdentityRecord { key, state }),
        Err(e) => {
            warn!(record = %name, error = %e, "Ignoring identity record with an unusable name");
            None
        }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    #[instrument(skip(self))]
    async fn list_records(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let list = self
            .call("list records", self.records.list(&ListParams::default()))
            .await?;
        Ok(list.items.into_iter().filter_map(to_record).collect())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_record(&self, key: &IdentityKey) -> Result<Option<IdentityRecord>, StoreError> {
        let user = self
            .call("get record", self.records.get_opt(key.as_str()))
            .await?;
        Ok(user.and_then(to_record))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn create_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        let record = LdapUser::for_key(key);
        self.call(
            "create record",
            self.records.create(&PostParams::default(), &record),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete_record(&self, key: &IdentityKey) -> Result<(), StoreError> {
        self.call(
            "delete record",
            self.records.delete(key.as_str(), &DeleteParams::default()),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self), fields(key = %key, state = %state))]
    async fn set_bundle_state(
        &self,
        key: &IdentityKey,
        state: BundleState,
    ) -> Result<(), StoreError> {
        let patch = json!({
            "status": {
                "bundleState": state,
                "lastTransitionTime": Utc::now().to_rfc3339(),
            }
        });
        self.call(
            "patch record status",
            self.records
                .patch_status(key.as_str(), &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, object), fields(object = %object.object_ref()))]
    async fn create_object(&self, object: &BundleObject) -> Result<(), StoreError> {
        let params = PostParams::default();
        match object {
            BundleObject::Namespace { name, labels } => {
                let namespace = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                self.call("create namespace", self.namespaces.create(&params, &namespace))
                    .await
                    .map(|_| ())
            }
            BundleObject::ConfigMap {
                namespace,
                name,
                labels,
                data,
            } => {
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.clone()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    data: Some(data.clone()),
                    ..Default::default()
                };
                self.call(
                    "create configmap",
                    self.config_maps(namespace).create(&params, &config_map),
                )
                .await
                .map(|_| ())
            }
            BundleObject::Pod {
                namespace,
                name,
                labels,
                image,
                command,
            } => {
                let pod = Pod {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.clone()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: WORKLOAD_CONTAINER.to_string(),
                            image: Some(image.clone()),
                            command: Some(command.clone()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                self.call("create pod", self.pods(namespace).create(&params, &pod))
                    .await
                    .map(|_| ())
            }
        }
    }

    #[instrument(skip(self), fields(object = %target))]
    async fn delete_object(&self, target: &ObjectRef) -> Result<(), StoreError> {
        let params = DeleteParams::default();
        match target.kind {
            ResourceKind::Namespace => self
                .call("delete namespace", self.namespaces.delete(&target.name, &params))
                .await
                .map(|_| ()),
            ResourceKind::ConfigMap => {
                let namespace = scoped_namespace(target)?;
                self.call(
                    "delete configmap",
                    self.config_maps(namespace).delete(&target.name, &params),
                )
                .await
                .map(|_| ())
            }
            ResourceKind::Pod => {
                let namespace = scoped_namespace(target)?;
                self.call(
                    "delete pod",
                    self.pods(namespace).delete(&target.name, &params),
                )
                .await
                .map(|_| ())
            }
        }
    }

    fn cascades_scoped_deletes(&self) -> bool {
        true
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.call("apiserver version", self.client.apiserver_version())
            .await
            .map(|_| ())
    }
}
