//! Deterministic derivation of the resource bundle owned by one identity.

use std::collections::BTreeMap;
use std::fmt;

use super::IdentityKey;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "ldap-sync";
pub const IDENTITY_LABEL: &str = "ldap.gopkg.blog/identity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    Pod,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::ConfigMap => "configmap",
            Self::Pod => "pod",
        }
    }
}

/// Address of one object in the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.as_str(), ns, self.name),
            None => write!(f, "{}/{}", self.kind.as_str(), self.name),
        }
    }
}

/// Workload settings applied to every bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleTemplate {
    pub image: String,
    pub command: String,
}

impl Default for BundleTemplate {
    fn default() -> Self {
        Self {
            image: "busybox".to_string(),
            command: "echo Hello, Kubernetes! && sleep 3600".to_string(),
        }
    }
}

/// One member of a bundle, fully rendered and ready to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleObject {
    /// Scoping container; the other members live inside it.
    Namespace {
        name: String,
        labels: BTreeMap<String, String>,
    },
    ConfigMap {
        namespace: String,
        name: String,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    },
    Pod {
        namespace: String,
        name: String,
        labels: BTreeMap<String, String>,
        image: String,
        command: Vec<String>,
    },
}

impl BundleObject {
    pub fn object_ref(&self) -> ObjectRef {
        match self {
            Self::Namespace { name, .. } => ObjectRef {
                kind: ResourceKind::Namespace,
                namespace: None,
                name: name.clone(),
            },
            Self::ConfigMap {
                namespace, name, ..
            } => ObjectRef {
                kind: ResourceKind::ConfigMap,
                namespace: Some(namespace.clone()),
                name: name.clone(),
            },
            Self::Pod {
                namespace, name, ..
            } => ObjectRef {
                kind: ResourceKind::Pod,
                namespace: Some(namespace.clone()),
                name: name.clone(),
            },
        }
    }
}

/// The scoping container, configuration object and workload derived from one key.
///
/// Names depend only on the key, so two derivations for the same key always
/// address the same objects and distinct keys never share one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBundle {
    pub container: BundleObject,
    pub config: BundleObject,
    pub workload: BundleObject,
}

impl ResourceBundle {
    pub fn derive(key: &IdentityKey, template: &BundleTemplate) -> Self {
        let namespace = key.as_str().to_string();
        let labels = identity_labels(key);

        let mut data = BTreeMap::new();
        data.insert("username".to_string(), key.as_str().to_string());

        Self {
            container: BundleObject::Namespace {
                name: namespace.clone(),
                labels: labels.clone(),
            },
            config: BundleObject::ConfigMap {
                namespace: namespace.clone(),
                name: format!("{}-config", key),
                labels: labels.clone(),
                data,
            },
            workload: BundleObject::Pod {
                namespace,
                name: format!("{}-pod", key),
                labels,
                image: template.image.clone(),
                command: vec!["sh".to_string(), "-c".to_string(), template.command.clone()],
            },
        }
    }

    /// Creation order: the container first, since the others are scoped to it.
    pub fn creation_order(&self) -> [&BundleObject; 3] {
        [&self.container, &self.config, &self.workload]
    }

    /// Scoped members, deleted explicitly when the store does not cascade.
    pub fn scoped_members(&self) -> [&BundleObject; 2] {
        [&self.workload, &self.config]
    }
}

fn identity_labels(key: &IdentityKey) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(IDENTITY_LABEL.to_string(), key.as_str().to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> IdentityKey {
        IdentityKey::parse(raw).unwrap()
    }

    #[test]
    fn test_bundle_names_are_derived_from_key() {
        let bundle = ResourceBundle::derive(&key("alice"), &BundleTemplate::default());
        let refs: Vec<String> = bundle
            .creation_order()
            .iter()
            .map(|o| o.object_ref().to_string())
            .collect();

        assert_eq!(
            refs,
            vec![
                "namespace/alice",
                "configmap/alice/alice-config",
                "pod/alice/alice-pod"
            ]
        );
    }

    #[test]
    fn test_derivation_is_reproducible() {
        let template = BundleTemplate::default();
        assert_eq!(
            ResourceBundle::derive(&key("bob"), &template),
            ResourceBundle::derive(&key("bob"), &template)
        );
        assert_ne!(
            ResourceBundle::derive(&key("bob"), &template).container,
            ResourceBundle::derive(&key("carol"), &template).container
        );
    }

    #[test]
    fn test_workload_runs_template_command_through_shell() {
        let template = BundleTemplate {
            image: "alpine:3.20".to_string(),
            command: "sleep infinity".to_string(),
        };
        let bundle = ResourceBundle::derive(&key("dave"), &template);
        match bundle.workload {
            BundleObject::Pod { image, command, labels, .. } => {
                assert_eq!(image, "alpine:3.20");
                assert_eq!(command, vec!["sh", "-c", "sleep infinity"]);
                assert_eq!(labels.get(IDENTITY_LABEL).map(String::as_str), Some("dave"));
            }
            other => panic!("expected pod, got {:?}", other),
        }
    }
}
