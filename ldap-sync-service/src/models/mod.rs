//! Domain models for ldap-sync-service.

pub mod bundle;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::SyncError;

pub use bundle::{BundleObject, BundleTemplate, ObjectRef, ResourceBundle, ResourceKind};

/// Identity keys are used verbatim as namespace names and label values.
pub const MAX_IDENTITY_KEY_LEN: usize = 63;

/// Identifiers returned by one directory query.
pub type DirectorySnapshot = HashSet<String>;

// ============================================================================
// Identity Key
// ============================================================================

/// Unique identifier of a directory member.
///
/// Every derived object name is built from the key, so the key must itself be a
/// valid RFC 1123 label: lowercase alphanumerics and `-`, starting and ending with
/// an alphanumeric, at most 63 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        if is_dns_label(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(SyncError::InvalidIdentityKey(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_IDENTITY_KEY_LEN {
        return false;
    }
    let valid_char = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-';
    bytes.iter().all(valid_char)
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

// ============================================================================
// Bundle State
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BundleState {
    #[default]
    Absent,
    Provisioning,
    Provisioned,
    Decommissioning,
}

impl BundleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::Provisioning => "Provisioning",
            Self::Provisioned => "Provisioned",
            Self::Decommissioning => "Decommissioning",
        }
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Identity Record
// ============================================================================

/// A tracked identity as seen by the reconciliation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub key: IdentityKey,
    pub state: BundleState,
}

/// Desired state of an `LdapUser` record.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "ldap.gopkg.blog",
    version = "v1alpha1",
    kind = "LdapUser",
    plural = "ldapusers",
    namespaced,
    status = "LdapUserStatus",
    shortname = "ldapuser",
    printcolumn = r#"{"name":"Username","type":"string","jsonPath":".spec.username"}"#,
    printcolumn = r#"{"name":"Bundle","type":"string","jsonPath":".status.bundleState"}"#
)]
pub struct LdapUserSpec {
    /// Directory identifier this record tracks.
    pub username: String,
}

/// Observed state of an `LdapUser` record.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LdapUserStatus {
    #[serde(default)]
    pub bundle_state: BundleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl LdapUser {
    /// Build a fresh record for `key`; the object name is the key itself.
    pub fn for_key(key: &IdentityKey) -> Self {
        LdapUser::new(
            key.as_str(),
            LdapUserSpec {
                username: key.as_str().to_string(),
            },
        )
    }

    pub fn bundle_state(&self) -> BundleState {
        self.status
            .as_ref()
            .map(|s| s.bundle_state)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_accepts_dns_labels() {
        for raw in ["alice", "bob-2", "a", "0x1"] {
            assert_eq!(IdentityKey::parse(raw).unwrap().as_str(), raw);
        }
        assert!(IdentityKey::parse(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_identity_key_rejects_invalid_names() {
        for raw in ["", "Alice", "bob_smith", "-carol", "dave-", "e.f", "g h"] {
            let err = IdentityKey::parse(raw).unwrap_err();
            assert!(matches!(err, SyncError::InvalidIdentityKey(ref k) if k == raw));
        }
        assert!(IdentityKey::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_bundle_state_serializes_as_string() {
        let status = LdapUserStatus {
            bundle_state: BundleState::Provisioned,
            last_transition_time: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, serde_json::json!({ "bundleState": "Provisioned" }));

        let parsed: LdapUserStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(parsed.bundle_state, BundleState::Absent);
    }

    #[test]
    fn test_record_for_key_uses_key_as_name() {
        let key = IdentityKey::parse("alice").unwrap();
        let record = LdapUser::for_key(&key);
        assert_eq!(record.metadata.name.as_deref(), Some("alice"));
        assert_eq!(record.spec.username, "alice");
        assert_eq!(record.bundle_state(), BundleState::Absent);
    }
}
