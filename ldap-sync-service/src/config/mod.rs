//! Configuration module for ldap-sync-service.

use secrecy::Secret;
use service_core::config::{self as core_config, env_or, required_env, required_env_parsed};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::models::BundleTemplate;

#[derive(Debug, Clone)]
pub struct LdapSyncConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub directory: DirectoryConfig,
    pub registry: RegistryConfig,
    pub sync: SyncConfig,
    pub bundle: BundleTemplate,
}

/// Connection and query settings for the external directory.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub bind_dn: String,
    pub bind_password: Secret<String>,
    pub base_dn: String,
    pub object_class: String,
    pub id_attribute: String,
    /// Deadline for each connect and each search.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Namespace holding the identity records.
    pub namespace: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub concurrency: usize,
    pub reconcile_concurrency: u16,
    pub resync: Duration,
}

impl LdapSyncConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = BundleTemplate::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "ldap-sync-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            directory: DirectoryConfig {
                host: required_env("LDAP_HOST")?,
                port: required_env_parsed("LDAP_PORT")?,
                use_tls: env_or("LDAP_USE_TLS", false)?,
                bind_dn: required_env("LDAP_BIND_DN")?,
                bind_password: Secret::new(required_env("LDAP_BIND_PASSWORD")?),
                base_dn: required_env("LDAP_BASE_DN")?,
                object_class: env::var("LDAP_OBJECT_CLASS")
                    .unwrap_or_else(|_| "inetOrgPerson".to_string()),
                id_attribute: env::var("LDAP_ID_ATTRIBUTE").unwrap_or_else(|_| "uid".to_string()),
                timeout: duration_secs("LDAP_TIMEOUT_SECS", 10)?,
            },
            registry: RegistryConfig {
                namespace: required_env("RECORD_NAMESPACE")?,
                request_timeout: duration_secs("STORE_TIMEOUT_SECS", 30)?,
            },
            sync: SyncConfig {
                interval: duration_secs("SYNC_INTERVAL_SECS", 60)?,
                concurrency: env_or("SYNC_CONCURRENCY", 8)?,
                reconcile_concurrency: env_or("RECONCILE_CONCURRENCY", 4)?,
                resync: duration_secs("RESYNC_SECS", 300)?,
            },
            bundle: BundleTemplate {
                image: env::var("WORKLOAD_IMAGE").unwrap_or(defaults.image),
                command: env::var("WORKLOAD_COMMAND").unwrap_or(defaults.command),
            },
        })
    }
}

/// Read a period in whole seconds. Zero is rejected: it would make every deadline
/// expire immediately and the scheduler tick without pause.
fn duration_secs(name: &str, default: u64) -> Result<Duration, AppError> {
    non_zero_secs(name, env_or(name, default)?)
}

fn non_zero_secs(name: &str, secs: u64) -> Result<Duration, AppError> {
    if secs == 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(Duration::from_secs(secs))
}
