//! Directory client: membership queries against the external LDAP directory.

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use secrecy::ExposeSecret;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::DirectoryConfig;
use crate::error::SyncError;
use crate::models::{DirectorySnapshot, IdentityKey};
use crate::services::metrics::DIRECTORY_QUERY_DURATION;

/// Read-only view of directory membership.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Every identifier currently matching the member filter.
    async fn fetch_all(&self) -> Result<DirectorySnapshot, SyncError>;

    /// Whether `key` is currently a directory member.
    async fn fetch_one(&self, key: &IdentityKey) -> Result<bool, SyncError>;
}

/// LDAP-backed [`DirectoryClient`].
///
/// Each call opens, binds and unbinds its own session; nothing is kept between
/// calls because idle directory sessions are not expected to survive.
pub struct LdapDirectoryClient {
    config: DirectoryConfig,
}

impl LdapDirectoryClient {
    pub fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> String {
        let scheme = if self.config.use_tls { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.config.host, self.config.port)
    }

    fn member_filter(&self) -> String {
        format!("(objectClass={})", ldap_escape(&self.config.object_class))
    }

    fn single_member_filter(&self, key: &IdentityKey) -> String {
        format!(
            "(&(objectClass={})({}={}))",
            ldap_escape(&self.config.object_class),
            self.config.id_attribute,
            ldap_escape(key.as_str())
        )
    }

    async fn open_session(&self) -> Result<Ldap, SyncError> {
        let url = self.url();
        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new().set_conn_timeout(self.config.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                SyncError::DirectoryUnavailable(
                    anyhow::Error::new(e).context(format!("failed to connect to {}", url)),
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bound = ldap
            .simple_bind(
                &self.config.bind_dn,
                self.config.bind_password.expose_secret(),
            )
            .await
            .and_then(|result| result.success());

        if let Err(e) = bound {
            close_session(&mut ldap).await;
            return Err(SyncError::DirectoryUnavailable(
                anyhow::Error::new(e)
                    .context(format!("bind failed for {}", self.config.bind_dn)),
            ));
        }

        Ok(ldap)
    }

    /// Run one subtree search in a fresh session, returning the identifier
    /// attribute of every matching entry.
    async fn search_identifiers(
        &self,
        operation: &'static str,
        filter: &str,
    ) -> Result<Vec<String>, SyncError> {
        let timer = DIRECTORY_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let mut ldap = with_deadline("directory connect", self.config.timeout, self.open_session())
            .await??;

        let searched = with_deadline(
            "directory search",
            self.config.timeout,
            ldap.search(
                &self.config.base_dn,
                Scope::Subtree,
                filter,
                vec![self.config.id_attribute.as_str()],
            ),
        )
        .await;

        close_session(&mut ldap).await;
        timer.observe_duration();

        let (entries, _) = searched?
            .and_then(|result| result.success())
            .map_err(|e| {
                SyncError::DirectoryUnavailable(
                    anyhow::Error::new(e).context(format!("search under {} failed", self.config.base_dn)),
                )
            })?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .filter_map(|entry| identifier_of(&entry, &self.config.id_attribute))
            .collect())
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    #[instrument(skip(self), fields(base_dn = %self.config.base_dn))]
    async fn fetch_all(&self) -> Result<DirectorySnapshot, SyncError> {
        let identifiers = self
            .search_identifiers("fetch_all", &self.member_filter())
            .await?;
        let snapshot: DirectorySnapshot = identifiers.into_iter().collect();

        info!(count = snapshot.len(), "Fetched directory snapshot");
        Ok(snapshot)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn fetch_one(&self, key: &IdentityKey) -> Result<bool, SyncError> {
        let identifiers = self
            .search_identifiers("fetch_one", &self.single_member_filter(key))
            .await?;
        let present = identifiers.iter().any(|id| id == key.as_str());

        debug!(present, "Checked directory membership");
        Ok(present)
    }
}

/// Best-effort unbind; the connection driver exits once the handle is dropped.
async fn close_session(ldap: &mut Ldap) {
    if let Err(e) = ldap.unbind().await {
        warn!(error = %e, "Error during LDAP unbind");
    }
}

async fn with_deadline<T>(
    operation: &'static str,
    timeout: Duration,
    future: impl Future<Output = T>,
) -> Result<T, SyncError> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| SyncError::DeadlineExceeded { operation, timeout })
}

/// First value of the identifier attribute; attribute names compare case-insensitively.
fn identifier_of(entry: &SearchEntry, attribute: &str) -> Option<String> {
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .and_then(|(_, values)| values.first().cloned())
}
