//! Change notifications: run the identity reconciler whenever a record changes.
//!
//! kube-runtime never reconciles the same object twice at once, but different
//! records are reconciled in parallel up to the configured concurrency.

use dashmap::DashMap;
use futures::StreamExt;
use kube::runtime::controller::{self, Action, Config as ControllerConfig, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use service_core::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::models::{IdentityKey, LdapUser};
use crate::services::reconciler::{IdentityReconciler, ReconcileOutcome};

/// Shared state handed to every reconcile call.
pub struct ControllerContext {
    pub reconciler: Arc<IdentityReconciler>,
    /// Requeue delay for converged records, so membership is re-verified.
    pub resync: Duration,
    pub retry: RetryConfig,
    /// Consecutive failures per record, driving the error backoff.
    failures: DashMap<String, u32>,
}

impl ControllerContext {
    pub fn new(reconciler: Arc<IdentityReconciler>, resync: Duration, retry: RetryConfig) -> Self {
        Self {
            reconciler,
            resync,
            retry,
            failures: DashMap::new(),
        }
    }

    fn next_backoff(&self, record: &str) -> Duration {
        let mut attempts = self.failures.entry(record.to_string()).or_insert(0);
        let delay = self.retry.backoff_duration(*attempts);
        *attempts = attempts.saturating_add(1);
        delay
    }

    fn reset_backoff(&self, record: &str) {
        self.failures.remove(record);
    }
}

type ControllerResult = Result<(ObjectRef<LdapUser>, Action), controller::Error<SyncError, watcher::Error>>;

/// Records are keyed by object name, which is what the store looks them up by.
pub async fn reconcile(record: Arc<LdapUser>, ctx: Arc<ControllerContext>) -> Result<Action, SyncError> {
    let name = record.name_any();
    if record.spec.username != name {
        warn!(
            record = %name,
            username = %record.spec.username,
            "Record name differs from its username, reconciling by name"
        );
    }
    let key = IdentityKey::parse(&name)?;
    let outcome = ctx.reconciler.reconcile(&key).await?;
    ctx.reset_backoff(&name);

    Ok(match outcome {
        ReconcileOutcome::Provisioned { .. } => Action::requeue(ctx.resync),
        ReconcileOutcome::Decommissioned | ReconcileOutcome::RecordGone => Action::await_change(),
    })
}

pub fn error_policy(record: Arc<LdapUser>, error: &SyncError, ctx: Arc<ControllerContext>) -> Action {
    let name = record.name_any();
    if !error.is_retryable() {
        warn!(record = %name, error = %error, "Record cannot be reconciled until it changes");
        return Action::await_change();
    }

    let delay = ctx.next_backoff(&name);
    debug!(record = %name, delay_ms = delay.as_millis() as u64, "Requeueing after failure");
    Action::requeue(delay)
}

/// Watch identity records until `shutdown` fires.
pub async fn run(
    records: Api<LdapUser>,
    ctx: Arc<ControllerContext>,
    concurrency: u16,
    shutdown: CancellationToken,
) {
    info!(concurrency, "Starting identity record controller");

    let observed = ctx.clone();
    Controller::new(records, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            observe(&observed, result);
            futures::future::ready(())
        })
        .await;

    info!("Identity record controller stopped");
}

fn observe(ctx: &ControllerContext, result: ControllerResult) {
    match result {
        Ok((object, action)) => debug!(record = %object.name, ?action, "Reconciled"),
        Err(controller::Error::ObjectNotFound(object)) => {
            // Deleted while a retry was pending; nothing will reconcile it again.
            ctx.reset_backoff(&object.name);
            debug!(record = %object.name, "Record deleted, dropping its backoff");
        }
        Err(e) => warn!(error = %e, "Controller reported an error"),
    }
}
