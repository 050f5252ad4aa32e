//! Orphan collection: delete cloud instances no claim references.
//!
//! A crash between `create` and persisting the provider id leaves an
//! instance the control plane does not know about. The collector lists the
//! provider's instances and deletes those that are older than `min_age`
//! and unreferenced by any claim in the store. The age floor keeps it from
//! racing a launch that has not recorded its provider id yet.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use reclaim_cloud::{CloudProvider, InstancePhase, with_deadline};
use reclaim_core::{ProviderId, epoch_secs};
use reclaim_state::StateStore;

use crate::error::TerminationResult;

pub struct OrphanCollector {
    provider: Arc<dyn CloudProvider>,
    state: StateStore,
    min_age: Duration,
    call_timeout: Option<Duration>,
}

impl OrphanCollector {
    pub fn new(provider: Arc<dyn CloudProvider>, state: StateStore, min_age: Duration) -> Self {
        Self {
            provider,
            state,
            min_age,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Run one collection sweep. Returns the provider ids deleted.
    ///
    /// A failed `list` or store read aborts the sweep; a failed `delete`
    /// is logged and the sweep continues with the next instance.
    pub async fn collect(&self) -> TerminationResult<Vec<ProviderId>> {
        let instances = with_deadline(self.call_timeout, "list", self.provider.list()).await?;
        let claimed: HashSet<String> = self
            .state
            .list_claims()?
            .iter()
            .filter_map(|c| c.provider_id().map(str::to_owned))
            .collect();

        let now = epoch_secs();
        let min_age = self.min_age.as_secs();
        let mut collected = Vec::new();

        for instance in instances {
            if claimed.contains(&instance.provider_id)
                || instance.phase == InstancePhase::ShuttingDown
                || now.saturating_sub(instance.launched_at) < min_age
            {
                continue;
            }

            let id = instance.provider_id;
            match with_deadline(self.call_timeout, "delete", self.provider.delete(&id)).await {
                Ok(()) => {
                    info!(provider_id = %id, "deleted orphaned instance");
                    collected.push(id);
                }
                Err(e) if e.is_not_found() => {
                    debug!(provider_id = %id, "orphaned instance already gone");
                    collected.push(id);
                }
                Err(e) => {
                    warn!(provider_id = %id, error = %e, "failed to delete orphaned instance");
                }
            }
        }

        Ok(collected)
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            "orphan collector started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.collect().await {
                        Ok(ids) if !ids.is_empty() => {
                            info!(count = ids.len(), "orphan sweep complete");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "orphan sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("orphan collector shutting down");
                    break;
                }
            }
        }
    }
}
