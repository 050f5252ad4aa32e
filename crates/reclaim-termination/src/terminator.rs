//! Terminator: drives one node claim's instance to deletion.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use reclaim_cloud::{CloudProvider, with_deadline};
use reclaim_core::epoch_secs;
use reclaim_state::{ClaimStatusWriter, ConditionType, NodeClaim};

use crate::error::{TerminationError, TerminationResult};

/// Persisted phase of a claim's termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPhase {
    /// `Terminating` is false; no delete has been issued.
    NotStarted,
    /// `Terminating` is true; waiting for the provider to drop the instance.
    Terminating,
}

impl TerminationPhase {
    pub fn of(claim: &NodeClaim) -> Self {
        if claim.is_terminating() {
            TerminationPhase::Terminating
        } else {
            TerminationPhase::NotStarted
        }
    }
}

/// The termination state machine.
///
/// Holds no per-claim state: everything it needs is the claim's persisted
/// `Terminating` condition, so any retry driver works with it.
#[derive(Clone)]
pub struct Terminator {
    provider: Arc<dyn CloudProvider>,
    status: Arc<dyn ClaimStatusWriter>,
    call_timeout: Option<Duration>,
}

impl Terminator {
    pub fn new(provider: Arc<dyn CloudProvider>, status: Arc<dyn ClaimStatusWriter>) -> Self {
        Self {
            provider,
            status,
            call_timeout: None,
        }
    }

    /// Bound every provider call by `timeout`.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Advance `claim` one step toward termination.
    ///
    /// Returns `Ok(true)` once the instance is confirmed gone, `Ok(false)`
    /// while deletion is still in progress. On error the persisted
    /// condition is unchanged and the call may be retried.
    pub async fn ensure_terminated(&self, claim: &mut NodeClaim) -> TerminationResult<bool> {
        let Some(provider_id) = claim.provider_id().map(str::to_owned) else {
            if claim.conditions.is_true(ConditionType::Launched) {
                return Err(TerminationError::MissingProviderId(claim.name.clone()));
            }
            debug!(claim = %claim.name, "claim never launched, nothing to terminate");
            return Ok(true);
        };

        match TerminationPhase::of(claim) {
            TerminationPhase::Terminating => self.poll(claim, &provider_id).await,
            TerminationPhase::NotStarted => self.request_delete(claim, &provider_id).await,
        }
    }

    async fn poll(&self, claim: &NodeClaim, provider_id: &str) -> TerminationResult<bool> {
        match with_deadline(self.call_timeout, "get", self.provider.get(provider_id)).await {
            Ok(instance) => {
                debug!(
                    claim = %claim.name,
                    %provider_id,
                    phase = ?instance.phase,
                    "instance still present"
                );
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                info!(claim = %claim.name, %provider_id, "instance terminated");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn request_delete(
        &self,
        claim: &mut NodeClaim,
        provider_id: &str,
    ) -> TerminationResult<bool> {
        match with_deadline(self.call_timeout, "delete", self.provider.delete(provider_id)).await {
            Ok(()) => {
                claim.conditions = self.status.write_condition(
                    &claim.name,
                    ConditionType::Terminating,
                    true,
                    epoch_secs(),
                )?;
                info!(
                    claim = %claim.name,
                    %provider_id,
                    provider = self.provider.name(),
                    "instance deletion requested"
                );
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                info!(claim = %claim.name, %provider_id, "instance already gone");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclaim_cloud::CloudError;
    use reclaim_cloud::fake::{FakeCloudProvider, ProviderCall};
    use reclaim_state::StateStore;

    struct Harness {
        cloud: Arc<FakeCloudProvider>,
        store: StateStore,
        terminator: Terminator,
    }

    fn harness() -> Harness {
        let cloud = Arc::new(FakeCloudProvider::new());
        let store = StateStore::open_in_memory().unwrap();
        let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()));
        Harness {
            cloud,
            store,
            terminator,
        }
    }

    fn launched_claim(h: &Harness, name: &str) -> NodeClaim {
        let mut claim = NodeClaim::new(name, "default", 4000, 1000);
        let provider_id = format!("fake:///default/{name}");
        claim.set_provider_id(&provider_id).unwrap();
        claim.conditions.set(ConditionType::Launched, true, 1000).unwrap();
        h.store.put_claim(&claim).unwrap();
        h.cloud.insert_instance(&provider_id, "default");
        claim
    }

    #[tokio::test]
    async fn already_terminating_with_instance_present_does_not_delete() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");
        claim.conditions.set(ConditionType::Terminating, true, 1500).unwrap();
        h.store.put_claim(&claim).unwrap();

        let done = h.terminator.ensure_terminated(&mut claim).await.unwrap();

        assert!(!done);
        assert!(h.cloud.delete_calls().is_empty());
        assert_eq!(h.cloud.get_calls().len(), 1);
    }

    #[tokio::test]
    async fn delete_then_get_confirms_termination() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");

        let done = h.terminator.ensure_terminated(&mut claim).await.unwrap();
        assert!(!done);
        assert_eq!(h.cloud.delete_calls().len(), 1);
        assert!(claim.is_terminating());
        assert!(h.store.get_claim("a").unwrap().unwrap().is_terminating());

        let done = h.terminator.ensure_terminated(&mut claim).await.unwrap();
        assert!(done);
        assert_eq!(h.cloud.delete_calls().len(), 1);
    }

    #[tokio::test]
    async fn reregistered_instance_is_not_terminated() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");

        assert!(!h.terminator.ensure_terminated(&mut claim).await.unwrap());
        assert_eq!(h.cloud.delete_calls().len(), 1);

        h.cloud.insert_instance(claim.provider_id().unwrap(), "default");
        assert!(!h.terminator.ensure_terminated(&mut claim).await.unwrap());
        assert_eq!(h.cloud.delete_calls().len(), 1);
    }

    #[tokio::test]
    async fn not_found_on_delete_short_circuits() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");
        h.cloud
            .fail_next_delete(CloudError::NotFound("no instance exists".into()));

        let done = h.terminator.ensure_terminated(&mut claim).await.unwrap();

        assert!(done);
        assert!(h.cloud.get_calls().is_empty());
        assert_eq!(
            h.cloud.calls(),
            vec![ProviderCall::Delete(claim.provider_id().unwrap().to_string())]
        );
    }

    #[tokio::test]
    async fn repeated_calls_after_termination_stay_idempotent() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");

        h.terminator.ensure_terminated(&mut claim).await.unwrap();
        for _ in 0..3 {
            assert!(h.terminator.ensure_terminated(&mut claim).await.unwrap());
        }
        assert_eq!(h.cloud.delete_calls().len(), 1);
        assert!(claim.is_terminating());
    }

    #[tokio::test]
    async fn transient_delete_error_leaves_condition_unchanged() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");
        h.cloud.fail_next_delete(CloudError::Transient("throttled".into()));

        let err = h.terminator.ensure_terminated(&mut claim).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!claim.is_terminating());
        assert!(!h.store.get_claim("a").unwrap().unwrap().is_terminating());

        // The retry issues the one successful delete.
        assert!(!h.terminator.ensure_terminated(&mut claim).await.unwrap());
        assert!(claim.is_terminating());
    }

    #[tokio::test]
    async fn permanent_get_error_is_surfaced() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");
        h.terminator.ensure_terminated(&mut claim).await.unwrap();
        h.cloud.fail_next_get(CloudError::Permanent("unauthorized".into()));

        let err = h.terminator.ensure_terminated(&mut claim).await.unwrap_err();
        assert!(err.is_permanent());
        assert!(claim.is_terminating());
    }

    #[tokio::test]
    async fn status_write_failure_keeps_local_condition_false() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");
        h.store.delete_claim("a").unwrap();

        let err = h.terminator.ensure_terminated(&mut claim).await.unwrap_err();
        assert!(matches!(err, TerminationError::State(_)));
        assert!(!claim.is_terminating());
    }

    #[tokio::test]
    async fn stale_local_copy_does_not_overwrite_other_conditions() {
        let h = harness();
        let mut claim = launched_claim(&h, "a");
        claim.conditions.set(ConditionType::Initialized, true, 1000).unwrap();
        h.store.put_claim(&claim).unwrap();

        // The node goes NotReady after our copy was read.
        h.store
            .update_claim("a", |c| {
                c.conditions.set(ConditionType::Initialized, false, 1200)?;
                Ok(())
            })
            .unwrap();

        assert!(!h.terminator.ensure_terminated(&mut claim).await.unwrap());

        let stored = h.store.get_claim("a").unwrap().unwrap();
        assert!(stored.is_terminating());
        assert!(!stored.conditions.is_true(ConditionType::Initialized));
        // The caller's copy is refreshed from what was stored.
        assert!(!claim.conditions.is_true(ConditionType::Initialized));
    }

    #[tokio::test]
    async fn unlaunched_claim_needs_no_provider_call() {
        let h = harness();
        let mut claim = NodeClaim::new("pending", "default", 4000, 1000);

        assert!(h.terminator.ensure_terminated(&mut claim).await.unwrap());
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn launched_claim_without_provider_id_is_an_error() {
        let h = harness();
        let mut claim = NodeClaim::new("broken", "default", 4000, 1000);
        claim.conditions.set(ConditionType::Launched, true, 1000).unwrap();

        let err = h.terminator.ensure_terminated(&mut claim).await.unwrap_err();
        assert!(matches!(err, TerminationError::MissingProviderId(_)));
        assert!(h.cloud.calls().is_empty());
    }

    #[test]
    fn phase_tracks_condition() {
        let mut claim = NodeClaim::new("a", "default", 4000, 1000);
        assert_eq!(TerminationPhase::of(&claim), TerminationPhase::NotStarted);
        claim.conditions.set(ConditionType::Terminating, true, 1).unwrap();
        assert_eq!(TerminationPhase::of(&claim), TerminationPhase::Terminating);
    }
}
