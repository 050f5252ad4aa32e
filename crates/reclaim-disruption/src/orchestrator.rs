//! The disruption orchestrator.
//!
//! One [`Orchestrator::evaluate`] call is one pass:
//!
//! 1. refresh per-pool budget ceilings from the current pool sizes
//! 2. reconcile tracked candidates with the store (vanished claims,
//!    crash-recovered `Terminating` claims, stray disruption cordons)
//! 3. advance every in-flight candidate one step
//! 4. select new candidates while budget remains
//!
//! Passes take `&mut self`, so two can never overlap on one orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use reclaim_core::{ClaimName, PoolName, TERMINATION_FINALIZER, epoch_secs};
use reclaim_state::{ConditionType, NodeClaim, NodePool, StateError, StateResult, StateStore};
use reclaim_termination::Terminator;

use crate::budget::{BudgetTracker, Reservation};
use crate::candidate::{Candidate, CandidatePhase, rank_candidates};
use crate::error::DisruptionResult;
use crate::events::{DisruptionEvent, EventCallback, ReleaseReason};
use crate::placement::PlacementOracle;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Bookkeeping for one tracked candidate. `reservation` is `None` for a
/// termination adopted while its pool had no free slot.
struct InFlight {
    pool: PoolName,
    phase: CandidatePhase,
    reservation: Option<Reservation>,
    drain_started: Option<Instant>,
    termination_requested: bool,
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub selected: u32,
    pub drained: u32,
    pub terminated: u32,
    pub aborted: u32,
    pub adopted: u32,
    /// Candidates holding a slot at the end of the pass, per pool.
    pub in_flight: BTreeMap<PoolName, u32>,
    /// Adopted terminations still tracked without a slot.
    pub unbudgeted: u32,
}

impl PassSummary {
    pub fn total_in_flight(&self) -> u32 {
        self.in_flight.values().sum()
    }

    /// True when the pass changed nothing and nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.selected == 0
            && self.drained == 0
            && self.terminated == 0
            && self.aborted == 0
            && self.adopted == 0
            && self.total_in_flight() == 0
            && self.unbudgeted == 0
    }
}

pub struct Orchestrator {
    state: StateStore,
    terminator: Terminator,
    oracle: Arc<dyn PlacementOracle>,
    budgets: BudgetTracker,
    drain_timeout: Duration,
    in_flight: BTreeMap<ClaimName, InFlight>,
    on_event: Option<EventCallback>,
}

impl Orchestrator {
    pub fn new(state: StateStore, terminator: Terminator, oracle: Arc<dyn PlacementOracle>) -> Self {
        Self {
            state,
            terminator,
            oracle,
            budgets: BudgetTracker::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            in_flight: BTreeMap::new(),
            on_event: None,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Receive every disruption event in addition to the log line.
    pub fn with_event_fn(mut self, f: EventCallback) -> Self {
        self.on_event = Some(f);
        self
    }

    pub fn budgets(&self) -> &BudgetTracker {
        &self.budgets
    }

    /// Tracked candidates and their phases, ordered by claim name.
    pub fn in_flight(&self) -> Vec<(ClaimName, CandidatePhase)> {
        self.in_flight
            .iter()
            .map(|(name, entry)| (name.clone(), entry.phase))
            .collect()
    }

    pub fn phase_of(&self, claim: &str) -> Option<CandidatePhase> {
        self.in_flight.get(claim).map(|entry| entry.phase)
    }

    fn emit(&self, event: DisruptionEvent) {
        event.log();
        if let Some(ref f) = self.on_event {
            f(&event);
        }
    }

    /// Run one evaluation pass.
    pub async fn evaluate(&mut self) -> DisruptionResult<PassSummary> {
        let mut summary = PassSummary::default();

        let pools = self.state.list_pools()?;
        let claims = self.state.list_claims()?;
        self.refresh_budgets(&pools, &claims);
        self.reconcile(&claims, &mut summary);

        let names: Vec<ClaimName> = self.in_flight.keys().cloned().collect();
        for name in names {
            let Some(entry) = self.in_flight.remove(&name) else {
                continue;
            };
            if let Some(entry) = self.advance(&name, entry, &mut summary).await {
                self.in_flight.insert(name, entry);
            }
        }

        self.select(&pools, &mut summary).await?;

        for entry in self.in_flight.values() {
            if entry.reservation.is_some() {
                *summary.in_flight.entry(entry.pool.clone()).or_default() += 1;
            } else {
                summary.unbudgeted += 1;
            }
        }
        debug!(
            selected = summary.selected,
            drained = summary.drained,
            terminated = summary.terminated,
            aborted = summary.aborted,
            in_flight = summary.total_in_flight(),
            "disruption pass complete"
        );
        Ok(summary)
    }

    fn refresh_budgets(&self, pools: &[NodePool], claims: &[NodeClaim]) {
        let mut sizes: HashMap<&str, u32> = HashMap::new();
        for claim in claims {
            *sizes.entry(claim.node_pool.as_str()).or_default() += 1;
        }
        for pool in pools {
            let size = sizes.get(pool.name.as_str()).copied().unwrap_or(0);
            self.budgets.set_ceiling(&pool.name, pool.budget.ceiling(size));
        }
    }

    fn reconcile(&mut self, claims: &[NodeClaim], summary: &mut PassSummary) {
        let present: HashMap<&str, &NodeClaim> =
            claims.iter().map(|c| (c.name.as_str(), c)).collect();

        let vanished: Vec<ClaimName> = self
            .in_flight
            .keys()
            .filter(|name| !present.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in vanished {
            if let Some(entry) = self.in_flight.remove(&name) {
                warn!(claim = %name, phase = ?entry.phase, "tracked claim vanished");
                self.release(&name, entry, ReleaseReason::Vanished);
            }
        }

        for claim in claims {
            if self.in_flight.contains_key(&claim.name) {
                continue;
            }
            if claim.is_terminating() {
                if claim.has_foreign_finalizers()
                    && claim.finalizers.iter().all(|f| f != TERMINATION_FINALIZER)
                {
                    // Already finalized by us; an external actor holds it.
                    continue;
                }
                self.adopt(claim, summary);
            } else if claim.disruption_cordon {
                // Operator cordons carry no marker and are left in place.
                match self.state.set_disruption_cordon(&claim.name, false) {
                    Ok(_) => info!(claim = %claim.name, "uncordoned untracked node"),
                    Err(e) => warn!(claim = %claim.name, error = %e, "failed to uncordon node"),
                }
            }
        }
    }

    /// Resume a termination started before a restart.
    ///
    /// The delete was already issued, so a pool with no free slot (or a
    /// ceiling of zero) does not hold it back. A slot is taken when one is
    /// free so new selections see the pool as busy.
    fn adopt(&mut self, claim: &NodeClaim, summary: &mut PassSummary) {
        let reservation = self.budgets.try_reserve(&claim.node_pool);
        if reservation.is_none() {
            debug!(claim = %claim.name, "adopting termination without a budget slot");
        }
        info!(claim = %claim.name, pool = %claim.node_pool, "resuming termination");
        self.in_flight.insert(
            claim.name.clone(),
            InFlight {
                pool: claim.node_pool.clone(),
                phase: CandidatePhase::MarkedForDeletion,
                reservation,
                drain_started: None,
                termination_requested: true,
            },
        );
        summary.adopted += 1;
    }

    /// Move one candidate forward. Returns the entry if it is still in
    /// flight; a finished entry has already released its slot.
    async fn advance(
        &self,
        name: &str,
        mut entry: InFlight,
        summary: &mut PassSummary,
    ) -> Option<InFlight> {
        if entry.phase == CandidatePhase::BudgetReserved {
            entry.phase = CandidatePhase::Draining;
            entry.drain_started = Some(Instant::now());
        }

        if entry.phase == CandidatePhase::Draining {
            match self.drain(name).await {
                Ok(0) => {
                    entry.phase = CandidatePhase::MarkedForDeletion;
                    summary.drained += 1;
                    self.emit(DisruptionEvent::Drained {
                        claim: name.to_string(),
                    });
                }
                Ok(remaining) => {
                    if self.drain_expired(&entry) {
                        self.abort(name, entry, remaining);
                        summary.aborted += 1;
                        return None;
                    }
                    debug!(claim = %name, remaining, "drain in progress");
                    return Some(entry);
                }
                Err(e) => {
                    warn!(claim = %name, error = %e, "drain step failed");
                    if self.drain_expired(&entry) {
                        self.abort(name, entry, 0);
                        summary.aborted += 1;
                        return None;
                    }
                    return Some(entry);
                }
            }
        }

        if entry.phase == CandidatePhase::MarkedForDeletion {
            let mut claim = match self.state.get_claim(name) {
                Ok(Some(claim)) => claim,
                Ok(None) => {
                    self.release(name, entry, ReleaseReason::Vanished);
                    return None;
                }
                Err(e) => {
                    warn!(claim = %name, error = %e, "failed to load claim");
                    return Some(entry);
                }
            };
            match self.terminator.ensure_terminated(&mut claim).await {
                Ok(true) => {
                    entry.phase = CandidatePhase::Terminated;
                    summary.terminated += 1;
                    self.emit(DisruptionEvent::Terminated {
                        claim: name.to_string(),
                    });
                }
                Ok(false) => {
                    if !entry.termination_requested {
                        entry.termination_requested = true;
                        self.emit(DisruptionEvent::TerminationRequested {
                            claim: name.to_string(),
                        });
                    }
                    return Some(entry);
                }
                Err(e) => {
                    self.emit(DisruptionEvent::TerminationFailed {
                        claim: name.to_string(),
                        error: e.to_string(),
                        permanent: e.is_permanent(),
                    });
                    return Some(entry);
                }
            }
        }

        // Terminated: clear our finalizer before the slot goes back.
        if let Err(e) = self.finalize(name) {
            warn!(claim = %name, error = %e, "failed to finalize terminated claim");
            return Some(entry);
        }
        self.release(name, entry, ReleaseReason::Terminated);
        None
    }

    /// Evict everything on the node and report how many pods remain.
    async fn drain(&self, name: &str) -> anyhow::Result<usize> {
        let pods = self.oracle.pods_on(name).await?;
        if pods.is_empty() {
            return Ok(0);
        }
        for pod in &pods {
            if let Err(e) = self.oracle.evict(pod).await {
                debug!(claim = %name, pod = %pod.key(), error = %e, "eviction refused");
            }
        }
        Ok(self.oracle.pods_on(name).await?.len())
    }

    fn drain_expired(&self, entry: &InFlight) -> bool {
        entry
            .drain_started
            .is_none_or(|started| started.elapsed() >= self.drain_timeout)
    }

    fn abort(&self, name: &str, entry: InFlight, remaining_pods: usize) {
        self.emit(DisruptionEvent::DrainTimedOut {
            claim: name.to_string(),
            remaining_pods,
        });
        // A failed uncordon is retried by the stray-cordon sweep next pass.
        if let Err(e) = self.state.set_disruption_cordon(name, false) {
            warn!(claim = %name, error = %e, "failed to uncordon aborted node");
        }
        self.release(name, entry, ReleaseReason::Aborted);
    }

    fn finalize(&self, name: &str) -> StateResult<()> {
        let claim = match self.state.remove_finalizer(name, TERMINATION_FINALIZER) {
            Ok(claim) => claim,
            Err(StateError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if claim.finalizers.is_empty() {
            self.state.delete_claim(name)?;
        } else {
            info!(claim = %name, finalizers = ?claim.finalizers, "claim retained by external finalizers");
        }
        Ok(())
    }

    fn release(&self, name: &str, entry: InFlight, reason: ReleaseReason) {
        if let Some(reservation) = entry.reservation {
            self.budgets.release(reservation);
        }
        self.emit(DisruptionEvent::Released {
            claim: name.to_string(),
            pool: entry.pool,
            reason,
        });
    }

    fn is_eligible(&self, claim: &NodeClaim, pool: &NodePool, now: u64) -> bool {
        !self.in_flight.contains_key(&claim.name)
            && claim.conditions.is_true(ConditionType::Initialized)
            && !claim.is_terminating()
            && !claim.do_not_disrupt
            && !claim.cordoned
            && !claim.has_foreign_finalizers()
            && now.saturating_sub(claim.created_at) >= pool.consolidate_after_secs
    }

    async fn select(&mut self, pools: &[NodePool], summary: &mut PassSummary) -> DisruptionResult<()> {
        let pools: HashMap<&str, &NodePool> = pools.iter().map(|p| (p.name.as_str(), p)).collect();
        let claims = self.state.list_claims()?;
        let now = epoch_secs();

        let mut candidates = Vec::new();
        for claim in &claims {
            let Some(pool) = pools.get(claim.node_pool.as_str()) else {
                continue;
            };
            if !self.is_eligible(claim, pool, now) {
                continue;
            }
            match self.oracle.pods_on(&claim.name).await {
                Ok(pods) => candidates.push(Candidate::new(claim, &pods)),
                Err(e) => warn!(claim = %claim.name, error = %e, "failed to list pods"),
            }
        }
        rank_candidates(&mut candidates);

        for candidate in candidates {
            if self.budgets.available(&candidate.pool) == 0 {
                continue;
            }
            // Checked in rank order, so earlier selections are already cordoned.
            if !candidate.is_empty() {
                match self.oracle.can_relocate(&candidate.claim).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(claim = %candidate.claim, "workloads cannot be relocated");
                        continue;
                    }
                    Err(e) => {
                        warn!(claim = %candidate.claim, error = %e, "relocation check failed");
                        continue;
                    }
                }
            }
            let Some(reservation) = self.budgets.try_reserve(&candidate.pool) else {
                continue;
            };
            if let Err(e) = self.state.set_disruption_cordon(&candidate.claim, true) {
                warn!(claim = %candidate.claim, error = %e, "failed to cordon candidate");
                self.budgets.release(reservation);
                continue;
            }

            self.emit(DisruptionEvent::Selected {
                claim: candidate.claim.clone(),
                pool: candidate.pool.clone(),
                score: candidate.score,
            });
            self.in_flight.insert(
                candidate.claim,
                InFlight {
                    pool: candidate.pool,
                    phase: CandidatePhase::BudgetReserved,
                    reservation: Some(reservation),
                    drain_started: None,
                    termination_requested: false,
                },
            );
            summary.selected += 1;
        }
        Ok(())
    }

    /// Run evaluation passes every `interval` until `shutdown` fires.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            "disruption orchestrator started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate().await {
                        tracing::error!(error = %e, "disruption pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(in_flight = self.in_flight.len(), "disruption orchestrator shutting down");
                    break;
                }
            }
        }
    }
}
