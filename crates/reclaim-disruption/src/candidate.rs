//! Disruption candidates: phases, scoring, ranking.

use std::cmp::Ordering;

use reclaim_core::{ClaimName, PoolName};
use reclaim_state::NodeClaim;

use crate::placement::PodRef;

/// Where a candidate is in its disruption lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePhase {
    /// Removable, but holding no budget.
    Eligible,
    /// A budget slot is held; the node is about to be cordoned and drained.
    BudgetReserved,
    /// Workloads are being evicted.
    Draining,
    /// Drained; termination is being driven through the provider.
    MarkedForDeletion,
    /// The instance is confirmed gone.
    Terminated,
    /// Bookkeeping cleared and the budget slot returned.
    Released,
}

/// A node considered for removal in the current pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub claim: ClaimName,
    pub pool: PoolName,
    /// Requested CPU over capacity. Lower means cheaper to disrupt.
    pub score: f64,
    pub pod_count: usize,
    pub created_at: u64,
}

impl Candidate {
    pub fn new(claim: &NodeClaim, pods: &[PodRef]) -> Self {
        Self {
            claim: claim.name.clone(),
            pool: claim.node_pool.clone(),
            score: utilization(claim, pods),
            pod_count: pods.len(),
            created_at: claim.created_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pod_count == 0
    }
}

/// Fraction of the node's CPU requested by `pods`.
///
/// A node with unknown (zero) capacity counts as full unless it is empty.
pub fn utilization(claim: &NodeClaim, pods: &[PodRef]) -> f64 {
    let requested: u64 = pods.iter().map(|p| p.cpu_millis).sum();
    if claim.capacity_cpu_millis == 0 {
        return if pods.is_empty() { 0.0 } else { 1.0 };
    }
    requested as f64 / claim.capacity_cpu_millis as f64
}

/// Order candidates for disruption: lowest utilization first, then oldest,
/// then by name so the order is total.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare);
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.created_at.cmp(&b.created_at))
        .then_with(|| a.claim.cmp(&b.claim))
}
