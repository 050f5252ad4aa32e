//! Disruption budgets: per-pool ceilings on concurrent disruptions.
//!
//! Reserve and release run under one mutex, so several candidates from
//! the same pool can be evaluated in a pass without over-reserving.
//! A [`Reservation`] is a move-only token: releasing consumes it, so a slot
//! cannot be released twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use reclaim_core::PoolName;

#[derive(Debug, Default, Clone, Copy)]
struct PoolBudget {
    ceiling: u32,
    in_flight: u32,
}

/// Proof that one disruption slot of `pool` is held.
#[derive(Debug)]
#[must_use = "a dropped reservation leaks a budget slot; pass it to BudgetTracker::release"]
pub struct Reservation {
    pool: PoolName,
}

impl Reservation {
    pub fn pool(&self) -> &str {
        &self.pool
    }
}

/// Tracks reservations against each pool's ceiling.
#[derive(Debug, Default)]
pub struct BudgetTracker {
    pools: Mutex<HashMap<PoolName, PoolBudget>>,
}

impl BudgetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PoolName, PoolBudget>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the ceiling for a pool.
    ///
    /// Lowering it below the number already held revokes nothing; new
    /// reservations are refused until enough slots are released.
    pub fn set_ceiling(&self, pool: &str, ceiling: u32) {
        let mut pools = self.lock();
        let budget = pools.entry(pool.to_string()).or_default();
        if budget.ceiling != ceiling {
            debug!(%pool, from = budget.ceiling, to = ceiling, "budget ceiling updated");
        }
        budget.ceiling = ceiling;
    }

    /// Reserve one slot, or `None` if the pool is at its ceiling or has
    /// no ceiling configured.
    pub fn try_reserve(&self, pool: &str) -> Option<Reservation> {
        let mut pools = self.lock();
        let budget = pools.get_mut(pool)?;
        if budget.in_flight >= budget.ceiling {
            return None;
        }
        budget.in_flight += 1;
        Some(Reservation {
            pool: pool.to_string(),
        })
    }

    /// Return a slot to its pool.
    pub fn release(&self, reservation: Reservation) {
        let mut pools = self.lock();
        if let Some(budget) = pools.get_mut(&reservation.pool) {
            budget.in_flight = budget.in_flight.saturating_sub(1);
        }
    }

    pub fn in_flight(&self, pool: &str) -> u32 {
        self.lock().get(pool).map_or(0, |b| b.in_flight)
    }

    pub fn ceiling(&self, pool: &str) -> Option<u32> {
        self.lock().get(pool).map(|b| b.ceiling)
    }

    /// Slots still free in a pool.
    pub fn available(&self, pool: &str) -> u32 {
        self.lock()
            .get(pool)
            .map_or(0, |b| b.ceiling.saturating_sub(b.in_flight))
    }
}
