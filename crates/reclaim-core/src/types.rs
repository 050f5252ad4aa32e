//! Shared value types used across the reclaim crates.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique name of a node claim.
pub type ClaimName = String;

/// Name of a node pool.
pub type PoolName = String;

/// Cloud provider's identifier for a compute instance.
pub type ProviderId = String;

/// Finalizer the orchestrator places on every claim it manages.
pub const TERMINATION_FINALIZER: &str = "reclaim.dev/termination";

/// Current wall-clock time as unix seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Ceiling on concurrent disruptions within one node pool.
///
/// Serialized as a bare integer (`3`) or a percentage string (`"10%"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BudgetValue", into = "BudgetValue")]
pub enum BudgetLimit {
    /// At most this many nodes disrupted at once.
    Count(u32),
    /// At most this percentage of the pool's nodes, rounded up.
    Percent(u8),
}

impl BudgetLimit {
    /// Resolve the limit against the pool's current node count.
    pub fn ceiling(&self, pool_size: u32) -> u32 {
        match *self {
            BudgetLimit::Count(n) => n,
            BudgetLimit::Percent(p) => {
                let scaled = u64::from(pool_size) * u64::from(p);
                scaled.div_ceil(100) as u32
            }
        }
    }
}

impl Default for BudgetLimit {
    fn default() -> Self {
        BudgetLimit::Percent(10)
    }
}

impl fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetLimit::Count(n) => write!(f, "{n}"),
            BudgetLimit::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl FromStr for BudgetLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let p: u8 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid budget percentage: {s}"))?;
            if p > 100 {
                return Err(format!("budget percentage above 100: {s}"));
            }
            Ok(BudgetLimit::Percent(p))
        } else {
            s.parse::<u32>()
                .map(BudgetLimit::Count)
                .map_err(|_| format!("invalid budget: {s}"))
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BudgetValue {
    Count(u32),
    Text(String),
}

impl TryFrom<BudgetValue> for BudgetLimit {
    type Error = String;

    fn try_from(value: BudgetValue) -> Result<Self, Self::Error> {
        match value {
            BudgetValue::Count(n) => Ok(BudgetLimit::Count(n)),
            BudgetValue::Text(s) => s.parse(),
        }
    }
}

impl From<BudgetLimit> for BudgetValue {
    fn from(limit: BudgetLimit) -> Self {
        match limit {
            BudgetLimit::Count(n) => BudgetValue::Count(n),
            BudgetLimit::Percent(_) => BudgetValue::Text(limit.to_string()),
        }
    }
}
