//! Observable disruption events.
//!
//! Every event is logged through `tracing`; an optional callback receives
//! the same events, e.g. to publish them to the cluster's event stream.

use std::sync::Arc;

use tracing::{error, info, warn};

use reclaim_core::{ClaimName, PoolName};

/// Callback invoked for every disruption event.
pub type EventCallback = Arc<dyn Fn(&DisruptionEvent) + Send + Sync>;

/// Why a budget slot was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The instance is gone and the claim finalized.
    Terminated,
    /// The drain timed out; the node stays.
    Aborted,
    /// The claim disappeared from the store underneath us.
    Vanished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisruptionEvent {
    Selected {
        claim: ClaimName,
        pool: PoolName,
        score: f64,
    },
    Drained {
        claim: ClaimName,
    },
    DrainTimedOut {
        claim: ClaimName,
        remaining_pods: usize,
    },
    TerminationRequested {
        claim: ClaimName,
    },
    Terminated {
        claim: ClaimName,
    },
    TerminationFailed {
        claim: ClaimName,
        error: String,
        permanent: bool,
    },
    Released {
        claim: ClaimName,
        pool: PoolName,
        reason: ReleaseReason,
    },
}

impl DisruptionEvent {
    pub fn claim(&self) -> &str {
        match self {
            DisruptionEvent::Selected { claim, .. }
            | DisruptionEvent::Drained { claim }
            | DisruptionEvent::DrainTimedOut { claim, .. }
            | DisruptionEvent::TerminationRequested { claim }
            | DisruptionEvent::Terminated { claim }
            | DisruptionEvent::TerminationFailed { claim, .. }
            | DisruptionEvent::Released { claim, .. } => claim,
        }
    }

    pub(crate) fn log(&self) {
        match self {
            DisruptionEvent::Selected { claim, pool, score } => {
                info!(%claim, %pool, score, "selected for disruption");
            }
            DisruptionEvent::Drained { claim } => info!(%claim, "node drained"),
            DisruptionEvent::DrainTimedOut {
                claim,
                remaining_pods,
            } => {
                warn!(%claim, remaining_pods, "drain timed out, aborting disruption");
            }
            DisruptionEvent::TerminationRequested { claim } => {
                info!(%claim, "termination requested");
            }
            DisruptionEvent::Terminated { claim } => info!(%claim, "instance terminated"),
            DisruptionEvent::TerminationFailed {
                claim,
                error,
                permanent: true,
            } => {
                error!(%claim, %error, "termination blocked by permanent error");
            }
            DisruptionEvent::TerminationFailed { claim, error, .. } => {
                warn!(%claim, %error, "termination attempt failed, will retry");
            }
            DisruptionEvent::Released {
                claim,
                pool,
                reason,
            } => {
                info!(%claim, %pool, ?reason, "budget slot released");
            }
        }
    }
}
