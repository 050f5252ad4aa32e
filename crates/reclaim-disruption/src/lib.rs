//! reclaim-disruption: consolidation and disruption orchestration.
//!
//! Each evaluation pass re-reads every node claim, ranks the ones that
//! could be removed, and moves them through the candidate lifecycle under
//! a per-pool disruption budget:
//!
//! ```text
//! Eligible ─reserve─▶ BudgetReserved ─cordon─▶ Draining ─empty─▶ MarkedForDeletion
//!    ▲                                             │                    │ ensure_terminated
//!    └──────────── drain timeout (abort, release) ─┘                    ▼
//!                                                     Released ◀── Terminated
//! ```
//!
//! # Components
//!
//! - **`budget`**: atomic per-pool reserve/release of disruption slots
//! - **`candidate`**: candidate phases, utilization scoring, ranking
//! - **`placement`**: the placement/eviction oracle the orchestrator consults
//! - **`events`**: observable disruption events
//! - **`orchestrator`**: the single-flight evaluation pass and run loop
//! - **`sim`**: an in-memory scheduler with hostname anti-affinity
//!
//! A budget slot is held from selection until the instance is confirmed
//! gone and the claim's finalizer is cleared, or until a drain is aborted.
//! Provider errors keep the slot held, so the fleet is never disrupted
//! beyond its budget while an instance's fate is unknown.

pub mod budget;
pub mod candidate;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod placement;
pub mod sim;

pub use budget::{BudgetTracker, Reservation};
pub use candidate::{Candidate, CandidatePhase, rank_candidates, utilization};
pub use error::{DisruptionError, DisruptionResult};
pub use events::{DisruptionEvent, EventCallback, ReleaseReason};
pub use orchestrator::{Orchestrator, PassSummary};
pub use placement::{PlacementOracle, PodRef};
pub use sim::SimulatedScheduler;
