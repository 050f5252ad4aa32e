//! reclaim-termination: retire one compute instance safely.
//!
//! The state machine has two persisted states and one implicit one:
//!
//! ```text
//! NotStarted (Terminating=false)
//!     │  delete(provider_id) ok          → set Terminating=true, not done
//!     │  delete → NotFound               → done (no get)
//!     ▼
//! Terminating (Terminating=true)
//!     │  get(provider_id) → found        → not done, poll again later
//!     │  get → NotFound                  → done
//!     ▼
//! Terminated (implicit: instance gone)
//! ```
//!
//! Each call to [`Terminator::ensure_terminated`] issues exactly one
//! provider call and is safe to repeat. Because `delete` is only issued
//! while the persisted condition is false, and the condition never resets,
//! a claim sees one `delete` over its lifetime even across restarts.
//!
//! [`OrphanCollector`] handles the reverse leak: instances the provider
//! still runs that no claim references.

pub mod error;
pub mod garbage;
pub mod terminator;

pub use error::{TerminationError, TerminationResult};
pub use garbage::OrphanCollector;
pub use terminator::{TerminationPhase, Terminator};
