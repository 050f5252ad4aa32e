//! reclaim-state: embedded state store for node claims and node pools.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the records the disruption control plane reads and writes.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Claims are keyed by name, pools by pool name.
//!
//! Every claim write goes through the condition transition table in
//! [`Conditions`]: a write that would flip a monotonic condition back to
//! false, or change an already-assigned provider id, is rejected with
//! [`StateError::InvalidTransition`].
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult, StorageOp};
pub use store::{ClaimStatusWriter, StateStore};
pub use types::*;
