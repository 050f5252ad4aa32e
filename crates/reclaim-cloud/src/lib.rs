//! reclaim-cloud: the cloud provider contract consumed by the control plane.
//!
//! The provider is an asynchronous create/delete/get/list API keyed by
//! provider id. Every failure is classified into one of three kinds:
//!
//! - **NotFound**: the instance is absent. For deletion purposes this is
//!   success.
//! - **Transient**: timeouts, rate limits, network blips. Retried by the
//!   caller's backoff; no state changes.
//! - **Permanent**: authorization or validation failures. Surfaced to the
//!   caller, never retried silently.
//!
//! Deadlines are applied with [`with_deadline`]; an elapsed deadline is
//! always `Transient`, never `NotFound`.
//!
//! [`fake::FakeCloudProvider`] is an in-memory provider that records every
//! call, for tests and the `reclaimd simulate` driver.

pub mod error;
pub mod fake;
pub mod provider;

pub use error::{CloudError, CloudResult};
pub use provider::{CloudProvider, Instance, InstancePhase, InstanceSpec, with_deadline};
