//! The `CloudProvider` trait and the records it exchanges.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reclaim_core::ProviderId;

use crate::error::{CloudError, CloudResult};

/// Parameters for launching one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub node_pool: String,
    pub instance_type: String,
    pub capacity_cpu_millis: u64,
}

/// Provider-side lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePhase {
    Pending,
    Running,
    ShuttingDown,
}

/// The provider's record of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub provider_id: ProviderId,
    pub node_pool: String,
    pub instance_type: String,
    pub phase: InstancePhase,
    /// Unix timestamp (seconds) when the provider launched the instance.
    pub launched_at: u64,
}

/// A remote compute provider.
///
/// Implementations must report an absent instance as
/// [`CloudError::NotFound`] from both `delete` and `get`; callers rely on
/// that to treat a vanished instance as terminated.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Launch an instance and return its provider id.
    async fn create(&self, spec: &InstanceSpec) -> CloudResult<ProviderId>;

    /// Request deletion. Returns once the request is accepted, not once the
    /// instance is gone.
    async fn delete(&self, provider_id: &str) -> CloudResult<()>;

    /// Look up an instance.
    async fn get(&self, provider_id: &str) -> CloudResult<Instance>;

    /// List every instance the provider knows about.
    async fn list(&self) -> CloudResult<Vec<Instance>>;
}

/// Run a provider call under an optional deadline.
///
/// An elapsed deadline becomes [`CloudError::Transient`].
pub async fn with_deadline<T, F>(deadline: Option<Duration>, op: &str, fut: F) -> CloudResult<T>
where
    F: Future<Output = CloudResult<T>>,
{
    let Some(limit) = deadline else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            debug!(op, timeout_ms = limit.as_millis() as u64, "provider call timed out");
            Err(CloudError::Transient(format!(
                "{op} exceeded deadline of {}ms",
                limit.as_millis()
            )))
        }
    }
}
