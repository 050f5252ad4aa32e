//! The placement/eviction oracle.
//!
//! Whether a node's workloads fit elsewhere (anti-affinity, disruption
//! limits, capacity) is decided by the cluster's scheduling simulator.
//! The orchestrator only consumes its answers through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A workload running on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    /// Requested CPU in millicores.
    pub cpu_millis: u64,
    /// Pods sharing a group may not share a node.
    pub anti_affinity_group: Option<String>,
}

impl PodRef {
    pub fn new(namespace: &str, name: &str, cpu_millis: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            cpu_millis,
            anti_affinity_group: None,
        }
    }

    pub fn with_anti_affinity(mut self, group: &str) -> Self {
        self.anti_affinity_group = Some(group.to_string());
        self
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[async_trait]
pub trait PlacementOracle: Send + Sync {
    /// Workloads currently bound to `node`.
    async fn pods_on(&self, node: &str) -> anyhow::Result<Vec<PodRef>>;

    /// Whether every workload on `node` can be placed on another node
    /// right now.
    async fn can_relocate(&self, node: &str) -> anyhow::Result<bool>;

    /// Evict one workload so the scheduler can place it elsewhere.
    async fn evict(&self, pod: &PodRef) -> anyhow::Result<()>;
}
