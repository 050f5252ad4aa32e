//! `reclaimd run`: the long-running control loop.
//!
//! Spawns the disruption orchestrator and the orphan collector as
//! background tasks, both ticking at `poll_interval`, and stops them when
//! the shutdown channel fires.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use reclaim_cloud::CloudProvider;
use reclaim_cloud::fake::FakeCloudProvider;
use reclaim_core::ReclaimConfig;
use reclaim_disruption::{Orchestrator, PlacementOracle};
use reclaim_state::{NodePool, StateStore};
use reclaim_termination::{OrphanCollector, Terminator};

pub struct Daemon {
    orchestrator: Orchestrator,
    collector: OrphanCollector,
    poll_interval: Duration,
}

impl Daemon {
    pub fn new(
        config: &ReclaimConfig,
        store: StateStore,
        cloud: Arc<dyn CloudProvider>,
        oracle: Arc<dyn PlacementOracle>,
    ) -> anyhow::Result<Self> {
        let timings = config.disruption.timings()?;
        let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()))
            .with_call_timeout(timings.call_timeout);
        let collector = OrphanCollector::new(cloud, store.clone(), timings.orphan_min_age)
            .with_call_timeout(timings.call_timeout);
        let orchestrator = Orchestrator::new(store, terminator, oracle)
            .with_drain_timeout(timings.drain_timeout);
        Ok(Self {
            orchestrator,
            collector,
            poll_interval: timings.poll_interval,
        })
    }

    /// Run both loops until `shutdown` fires, then wait for them to stop.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Daemon {
            mut orchestrator,
            collector,
            poll_interval,
        } = self;
        let orchestrator_shutdown = shutdown.clone();
        let collector_shutdown = shutdown;

        let orchestrator_handle = tokio::spawn(async move {
            orchestrator.run(poll_interval, orchestrator_shutdown).await;
        });
        let collector_handle = tokio::spawn(async move {
            collector.run(poll_interval, collector_shutdown).await;
        });

        orchestrator_handle
            .await
            .context("disruption orchestrator task failed")?;
        collector_handle
            .await
            .context("orphan collector task failed")?;
        info!("reclaimd stopped");
        Ok(())
    }
}

/// Write every configured pool to the store. Returns the pool count.
pub fn sync_pools(config: &ReclaimConfig, store: &StateStore) -> anyhow::Result<usize> {
    for pool in &config.node_pools {
        store.put_pool(&NodePool::from_config(pool)?)?;
    }
    Ok(config.node_pools.len())
}

/// Register the instance behind every persisted claim with the in-memory
/// provider, so a restarted `run` sees the fleet it left behind.
pub fn mirror_claims(store: &StateStore, cloud: &FakeCloudProvider) -> anyhow::Result<usize> {
    let mut mirrored = 0;
    for claim in store.list_claims()? {
        if let Some(provider_id) = claim.provider_id() {
            cloud.insert_instance(provider_id, &claim.node_pool);
            mirrored += 1;
        }
    }
    Ok(mirrored)
}

pub fn open_store(path: &Path) -> anyhow::Result<StateStore> {
    StateStore::open(path).with_context(|| format!("opening state file {}", path.display()))
}
