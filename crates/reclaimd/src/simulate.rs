//! `reclaimd simulate`: a scale-down played out against the in-memory
//! provider and scheduler.
//!
//! Launches `nodes` instances in the first configured pool, schedules one
//! anti-affine web replica per node, scales the replicas down, and runs
//! orphan collection plus one orchestrator pass per step until the fleet
//! settles or `passes` is reached.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use reclaim_cloud::fake::FakeCloudProvider;
use reclaim_cloud::{CloudProvider, Instance, InstancePhase, InstanceSpec};
use reclaim_core::{BudgetLimit, ReclaimConfig, epoch_secs};
use reclaim_disruption::{Orchestrator, PassSummary, PodRef, SimulatedScheduler};
use reclaim_state::{ConditionType, NodeClaim, NodePool, StateStore};
use reclaim_termination::{OrphanCollector, Terminator};

const NODE_CPU_MILLIS: u64 = 2000;
const REPLICA_CPU_MILLIS: u64 = 1000;
const INSTANCE_TYPE: &str = "fake.standard";

pub struct SimulateArgs {
    pub config: Option<PathBuf>,
    pub nodes: usize,
    pub replicas: usize,
    pub passes: usize,
    pub budget: Option<BudgetLimit>,
    pub shutdown_polls: u32,
    pub orphans: usize,
    pub state: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct PassReport {
    pub pass: usize,
    #[serde(flatten)]
    pub summary: PassSummary,
    pub claims: usize,
    pub instances: usize,
    pub orphans_collected: usize,
}

#[derive(Debug, Serialize)]
pub struct SimulationOutcome {
    pub passes: usize,
    pub remaining_claims: Vec<String>,
    pub instances: usize,
    pub evictions: u32,
    pub refused_evictions: u32,
    pub stranded_pods: usize,
}

fn load_config(args: &SimulateArgs) -> anyhow::Result<ReclaimConfig> {
    let mut config = match &args.config {
        Some(path) => ReclaimConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ReclaimConfig::scaffold("default", args.budget.unwrap_or_default()),
    };
    if let Some(budget) = args.budget
        && let Some(pool) = config.node_pools.first_mut()
    {
        pool.budget = budget;
    }
    Ok(config)
}

/// Launch one instance and record its claim as fully initialized.
async fn launch_node(
    cloud: &FakeCloudProvider,
    store: &StateStore,
    pool: &NodePool,
    index: usize,
) -> anyhow::Result<String> {
    let provider_id = cloud
        .create(&InstanceSpec {
            node_pool: pool.name.clone(),
            instance_type: INSTANCE_TYPE.to_string(),
            capacity_cpu_millis: NODE_CPU_MILLIS,
        })
        .await?;

    let now = epoch_secs();
    let name = format!("{}-{index:03}", pool.name);
    let mut claim = NodeClaim::new(
        &name,
        &pool.name,
        NODE_CPU_MILLIS,
        now.saturating_sub(pool.consolidate_after_secs),
    );
    claim.set_provider_id(&provider_id)?;
    for kind in [
        ConditionType::Launched,
        ConditionType::Registered,
        ConditionType::Initialized,
    ] {
        claim.conditions.set(kind, true, now)?;
    }
    store.put_claim(&claim)?;
    Ok(name)
}

pub async fn run_simulation(
    args: &SimulateArgs,
    mut report: impl FnMut(&PassReport),
) -> anyhow::Result<SimulationOutcome> {
    let config = load_config(args)?;
    let timings = config.disruption.timings()?;

    let store = match &args.state {
        Some(path) => StateStore::open(path)?,
        None => StateStore::open_in_memory()?,
    };
    for pool in &config.node_pools {
        store.put_pool(&NodePool::from_config(pool)?)?;
    }
    let Some(pool) = config.node_pools.first() else {
        bail!("config defines no node pools");
    };
    let pool = NodePool::from_config(pool)?;

    let cloud = Arc::new(FakeCloudProvider::new().with_shutdown_polls(args.shutdown_polls));
    let sim = Arc::new(SimulatedScheduler::new(store.clone()));

    for i in 0..args.nodes {
        launch_node(&cloud, &store, &pool, i).await?;
    }
    for i in 0..args.nodes {
        let pod = PodRef::new("default", &format!("web-{i:03}"), REPLICA_CPU_MILLIS)
            .with_anti_affinity("web");
        let node = sim.schedule(pod)?;
        debug!(replica = i, %node, "replica scheduled");
    }
    for i in 0..args.orphans {
        cloud.insert(Instance {
            provider_id: format!("fake:///orphan/{i}"),
            node_pool: pool.name.clone(),
            instance_type: INSTANCE_TYPE.to_string(),
            phase: InstancePhase::Running,
            launched_at: 0,
        });
    }
    info!(
        nodes = args.nodes,
        orphans = args.orphans,
        pool = %pool.name,
        budget = %pool.budget,
        "fleet launched"
    );

    sim.scale_group("web", args.replicas);

    let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()))
        .with_call_timeout(timings.call_timeout);
    let collector = OrphanCollector::new(cloud.clone(), store.clone(), timings.orphan_min_age)
        .with_call_timeout(timings.call_timeout);
    let mut orchestrator = Orchestrator::new(store.clone(), terminator, sim.clone())
        .with_drain_timeout(timings.drain_timeout);

    let mut passes = 0;
    for pass in 1..=args.passes {
        passes = pass;
        let orphans_collected = match collector.collect().await {
            Ok(ids) => ids.len(),
            Err(e) => {
                warn!(error = %e, "orphan sweep failed");
                0
            }
        };
        let summary = orchestrator.evaluate().await?;
        let idle = summary.is_idle() && orphans_collected == 0;
        report(&PassReport {
            pass,
            summary,
            claims: store.list_claims()?.len(),
            instances: cloud.instance_count(),
            orphans_collected,
        });
        if idle {
            break;
        }
    }

    let remaining_claims = store.list_claims()?.into_iter().map(|c| c.name).collect();
    let outcome = SimulationOutcome {
        passes,
        remaining_claims,
        instances: cloud.instance_count(),
        evictions: sim.eviction_count(),
        refused_evictions: sim.refused_evictions(),
        stranded_pods: sim.stranded_pods()?.len(),
    };
    info!(passes, instances = outcome.instances, "simulation finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SimulateArgs {
        SimulateArgs {
            config: None,
            nodes: 6,
            replicas: 1,
            passes: 40,
            budget: Some(BudgetLimit::Count(2)),
            shutdown_polls: 0,
            orphans: 0,
            state: None,
        }
    }

    #[tokio::test]
    async fn scale_down_settles_to_one_node() {
        let mut reports = Vec::new();
        let outcome = run_simulation(&args(), |r| reports.push(r.summary.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.remaining_claims, vec!["default-000".to_string()]);
        assert_eq!(outcome.instances, 1);
        assert_eq!(outcome.stranded_pods, 0);
        assert_eq!(outcome.evictions, 0);
        assert_eq!(outcome.refused_evictions, 0);
        assert!(outcome.passes < 40);
        assert!(reports.iter().all(|s| s.total_in_flight() <= 2));
        assert!(reports.last().unwrap().is_idle());
    }

    #[tokio::test]
    async fn orphans_are_collected() {
        let args = SimulateArgs {
            orphans: 3,
            replicas: 6,
            ..args()
        };
        let mut collected = 0;
        let outcome = run_simulation(&args, |r| collected += r.orphans_collected)
            .await
            .unwrap();

        assert_eq!(collected, 3);
        assert_eq!(outcome.remaining_claims.len(), 6);
        assert_eq!(outcome.instances, 6);
    }

    #[tokio::test]
    async fn config_without_pools_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reclaim.toml");
        std::fs::write(&path, "[disruption]\npoll_interval = \"1s\"\n").unwrap();
        let args = SimulateArgs {
            config: Some(path),
            budget: None,
            ..args()
        };

        let err = run_simulation(&args, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("no node pools"));
    }

    #[tokio::test]
    async fn persisted_state_survives_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reclaim.redb");
        let args = SimulateArgs {
            state: Some(path.clone()),
            ..args()
        };

        run_simulation(&args, |_| {}).await.unwrap();

        let store = StateStore::open(&path).unwrap();
        let claims = store.list_claims().unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(store.list_pools().unwrap().len(), 1);
    }
}
