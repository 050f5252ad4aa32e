//! Whole-fleet consolidation runs against the in-memory provider and
//! scheduler.

use std::sync::{Arc, Mutex};

use reclaim_cloud::fake::FakeCloudProvider;
use reclaim_core::BudgetLimit;
use reclaim_disruption::{
    DisruptionEvent, Orchestrator, PodRef, ReleaseReason, SimulatedScheduler,
};
use reclaim_state::{ConditionType, NodeClaim, NodePool, StateStore};
use reclaim_termination::Terminator;

struct Fleet {
    store: StateStore,
    cloud: Arc<FakeCloudProvider>,
    sim: Arc<SimulatedScheduler>,
    events: Arc<Mutex<Vec<DisruptionEvent>>>,
    orch: Orchestrator,
}

fn fleet(nodes: usize, budget: BudgetLimit, cloud: FakeCloudProvider) -> Fleet {
    let store = StateStore::open_in_memory().unwrap();
    store
        .put_pool(&NodePool {
            name: "default".to_string(),
            budget,
            consolidate_after_secs: 0,
        })
        .unwrap();
    let cloud = Arc::new(cloud);
    let sim = Arc::new(SimulatedScheduler::new(store.clone()));

    for i in 0..nodes {
        let name = format!("node-{i:02}");
        let provider_id = format!("fake:///default/{i}");
        let mut claim = NodeClaim::new(&name, "default", 2000, 0);
        claim.set_provider_id(&provider_id).unwrap();
        for kind in [
            ConditionType::Launched,
            ConditionType::Registered,
            ConditionType::Initialized,
        ] {
            claim.conditions.set(kind, true, 0).unwrap();
        }
        store.put_claim(&claim).unwrap();
        cloud.insert_instance(&provider_id, "default");
        sim.bind(
            &name,
            PodRef::new("default", &format!("web-{i}"), 1000).with_anti_affinity("web"),
        );
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()));
    let orch = Orchestrator::new(store.clone(), terminator, sim.clone()).with_event_fn(Arc::new(
        move |e: &DisruptionEvent| {
            sink.lock().unwrap().push(e.clone());
        },
    ));

    Fleet {
        store,
        cloud,
        sim,
        events,
        orch,
    }
}

/// Run passes until the orchestrator goes idle, checking the budget and
/// workload availability after every pass. Returns the number of passes.
async fn settle(fleet: &mut Fleet, ceiling: u32, max_passes: usize) -> usize {
    for pass in 1..=max_passes {
        let summary = fleet.orch.evaluate().await.unwrap();
        let in_flight = fleet.orch.budgets().in_flight("default");
        assert!(
            in_flight <= ceiling,
            "pass {pass}: {in_flight} in flight over ceiling {ceiling}"
        );
        assert!(summary.total_in_flight() <= ceiling);
        assert!(
            fleet.sim.stranded_pods().unwrap().is_empty(),
            "pass {pass}: a pod lost its node"
        );
        if summary.is_idle() {
            return pass;
        }
    }
    panic!("fleet did not settle within {max_passes} passes");
}

#[tokio::test]
async fn scale_down_consolidates_to_one_node() {
    let mut fleet = fleet(10, BudgetLimit::Count(2), FakeCloudProvider::new());
    fleet.sim.scale_group("web", 1);

    settle(&mut fleet, 2, 40).await;

    let remaining = fleet.store.list_claims().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "node-00");
    assert!(!remaining[0].cordoned);
    assert_eq!(fleet.cloud.instance_count(), 1);
    assert_eq!(fleet.cloud.delete_calls().len(), 9);

    let bindings = fleet.sim.bindings();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].1, "node-00");
    assert_eq!(fleet.orch.budgets().in_flight("default"), 0);
}

#[tokio::test]
async fn loaded_node_is_drained_before_removal() {
    let mut fleet = fleet(2, BudgetLimit::Count(1), FakeCloudProvider::new());
    fleet.sim.scale_group("web", 0);
    fleet.sim.bind("node-00", PodRef::new("default", "api", 500));
    fleet.sim.bind("node-01", PodRef::new("default", "worker", 500));

    settle(&mut fleet, 1, 10).await;

    assert!(fleet.sim.eviction_count() >= 1);
    let remaining = fleet.store.list_claims().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "node-01");
    assert!(!fleet.cloud.contains("fake:///default/0"));
    assert_eq!(fleet.cloud.delete_calls(), vec!["fake:///default/0".to_string()]);

    let bindings = fleet.sim.bindings();
    assert_eq!(bindings.len(), 2);
    assert!(bindings.iter().all(|(_, node)| node == "node-01"));
}

#[tokio::test]
async fn percentage_budget_with_slow_teardown() {
    // 20% of 10 nodes: two at a time while the pool is large.
    let mut fleet = fleet(
        10,
        BudgetLimit::Percent(20),
        FakeCloudProvider::new().with_shutdown_polls(3),
    );
    fleet.sim.scale_group("web", 1);

    settle(&mut fleet, 2, 80).await;

    assert_eq!(fleet.store.list_claims().unwrap().len(), 1);
    // Exactly one delete per removed instance despite repeated polling.
    let mut deletes = fleet.cloud.delete_calls();
    deletes.sort();
    deletes.dedup();
    assert_eq!(deletes.len(), 9);
    assert_eq!(fleet.cloud.delete_calls().len(), 9);
}

#[tokio::test]
async fn busy_fleet_is_left_alone() {
    // Every node runs a web replica and anti-affinity forbids doubling up.
    let mut fleet = fleet(4, BudgetLimit::Count(2), FakeCloudProvider::new());

    let passes = settle(&mut fleet, 2, 5).await;
    assert_eq!(passes, 1);
    assert_eq!(fleet.store.list_claims().unwrap().len(), 4);
    assert!(fleet.cloud.delete_calls().is_empty());
    assert_eq!(fleet.sim.eviction_count(), 0);
}

#[tokio::test]
async fn every_selection_is_released_exactly_once() {
    let mut fleet = fleet(6, BudgetLimit::Count(3), FakeCloudProvider::new());
    fleet.sim.scale_group("web", 2);

    settle(&mut fleet, 3, 40).await;

    let events = fleet.events.lock().unwrap().clone();
    let mut selected: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            DisruptionEvent::Selected { claim, .. } => Some(claim.clone()),
            _ => None,
        })
        .collect();
    let mut released: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            DisruptionEvent::Released {
                claim,
                reason: ReleaseReason::Terminated,
                ..
            } => Some(claim.clone()),
            _ => None,
        })
        .collect();
    selected.sort();
    released.sort();
    assert_eq!(selected, released);
    assert_eq!(selected.len(), 4);
    assert_eq!(fleet.store.list_claims().unwrap().len(), 2);
}
