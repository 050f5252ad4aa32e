//! In-memory scheduler used as the placement oracle in tests and in
//! `reclaimd simulate`.
//!
//! Nodes are the node claims in the shared [`StateStore`]; a node accepts
//! work while it is initialized, uncordoned and not terminating. Pods are
//! bound to nodes here. Placement is best-fit on CPU with hard
//! anti-affinity: two pods of the same group never share a node.
//!
//! Eviction is all-or-nothing per pod: an evicted pod is rebound to
//! another node in the same call, or the eviction is refused. A pod is
//! therefore never left unscheduled by an eviction; the only way to lose
//! one is to terminate its node while it is still bound, which
//! [`SimulatedScheduler::stranded_pods`] reports.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tracing::debug;

use reclaim_state::{ConditionType, NodeClaim, StateStore};

use crate::placement::{PlacementOracle, PodRef};

#[derive(Default)]
struct SimState {
    /// Pod key → (pod, node name).
    bindings: BTreeMap<String, (PodRef, String)>,
    /// Pods whose eviction is refused, like a saturated disruption budget.
    protected: HashSet<String>,
    evictions: u32,
    refused_evictions: u32,
}

#[derive(Default, Clone)]
struct NodeLoad {
    cpu_millis: u64,
    groups: HashSet<String>,
}

pub struct SimulatedScheduler {
    state: StateStore,
    sim: Mutex<SimState>,
}

impl SimulatedScheduler {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            sim: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a pod to a specific node, bypassing placement.
    pub fn bind(&self, node: &str, pod: PodRef) {
        self.lock()
            .bindings
            .insert(pod.key(), (pod, node.to_string()));
    }

    /// Place a pod with the scheduler's own policy. Returns the node.
    pub fn schedule(&self, pod: PodRef) -> anyhow::Result<String> {
        let nodes = self.schedulable_nodes()?;
        let mut sim = self.lock();
        let load = occupancy(&sim.bindings);
        let node = pick_node(&nodes, &load, &pod, None)
            .ok_or_else(|| anyhow!("no node can accept pod {}", pod.key()))?;
        sim.bindings.insert(pod.key(), (pod, node.clone()));
        Ok(node)
    }

    /// Shrink an anti-affinity group to `replicas` pods, keeping the
    /// lowest-keyed ones.
    pub fn scale_group(&self, group: &str, replicas: usize) {
        let mut sim = self.lock();
        let members: Vec<String> = sim
            .bindings
            .iter()
            .filter(|(_, (pod, _))| pod.anti_affinity_group.as_deref() == Some(group))
            .map(|(key, _)| key.clone())
            .collect();
        for key in members.into_iter().skip(replicas) {
            sim.bindings.remove(&key);
        }
    }

    /// Refuse evictions of this pod.
    pub fn protect(&self, pod_key: &str) {
        self.lock().protected.insert(pod_key.to_string());
    }

    /// Every bound pod with its node.
    pub fn bindings(&self) -> Vec<(PodRef, String)> {
        self.lock().bindings.values().cloned().collect()
    }

    pub fn eviction_count(&self) -> u32 {
        self.lock().evictions
    }

    pub fn refused_evictions(&self) -> u32 {
        self.lock().refused_evictions
    }

    /// Pods bound to a node that is gone or being terminated.
    pub fn stranded_pods(&self) -> anyhow::Result<Vec<PodRef>> {
        let live: HashSet<String> = self
            .state
            .list_claims()?
            .into_iter()
            .filter(|c| !c.is_terminating())
            .map(|c| c.name)
            .collect();
        Ok(self
            .lock()
            .bindings
            .values()
            .filter(|(_, node)| !live.contains(node))
            .map(|(pod, _)| pod.clone())
            .collect())
    }

    fn schedulable_nodes(&self) -> anyhow::Result<Vec<NodeClaim>> {
        Ok(self
            .state
            .list_claims()?
            .into_iter()
            .filter(|c| {
                c.conditions.is_true(ConditionType::Initialized)
                    && !c.cordoned
                    && !c.is_terminating()
            })
            .collect())
    }
}

fn occupancy(bindings: &BTreeMap<String, (PodRef, String)>) -> HashMap<String, NodeLoad> {
    let mut load: HashMap<String, NodeLoad> = HashMap::new();
    for (pod, node) in bindings.values() {
        let entry = load.entry(node.clone()).or_default();
        entry.cpu_millis += pod.cpu_millis;
        if let Some(group) = &pod.anti_affinity_group {
            entry.groups.insert(group.clone());
        }
    }
    load
}

/// Best fit: the most loaded node that still fits, ties to the lowest name.
fn pick_node(
    nodes: &[NodeClaim],
    load: &HashMap<String, NodeLoad>,
    pod: &PodRef,
    exclude: Option<&str>,
) -> Option<String> {
    let empty = NodeLoad::default();
    nodes
        .iter()
        .filter(|n| Some(n.name.as_str()) != exclude)
        .filter_map(|n| {
            let used = load.get(&n.name).unwrap_or(&empty);
            let fits_cpu = n.capacity_cpu_millis.saturating_sub(used.cpu_millis) >= pod.cpu_millis;
            let fits_affinity = pod
                .anti_affinity_group
                .as_ref()
                .is_none_or(|g| !used.groups.contains(g));
            (fits_cpu && fits_affinity).then_some((used.cpu_millis, &n.name))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, name)| name.clone())
}

fn add_load(load: &mut HashMap<String, NodeLoad>, node: &str, pod: &PodRef) {
    let entry = load.entry(node.to_string()).or_default();
    entry.cpu_millis += pod.cpu_millis;
    if let Some(group) = &pod.anti_affinity_group {
        entry.groups.insert(group.clone());
    }
}

#[async_trait]
impl PlacementOracle for SimulatedScheduler {
    async fn pods_on(&self, node: &str) -> anyhow::Result<Vec<PodRef>> {
        Ok(self
            .lock()
            .bindings
            .values()
            .filter(|(_, n)| n == node)
            .map(|(pod, _)| pod.clone())
            .collect())
    }

    async fn can_relocate(&self, node: &str) -> anyhow::Result<bool> {
        let nodes = self.schedulable_nodes()?;
        let sim = self.lock();
        let mut load = occupancy(&sim.bindings);

        for (pod, bound) in sim.bindings.values() {
            if bound != node {
                continue;
            }
            if sim.protected.contains(&pod.key()) {
                return Ok(false);
            }
            match pick_node(&nodes, &load, pod, Some(node)) {
                Some(dest) => add_load(&mut load, &dest, pod),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn evict(&self, pod: &PodRef) -> anyhow::Result<()> {
        let key = pod.key();
        let nodes = self.schedulable_nodes()?;
        let mut sim = self.lock();

        let Some((_, from)) = sim.bindings.get(&key).cloned() else {
            bail!("pod {key} is not bound");
        };
        if sim.protected.contains(&key) {
            sim.refused_evictions += 1;
            bail!("eviction of {key} refused by disruption budget");
        }

        let mut load = occupancy(&sim.bindings);
        if let Some(current) = load.get_mut(&from) {
            current.cpu_millis = current.cpu_millis.saturating_sub(pod.cpu_millis);
            if let Some(group) = &pod.anti_affinity_group {
                current.groups.remove(group);
            }
        }
        let Some(dest) = pick_node(&nodes, &load, pod, Some(&from)) else {
            sim.refused_evictions += 1;
            bail!("no node can accept evicted pod {key}");
        };

        debug!(pod = %key, %from, to = %dest, "pod rescheduled");
        sim.bindings.insert(key, (pod.clone(), dest));
        sim.evictions += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_node(store: &StateStore, name: &str, capacity: u64) {
        let mut claim = NodeClaim::new(name, "default", capacity, 0);
        claim.conditions.set(ConditionType::Initialized, true, 0).unwrap();
        store.put_claim(&claim).unwrap();
    }

    fn web(i: usize) -> PodRef {
        PodRef::new("default", &format!("web-{i}"), 1000).with_anti_affinity("web")
    }

    #[test]
    fn schedule_respects_anti_affinity() {
        let store = StateStore::open_in_memory().unwrap();
        ready_node(&store, "a", 4000);
        ready_node(&store, "b", 4000);
        let sim = SimulatedScheduler::new(store);

        let first = sim.schedule(web(0)).unwrap();
        let second = sim.schedule(web(1)).unwrap();
        assert_ne!(first, second);
        assert!(sim.schedule(web(2)).is_err());
    }

    #[test]
    fn schedule_prefers_fuller_node() {
        let store = StateStore::open_in_memory().unwrap();
        ready_node(&store, "a", 4000);
        ready_node(&store, "b", 4000);
        let sim = SimulatedScheduler::new(store);
        sim.bind("b", PodRef::new("default", "db", 1000));

        assert_eq!(sim.schedule(PodRef::new("default", "api", 500)).unwrap(), "b");
    }

    #[test]
    fn scale_group_keeps_lowest_keys() {
        let store = StateStore::open_in_memory().unwrap();
        let sim = SimulatedScheduler::new(store);
        for i in 0..4 {
            sim.bind(&format!("n{i}"), web(i));
        }
        sim.scale_group("web", 1);

        let left = sim.bindings();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].0.name, "web-0");
    }

    #[tokio::test]
    async fn evict_moves_pod_or_refuses() {
        let store = StateStore::open_in_memory().unwrap();
        ready_node(&store, "a", 4000);
        ready_node(&store, "b", 4000);
        let sim = SimulatedScheduler::new(store.clone());
        sim.bind("a", web(0));
        sim.bind("b", web(1));

        // b already runs a web pod; anti-affinity blocks the move.
        assert!(!sim.can_relocate("a").await.unwrap());
        assert!(sim.evict(&web(0)).await.is_err());
        assert_eq!(sim.refused_evictions(), 1);

        ready_node(&store, "c", 4000);
        assert!(sim.can_relocate("a").await.unwrap());
        sim.evict(&web(0)).await.unwrap();
        assert!(sim.pods_on("a").await.unwrap().is_empty());
        assert_eq!(sim.pods_on("c").await.unwrap(), vec![web(0)]);
    }

    #[tokio::test]
    async fn cordoned_nodes_receive_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        ready_node(&store, "a", 4000);
        ready_node(&store, "b", 4000);
        store
            .update_claim("b", |c| {
                c.cordoned = true;
                Ok(())
            })
            .unwrap();
        let sim = SimulatedScheduler::new(store);
        sim.bind("a", web(0));

        assert!(!sim.can_relocate("a").await.unwrap());
    }

    #[tokio::test]
    async fn protected_pods_block_relocation() {
        let store = StateStore::open_in_memory().unwrap();
        ready_node(&store, "a", 4000);
        ready_node(&store, "b", 4000);
        let sim = SimulatedScheduler::new(store);
        sim.bind("a", web(0));
        sim.protect("default/web-0");

        assert!(!sim.can_relocate("a").await.unwrap());
        assert!(sim.evict(&web(0)).await.is_err());
        assert_eq!(sim.refused_evictions(), 1);
        assert_eq!(sim.pods_on("a").await.unwrap(), vec![web(0)]);
    }

    #[test]
    fn stranded_pods_follow_node_removal() {
        let store = StateStore::open_in_memory().unwrap();
        ready_node(&store, "a", 4000);
        let sim = SimulatedScheduler::new(store.clone());
        sim.bind("a", web(0));
        assert!(sim.stranded_pods().unwrap().is_empty());

        store.delete_claim("a").unwrap();
        assert_eq!(sim.stranded_pods().unwrap(), vec![web(0)]);
    }
}
