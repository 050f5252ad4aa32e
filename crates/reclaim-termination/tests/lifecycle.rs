//! Full-lifecycle termination tests.
//!
//! Exercise the state machine the way a reconcile loop drives it: many
//! repeated calls, slow providers, and a process restart in the middle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reclaim_cloud::fake::FakeCloudProvider;
use reclaim_cloud::{CloudProvider, CloudResult, Instance, InstanceSpec};
use reclaim_state::*;
use reclaim_termination::{TerminationError, Terminator};

fn launched_claim(store: &StateStore, cloud: &FakeCloudProvider, name: &str) -> NodeClaim {
    let mut claim = NodeClaim::new(name, "default", 4000, 1000);
    let provider_id = format!("fake:///default/{name}");
    claim.set_provider_id(&provider_id).unwrap();
    claim.conditions.set(ConditionType::Launched, true, 1000).unwrap();
    store.put_claim(&claim).unwrap();
    cloud.insert_instance(&provider_id, "default");
    claim
}

#[tokio::test]
async fn exactly_one_delete_with_slow_teardown() {
    let cloud = Arc::new(FakeCloudProvider::new().with_shutdown_polls(5));
    let store = StateStore::open_in_memory().unwrap();
    let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()));
    let mut claim = launched_claim(&store, &cloud, "a");

    let mut calls = 0;
    loop {
        calls += 1;
        if terminator.ensure_terminated(&mut claim).await.unwrap() {
            break;
        }
        assert!(calls < 20, "termination never converged");
    }

    // One delete, then five polls that still see the instance, then one
    // poll that confirms it is gone.
    assert_eq!(calls, 7);
    assert_eq!(cloud.delete_calls().len(), 1);
    assert_eq!(cloud.get_calls().len(), 6);
}

#[tokio::test]
async fn restart_resumes_from_persisted_condition() {
    let cloud = Arc::new(FakeCloudProvider::new().with_shutdown_polls(1));
    let store = StateStore::open_in_memory().unwrap();
    let mut claim = launched_claim(&store, &cloud, "a");

    {
        let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()));
        assert!(!terminator.ensure_terminated(&mut claim).await.unwrap());
    }

    // A fresh process reloads the claim from the store and carries on.
    let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()));
    let mut reloaded = store.get_claim("a").unwrap().unwrap();
    assert!(reloaded.is_terminating());
    assert!(!terminator.ensure_terminated(&mut reloaded).await.unwrap());
    assert!(terminator.ensure_terminated(&mut reloaded).await.unwrap());
    assert_eq!(cloud.delete_calls().len(), 1);
}

#[tokio::test]
async fn terminating_never_resets() {
    let cloud = Arc::new(FakeCloudProvider::new());
    let store = StateStore::open_in_memory().unwrap();
    let terminator = Terminator::new(cloud.clone(), Arc::new(store.clone()));
    let mut claim = launched_claim(&store, &cloud, "a");

    terminator.ensure_terminated(&mut claim).await.unwrap();
    let first = *claim.conditions.get(ConditionType::Terminating).unwrap();

    for _ in 0..3 {
        terminator.ensure_terminated(&mut claim).await.unwrap();
        let stored = store.get_claim("a").unwrap().unwrap();
        assert_eq!(stored.conditions.get(ConditionType::Terminating), Some(&first));
    }
}

/// A provider whose calls never complete.
struct HangingProvider;

#[async_trait]
impl CloudProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn create(&self, _spec: &InstanceSpec) -> CloudResult<String> {
        std::future::pending().await
    }

    async fn delete(&self, _provider_id: &str) -> CloudResult<()> {
        std::future::pending().await
    }

    async fn get(&self, _provider_id: &str) -> CloudResult<Instance> {
        std::future::pending().await
    }

    async fn list(&self) -> CloudResult<Vec<Instance>> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_delete_is_transient_and_leaves_condition() {
    let store = StateStore::open_in_memory().unwrap();
    let mut claim = NodeClaim::new("a", "default", 4000, 1000);
    claim.set_provider_id("hang:///a").unwrap();
    claim.conditions.set(ConditionType::Launched, true, 1000).unwrap();
    store.put_claim(&claim).unwrap();

    let terminator = Terminator::new(Arc::new(HangingProvider), Arc::new(store.clone()))
        .with_call_timeout(Duration::from_secs(5));

    let err = terminator.ensure_terminated(&mut claim).await.unwrap_err();
    assert!(matches!(err, TerminationError::Cloud(ref e) if e.is_retryable()));
    assert!(!store.get_claim("a").unwrap().unwrap().is_terminating());
}
