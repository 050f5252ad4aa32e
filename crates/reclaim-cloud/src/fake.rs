//! In-memory cloud provider with a call log.
//!
//! Each test constructs its own `FakeCloudProvider`; nothing is shared
//! between instances. Failures are injected one call at a time with the
//! `fail_next_*` methods, and `calls()` returns everything the provider
//! has seen so assertions work on plain values.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use reclaim_core::{ProviderId, epoch_secs};

use crate::error::{CloudError, CloudResult};
use crate::provider::{CloudProvider, Instance, InstancePhase, InstanceSpec};

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create { node_pool: String },
    Delete(ProviderId),
    Get(ProviderId),
    List,
}

#[derive(Default)]
struct FakeState {
    instances: BTreeMap<ProviderId, Instance>,
    /// Remaining `get` calls for which a deleted instance stays visible.
    shutting_down: HashMap<ProviderId, u32>,
    calls: Vec<ProviderCall>,
    next_create_err: Option<CloudError>,
    next_delete_err: Option<CloudError>,
    next_get_err: Option<CloudError>,
    next_list_err: Option<CloudError>,
    next_id: u64,
}

/// In-memory [`CloudProvider`].
#[derive(Default)]
pub struct FakeCloudProvider {
    state: Mutex<FakeState>,
    /// How many `get` calls an instance survives after `delete`.
    shutdown_polls: u32,
}

impl FakeCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep deleted instances visible (in `ShuttingDown`) for `polls`
    /// subsequent `get` calls, like a provider with asynchronous teardown.
    pub fn with_shutdown_polls(mut self, polls: u32) -> Self {
        self.shutdown_polls = polls;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an instance as present, replacing any previous record.
    pub fn insert_instance(&self, provider_id: &str, node_pool: &str) {
        let mut state = self.lock();
        state.shutting_down.remove(provider_id);
        state.instances.insert(
            provider_id.to_string(),
            Instance {
                provider_id: provider_id.to_string(),
                node_pool: node_pool.to_string(),
                instance_type: "fake.standard".to_string(),
                phase: InstancePhase::Running,
                launched_at: epoch_secs(),
            },
        );
    }

    /// Register a fully specified instance.
    pub fn insert(&self, instance: Instance) {
        let mut state = self.lock();
        state.shutting_down.remove(&instance.provider_id);
        state.instances.insert(instance.provider_id.clone(), instance);
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.lock().instances.contains_key(provider_id)
    }

    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn fail_next_create(&self, err: CloudError) {
        self.lock().next_create_err = Some(err);
    }

    pub fn fail_next_delete(&self, err: CloudError) {
        self.lock().next_delete_err = Some(err);
    }

    pub fn fail_next_get(&self, err: CloudError) {
        self.lock().next_get_err = Some(err);
    }

    pub fn fail_next_list(&self, err: CloudError) {
        self.lock().next_list_err = Some(err);
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Provider ids passed to `delete`, in order.
    pub fn delete_calls(&self) -> Vec<ProviderId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::Delete(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Provider ids passed to `get`, in order.
    pub fn get_calls(&self) -> Vec<ProviderId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProviderCall::Get(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear instances, call log, and pending failures.
    pub fn reset(&self) {
        *self.lock() = FakeState::default();
    }
}

#[async_trait]
impl CloudProvider for FakeCloudProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create(&self, spec: &InstanceSpec) -> CloudResult<ProviderId> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Create {
            node_pool: spec.node_pool.clone(),
        });
        if let Some(err) = state.next_create_err.take() {
            return Err(err);
        }
        state.next_id += 1;
        let provider_id = format!("fake:///{}/{}", spec.node_pool, state.next_id);
        state.instances.insert(
            provider_id.clone(),
            Instance {
                provider_id: provider_id.clone(),
                node_pool: spec.node_pool.clone(),
                instance_type: spec.instance_type.clone(),
                phase: InstancePhase::Running,
                launched_at: epoch_secs(),
            },
        );
        Ok(provider_id)
    }

    async fn delete(&self, provider_id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Delete(provider_id.to_string()));
        if let Some(err) = state.next_delete_err.take() {
            return Err(err);
        }
        if !state.instances.contains_key(provider_id) {
            return Err(CloudError::NotFound(provider_id.to_string()));
        }
        if self.shutdown_polls == 0 {
            state.instances.remove(provider_id);
        } else if !state.shutting_down.contains_key(provider_id) {
            if let Some(instance) = state.instances.get_mut(provider_id) {
                instance.phase = InstancePhase::ShuttingDown;
            }
            state
                .shutting_down
                .insert(provider_id.to_string(), self.shutdown_polls);
        }
        Ok(())
    }

    async fn get(&self, provider_id: &str) -> CloudResult<Instance> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::Get(provider_id.to_string()));
        if let Some(err) = state.next_get_err.take() {
            return Err(err);
        }
        match state.shutting_down.get(provider_id).copied() {
            Some(0) => {
                state.shutting_down.remove(provider_id);
                state.instances.remove(provider_id);
            }
            Some(remaining) => {
                state
                    .shutting_down
                    .insert(provider_id.to_string(), remaining - 1);
            }
            None => {}
        }
        state
            .instances
            .get(provider_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(provider_id.to_string()))
    }

    async fn list(&self) -> CloudResult<Vec<Instance>> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::List);
        if let Some(err) = state.next_list_err.take() {
            return Err(err);
        }
        Ok(state.instances.values().cloned().collect())
    }
}
