//! Domain types for the reclaim state store.
//!
//! These types represent the persisted state of node claims and node
//! pools. All types are serializable to/from JSON for storage in redb
//! tables.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use reclaim_core::{
    BudgetLimit, ClaimName, ConfigError, NodePoolConfig, PoolName, ProviderId,
    TERMINATION_FINALIZER, parse_duration,
};

use crate::error::{StateError, StateResult};

// ── Conditions ────────────────────────────────────────────────────

/// The fixed set of status conditions a node claim carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// The provider accepted the create request and assigned a provider id.
    Launched,
    /// The instance joined the cluster.
    Registered,
    /// The instance is ready to run workloads.
    Initialized,
    /// Deletion has been requested from the provider.
    Terminating,
}

impl ConditionType {
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Launched,
        ConditionType::Registered,
        ConditionType::Initialized,
        ConditionType::Terminating,
    ];

    /// Monotonic conditions may only move `false → true`.
    pub fn is_monotonic(self) -> bool {
        matches!(self, ConditionType::Launched | ConditionType::Terminating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Launched => "Launched",
            ConditionType::Registered => "Registered",
            ConditionType::Initialized => "Initialized",
            ConditionType::Terminating => "Terminating",
        }
    }
}

/// A named boolean status flag with its last transition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionType,
    pub status: bool,
    /// Unix timestamp (seconds) of the last status change.
    pub last_transition: u64,
}

/// Condition set of a node claim. Absent conditions read as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(BTreeMap<ConditionType, Condition>);

impl Conditions {
    pub fn get(&self, kind: ConditionType) -> Option<&Condition> {
        self.0.get(&kind)
    }

    pub fn is_true(&self, kind: ConditionType) -> bool {
        self.0.get(&kind).is_some_and(|c| c.status)
    }

    /// Set a condition, enforcing the transition table.
    ///
    /// Returns `true` if the status changed. Setting a condition to its
    /// current value is a no-op and keeps the original transition time.
    pub fn set(&mut self, kind: ConditionType, status: bool, now: u64) -> StateResult<bool> {
        let current = self.is_true(kind);
        if current == status && self.0.contains_key(&kind) {
            return Ok(false);
        }
        if current && !status && kind.is_monotonic() {
            return Err(StateError::InvalidTransition(format!(
                "{} cannot transition from true to false",
                kind.as_str()
            )));
        }
        self.0.insert(
            kind,
            Condition {
                kind,
                status,
                last_transition: now,
            },
        );
        Ok(current != status)
    }

    /// Check that moving from `self` to `next` respects the transition table.
    pub fn check_transition(&self, next: &Conditions) -> StateResult<()> {
        for kind in ConditionType::ALL {
            if kind.is_monotonic() && self.is_true(kind) && !next.is_true(kind) {
                return Err(StateError::InvalidTransition(format!(
                    "{} cannot transition from true to false",
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }
}

// ── NodeClaim ─────────────────────────────────────────────────────

/// The record of a requested, and later obtained, compute instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeClaim {
    pub name: ClaimName,
    pub node_pool: PoolName,
    /// Assigned once by the provider on creation.
    provider_id: Option<ProviderId>,
    pub conditions: Conditions,
    pub finalizers: Vec<String>,
    /// Operator marker: never disrupt this node voluntarily.
    pub do_not_disrupt: bool,
    /// Placement skips cordoned nodes. Set by operators or by disruption.
    pub cordoned: bool,
    /// The cordon was placed by the disruption orchestrator, which may lift
    /// it again. Operator cordons leave this unset.
    #[serde(default)]
    pub disruption_cordon: bool,
    /// Allocatable CPU on the node, in millicores.
    pub capacity_cpu_millis: u64,
    /// Unix timestamp (seconds) when the claim was created.
    pub created_at: u64,
}

impl NodeClaim {
    /// Create a claim carrying the termination finalizer.
    pub fn new(name: &str, node_pool: &str, capacity_cpu_millis: u64, created_at: u64) -> Self {
        Self {
            name: name.to_string(),
            node_pool: node_pool.to_string(),
            provider_id: None,
            conditions: Conditions::default(),
            finalizers: vec![TERMINATION_FINALIZER.to_string()],
            do_not_disrupt: false,
            cordoned: false,
            disruption_cordon: false,
            capacity_cpu_millis,
            created_at,
        }
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// Record the provider id. Re-setting the same id is a no-op; a
    /// different id is rejected.
    pub fn set_provider_id(&mut self, id: &str) -> StateResult<()> {
        match &self.provider_id {
            Some(existing) if existing == id => Ok(()),
            Some(existing) => Err(StateError::InvalidTransition(format!(
                "claim {} already has provider id {existing}",
                self.name
            ))),
            None => {
                self.provider_id = Some(id.to_string());
                Ok(())
            }
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.conditions.is_true(ConditionType::Terminating)
    }

    /// Any finalizer other than ours blocks voluntary disruption.
    pub fn has_foreign_finalizers(&self) -> bool {
        self.finalizers.iter().any(|f| f != TERMINATION_FINALIZER)
    }

    /// Validate that `next` is a legal successor of this record.
    pub fn check_successor(&self, next: &NodeClaim) -> StateResult<()> {
        if let Some(existing) = &self.provider_id
            && next.provider_id.as_deref() != Some(existing.as_str())
        {
            return Err(StateError::InvalidTransition(format!(
                "provider id of claim {} is immutable",
                self.name
            )));
        }
        self.conditions.check_transition(&next.conditions)
    }
}

// ── NodePool ──────────────────────────────────────────────────────

/// Disruption policy for a group of nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodePool {
    pub name: PoolName,
    pub budget: BudgetLimit,
    /// Minimum claim age (seconds) before consolidation may touch it.
    pub consolidate_after_secs: u64,
}

impl NodePool {
    pub fn from_config(cfg: &NodePoolConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: cfg.name.clone(),
            budget: cfg.budget,
            consolidate_after_secs: parse_duration(&cfg.consolidate_after)?.as_secs(),
        })
    }

    pub fn consolidate_after(&self) -> Duration {
        Duration::from_secs(self.consolidate_after_secs)
    }
}
