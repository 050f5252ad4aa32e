//! StateStore: redb-backed persistence for node claims and node pools.
//!
//! Provides typed CRUD operations. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Claim mutations run as read-modify-write inside a single write
//! transaction, so a concurrent writer can never observe or persist a
//! half-applied transition.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult, StorageOp};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    (Encode) => {
        |e| StateError::Encode(e.to_string())
    };
    (Decode) => {
        |e| StateError::Decode(e.to_string())
    };
    ($op:ident) => {
        |e| StateError::Storage {
            op: StorageOp::$op,
            message: e.to_string(),
        }
    };
}

/// Persists condition changes made by the termination state machine.
pub trait ClaimStatusWriter: Send + Sync {
    /// Set one condition on the stored claim, leaving every other condition
    /// as stored, and return the resulting conditions.
    fn write_condition(
        &self,
        claim: &str,
        kind: ConditionType,
        status: bool,
        now: u64,
    ) -> StateResult<Conditions>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
        txn.open_table(NODE_POOLS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Node claims ────────────────────────────────────────────────

    /// Insert or update a node claim.
    ///
    /// An update must be a legal successor of the stored record: the
    /// provider id is immutable once set and monotonic conditions never
    /// reset.
    pub fn put_claim(&self, claim: &NodeClaim) -> StateResult<()> {
        let value = serde_json::to_vec(claim).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
            let existing = match table.get(claim.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<NodeClaim>(guard.value())
                        .map_err(map_err!(Decode))?,
                ),
                None => None,
            };
            if let Some(existing) = existing {
                existing.check_successor(claim)?;
            }
            table
                .insert(claim.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(claim = %claim.name, "node claim stored");
        Ok(())
    }

    /// Get a node claim by name.
    pub fn get_claim(&self, name: &str) -> StateResult<Option<NodeClaim>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let claim: NodeClaim =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(claim))
            }
            None => Ok(None),
        }
    }

    /// List all node claims, ordered by name.
    pub fn list_claims(&self) -> StateResult<Vec<NodeClaim>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let claim: NodeClaim =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(claim);
        }
        Ok(results)
    }

    /// Apply `f` to the stored claim inside one write transaction and
    /// return the updated record.
    pub fn update_claim<F>(&self, name: &str, f: F) -> StateResult<NodeClaim>
    where
        F: FnOnce(&mut NodeClaim) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
            let existing: NodeClaim = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?
                }
                None => return Err(StateError::NotFound(format!("node claim {name}"))),
            };
            let mut next = existing.clone();
            f(&mut next)?;
            existing.check_successor(&next)?;
            let value = serde_json::to_vec(&next).map_err(map_err!(Encode))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Cordon a claim on behalf of the disruption orchestrator, or lift
    /// that cordon. Both the cordon and its ownership marker move together.
    pub fn set_disruption_cordon(&self, name: &str, on: bool) -> StateResult<NodeClaim> {
        let claim = self.update_claim(name, |c| {
            c.cordoned = on;
            c.disruption_cordon = on;
            Ok(())
        })?;
        debug!(claim = %name, cordoned = on, "disruption cordon updated");
        Ok(claim)
    }

    /// Remove a finalizer from a claim. Missing finalizers are ignored.
    pub fn remove_finalizer(&self, name: &str, finalizer: &str) -> StateResult<NodeClaim> {
        self.update_claim(name, |c| {
            c.finalizers.retain(|f| f != finalizer);
            Ok(())
        })
    }

    /// Delete a node claim by name. Returns true if it existed.
    pub fn delete_claim(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(NODE_CLAIMS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(claim = %name, existed, "node claim deleted");
        Ok(existed)
    }

    // ── Node pools ─────────────────────────────────────────────────

    /// Insert or update a node pool.
    pub fn put_pool(&self, pool: &NodePool) -> StateResult<()> {
        let value = serde_json::to_vec(pool).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODE_POOLS).map_err(map_err!(Table))?;
            table
                .insert(pool.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all node pools.
    pub fn list_pools(&self) -> StateResult<Vec<NodePool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let pool: NodePool =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(pool);
        }
        Ok(results)
    }
}

impl ClaimStatusWriter for StateStore {
    fn write_condition(
        &self,
        claim: &str,
        kind: ConditionType,
        status: bool,
        now: u64,
    ) -> StateResult<Conditions> {
        let updated = self.update_claim(claim, |stored| {
            stored.conditions.set(kind, status, now)?;
            Ok(())
        })?;
        debug!(%claim, condition = kind.as_str(), status, "condition written");
        Ok(updated.conditions)
    }
}
