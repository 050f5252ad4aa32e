//! redb table definitions for the reclaim state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Node claims keyed by claim name.
pub const NODE_CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_claims");

/// Node pools keyed by pool name.
pub const NODE_POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_pools");
