//! redb table definitions for the jobscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Backlog jobs keyed by job id.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Worker process heartbeats keyed by process id.
pub const PROCESSES: TableDefinition<&str, &[u8]> = TableDefinition::new("processes");

/// Held coordination locks keyed by lock key. One row per key.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");

/// Last scale timestamps keyed by worker group name.
pub const COOLDOWNS: TableDefinition<&str, &[u8]> = TableDefinition::new("cooldowns");

/// Scale events keyed by `{created_at_nanos:020}:{worker}:{seq}`.
pub const SCALE_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scale_events");
