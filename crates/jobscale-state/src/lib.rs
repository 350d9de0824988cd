//! jobscale-state — embedded state store for jobscale.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for the job backlog, worker process heartbeats, coordination locks,
//! scaling cooldowns, and the scale-event audit log.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Event keys start with a zero-padded nanosecond timestamp so a table scan
//! is chronological and retention sweeps can stop early.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks, but not across processes: redb
//! locks its file. [`SharedStore`] keeps locks, cooldowns and scale events in
//! Postgres for deployments that run more than one jobscale process.

pub mod error;
pub mod shared;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use shared::SharedStore;
pub use store::StateStore;
pub use types::*;
