//! Change-data-capture engine for PostgreSQL logical replication.
//!
//! Tails a `decoderbufs` logical replication slot, infers and reconciles
//! per-table schemas from the wire stream, batches decoded rows, and
//! dispatches them to a caller-selected [`dispatch::Sink`].

pub mod core;
pub mod dispatch;
pub mod protocol;
pub mod replication;
pub mod schema;

pub use core::{CdcError, CdcResult, EngineConfig};
