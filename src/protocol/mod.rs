//! Protocol module for PostgreSQL logical replication wire handling
//!
//! Contains the position-tracked buffer reader/writer, the outer
//! replication frame types (keepalive, XLogData, standby status update),
//! the LSN type, and the `decoderbufs` output-plugin payload decoder.

pub mod binary;
pub mod buffer;
pub mod decoderbufs;
pub mod lsn;
pub mod wire;

pub use buffer::{BufferReader, BufferWriter};
pub use lsn::Lsn;
pub use wire::{KeepaliveMessage, StandbyStatusUpdateMessage, XLogDataMessage};
