//! Error types for the CDC engine
//!
//! Mirrors the error surface described for the replication core: parsing
//! failures, schema incompatibilities, and connection/driver errors each get
//! their own variant so callers can match on them instead of string-sniffing
//! a message.

use thiserror::Error;

/// Errors raised anywhere in the replication core.
#[derive(Error, Debug)]
pub enum CdcError {
    /// Protobuf parse failure or an unrecognized datum nullness marker.
    #[error("malformed replication message: {0}")]
    MalformedMessage(String),

    /// `op == UNKNOWN` on a decoded `RowMessage`.
    #[error("unsupported replication operation in message: {0:?}")]
    UnsupportedOperation(String),

    /// The Reconciler rejected an incompatible schema change for `column`.
    #[error("incompatible schema change for column '{column}': {reason}")]
    IncompatibleSchema { column: String, reason: String },

    /// The Dispatcher received a backend tag it doesn't know how to handle.
    #[error("unsupported dispatch backend: {0}")]
    UnsupportedBackend(String),

    /// Database connection errors (libpq connect/exec failures).
    #[error("database connection error: {0}")]
    Connection(String),

    /// Replication / slot-admin protocol errors.
    #[error("replication protocol error: {0}")]
    Protocol(String),

    /// Buffer read/write bounds errors.
    #[error("buffer operation error: {0}")]
    Buffer(String),

    /// Configuration validation errors.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network IO error")]
    NetworkIO(#[from] std::io::Error),

    #[error("string conversion error")]
    StringConversion(#[from] std::string::FromUtf8Error),

    #[error("C string conversion error")]
    CStringConversion(#[from] std::ffi::NulError),

    #[error("task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),

    #[error("sink error ({sink}): {message}")]
    Sink { sink: String, message: String },
}

pub type CdcResult<T> = std::result::Result<T, CdcError>;

impl CdcError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedMessage(message.into())
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    pub fn buffer<S: Into<String>>(message: S) -> Self {
        Self::Buffer(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    pub fn incompatible_schema<C: Into<String>, R: Into<String>>(column: C, reason: R) -> Self {
        Self::IncompatibleSchema {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub fn sink<S: Into<String>, M: Into<String>>(sink: S, message: M) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }
}
