//! Configuration management for the replication engine
//!
//! This module handles loading configuration from environment variables.
//! It provides a centralized way to manage all application settings with
//! proper validation and default values, following the same env-loading and
//! validation shape the teacher used for its own sink configuration.

use std::collections::HashMap;
use std::env;

use tracing::info;

use super::{CdcError, CdcResult};

/// Dispatch backend selected for a table (original_source's "sqlalchemy" vs
/// "pyarrow" item-generation backends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    RowOriented,
    Columnar,
}

impl std::str::FromStr for Backend {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "row-oriented" | "row_oriented" | "row" => Ok(Backend::RowOriented),
            "columnar" => Ok(Backend::Columnar),
            other => Err(CdcError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Per-table dispatch options, keyed by unqualified table name.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    pub included_columns: Option<Vec<String>>,
    pub backend: Backend,
    /// Backend-specific knobs; currently only the columnar backend's `tz` is read.
    pub backend_kwargs: HashMap<String, String>,
}

impl TableOptions {
    pub fn timezone(&self) -> &str {
        self.backend_kwargs
            .get("tz")
            .map(String::as_str)
            .unwrap_or("UTC")
    }
}

/// Configuration for the replication engine, with validation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connection_string: String,
    pub slot_name: String,
    pub schema: String,
    pub table_names: Vec<String>,
    pub feedback_interval_secs: u64,
    pub take_snapshots: bool,
    pub table_options: HashMap<String, TableOptions>,
    pub reset: bool,
    pub target_batch_size: usize,
}

impl EngineConfig {
    pub fn new(
        connection_string: String,
        slot_name: String,
        schema: String,
        table_names: Vec<String>,
    ) -> CdcResult<Self> {
        Self::validate(&connection_string, &slot_name, &schema)?;
        Ok(Self {
            connection_string,
            slot_name,
            schema,
            table_names,
            feedback_interval_secs: 1,
            take_snapshots: false,
            table_options: HashMap::new(),
            reset: false,
            target_batch_size: 1000,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `DATABASE_URL`: PostgreSQL connection string
    /// - `PG_SCHEMA`: Schema the replicated tables live in
    ///
    /// Optional (with defaults):
    /// - `SLOT_NAME`: Replication slot name (default: "cdc_slot")
    /// - `TABLE_NAMES`: comma-separated table allow-list (default: all tables
    ///   in the publication)
    /// - `TARGET_BATCH_SIZE`: rows per batch before a forced flush (default: 1000)
    /// - `RESET`: drop and recreate the slot on startup (default: false)
    /// - `TAKE_SNAPSHOTS`: request an initial snapshot (default: false; this
    ///   core-only engine rejects it, snapshotting is out of scope)
    pub fn from_env() -> CdcResult<Self> {
        let connection_string = env::var("DATABASE_URL")
            .map_err(|_| CdcError::config("Missing required DATABASE_URL environment variable"))?;

        let schema = env::var("PG_SCHEMA")
            .map_err(|_| CdcError::config("Missing required PG_SCHEMA environment variable"))?;

        let slot_name = env::var("SLOT_NAME").unwrap_or_else(|_| "cdc_slot".to_string());
        info!("Slot name: {}", slot_name);
        info!("Schema: {}", schema);

        let table_names: Vec<String> = env::var("TABLE_NAMES")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        info!("Table names from env: {:?}", table_names);

        let mut config = Self::new(connection_string, slot_name, schema, table_names)?;

        if let Some(size) = env::var("TARGET_BATCH_SIZE").ok().and_then(|s| s.parse().ok()) {
            config.target_batch_size = size;
        }
        config.reset = env::var("RESET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config.take_snapshots = env::var("TAKE_SNAPSHOTS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(config)
    }

    fn validate(connection_string: &str, slot_name: &str, schema: &str) -> CdcResult<()> {
        if connection_string.trim().is_empty() {
            return Err(CdcError::config("DATABASE_URL cannot be empty"));
        }

        if schema.trim().is_empty() {
            return Err(CdcError::config("PG_SCHEMA cannot be empty"));
        }

        if slot_name.trim().is_empty() {
            return Err(CdcError::config("Slot name cannot be empty"));
        }

        if !slot_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CdcError::config(
                "Slot name can only contain alphanumeric characters and underscores",
            ));
        }

        if slot_name.len() > 63 {
            // PostgreSQL identifier length limit
            return Err(CdcError::config("Slot name cannot be longer than 63 characters"));
        }

        Ok(())
    }

    /// Fully-qualified, quoted table names (`schema."name"`) subscribed to.
    pub fn table_qnames(&self) -> Vec<String> {
        self.table_names
            .iter()
            .map(|t| format!("{}.\"{}\"", self.schema, t))
            .collect()
    }
}
