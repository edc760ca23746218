//! Per-table schema types: inference, compatibility reconciliation, and the
//! value decoding that turns wire datums into typed row values.

pub mod inferencer;
pub mod reconciler;
pub mod type_mapper;
pub mod value;

use indexmap::IndexMap;

pub use type_mapper::DataType;
pub use value::Value;

/// Schema for a single column. Only `{name, data_type, nullable, precision,
/// scale}` are considered for compatibility comparison; `primary_key` is
/// informational.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: Option<bool>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub primary_key: Option<bool>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: None,
            precision: None,
            scale: None,
            primary_key: None,
        }
    }
}

/// Replication-bookkeeping columns appended to every inferred table schema.
pub const LSN_COLUMN: &str = "lsn";
pub const DELETED_TS_COLUMN: &str = "deleted_ts";

/// A table's column set, order-preserving (order matters for columnar
/// dispatch).
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: IndexMap<String, ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
        }
    }

    pub fn with_replication_columns(mut self) -> Self {
        let mut lsn = ColumnSchema::new(LSN_COLUMN, DataType::Bigint);
        lsn.nullable = Some(true);
        self.columns.insert(LSN_COLUMN.to_string(), lsn);

        let mut deleted_ts = ColumnSchema::new(DELETED_TS_COLUMN, DataType::Timestamp);
        deleted_ts.nullable = Some(true);
        self.columns.insert(DELETED_TS_COLUMN.to_string(), deleted_ts);

        self
    }
}
