//! Routes completed batch groups to a caller-specified table and backend
//!
//! Ported from `create_table_dispatch`/`merge_column` in the dlt
//! `pg_legacy_replication` source: given a `target_table` and optional
//! column hints, drops groups for other tables, merges the hints into the
//! resolved schema, and emits according to the configured [`Backend`].

pub mod sinks;

use indexmap::IndexMap;

use crate::core::config::{Backend, TableOptions};
use crate::core::errors::CdcResult;
use crate::replication::{RowItem, TableItems};
use crate::schema::{ColumnSchema, TableSchema, Value};

pub use sinks::Sink;

/// One payload a [`Sink`] receives. A row-oriented table always gets a
/// `SchemaHint` immediately followed by `Rows`; a columnar table gets a
/// single `ColumnarBatch`.
#[derive(Debug, Clone)]
pub enum DispatchItem {
    SchemaHint {
        table: String,
        columns: IndexMap<String, ColumnSchema>,
    },
    Rows {
        table: String,
        items: Vec<RowItem>,
    },
    ColumnarBatch {
        table: String,
        columns: Vec<String>,
        tz: String,
        rows: Vec<Vec<Option<Value>>>,
    },
}

/// Merges one hint column into a resolved one: fields set on the hint win.
fn merge_hint(existing: &ColumnSchema, hint: &ColumnSchema) -> ColumnSchema {
    ColumnSchema {
        name: existing.name.clone(),
        data_type: hint.data_type,
        nullable: hint.nullable.or(existing.nullable),
        precision: hint.precision.or(existing.precision),
        scale: hint.scale.or(existing.scale),
        primary_key: hint.primary_key.or(existing.primary_key),
    }
}

/// Dispatches batch groups belonging to one target table to a sink.
pub struct Dispatcher {
    target_table: String,
    column_hints: IndexMap<String, ColumnSchema>,
    table_options: TableOptions,
}

impl Dispatcher {
    pub fn new(target_table: impl Into<String>, column_hints: IndexMap<String, ColumnSchema>, table_options: TableOptions) -> Self {
        Self {
            target_table: target_table.into(),
            column_hints,
            table_options,
        }
    }

    /// Consumes one `(table, schema, items)` group, emitting nothing if it
    /// belongs to another table.
    pub async fn dispatch(&self, group: TableItems, sink: &dyn Sink) -> CdcResult<()> {
        if group.table != self.target_table {
            return Ok(());
        }

        let mut schema = group.schema.unwrap_or_else(|| TableSchema::new(group.table.clone()));
        for (name, hint) in &self.column_hints {
            let merged = match schema.columns.get(name) {
                Some(existing) => merge_hint(existing, hint),
                None => hint.clone(),
            };
            schema.columns.insert(name.clone(), merged);
        }

        match self.table_options.backend {
            Backend::RowOriented => {
                sink.dispatch(DispatchItem::SchemaHint {
                    table: group.table.clone(),
                    columns: schema.columns.clone(),
                })
                .await?;
                sink.dispatch(DispatchItem::Rows {
                    table: group.table,
                    items: group.items,
                })
                .await?;
            }
            Backend::Columnar => {
                let tz = self.table_options.timezone().to_string();
                let ordered: Vec<String> = schema.columns.keys().cloned().collect();
                let rows = group
                    .items
                    .iter()
                    .map(|item| ordered.iter().map(|column| item.get(column).cloned()).collect())
                    .collect();

                sink.dispatch(DispatchItem::ColumnarBatch {
                    table: group.table,
                    columns: ordered,
                    tz,
                    rows,
                })
                .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::schema::type_mapper::DataType;

    struct RecordingSink {
        received: Mutex<Vec<DispatchItem>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { received: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl Sink for RecordingSink {
        async fn dispatch(&self, item: DispatchItem) -> CdcResult<()> {
            self.received.lock().unwrap().push(item);
            Ok(())
        }
    }

    fn sample_group(table: &str) -> TableItems {
        let mut schema = TableSchema::new(table);
        schema.columns.insert("id".to_string(), ColumnSchema::new("id", DataType::Bigint));
        TableItems {
            table: table.to_string(),
            schema: Some(schema),
            items: vec![],
        }
    }

    #[tokio::test]
    async fn drops_groups_for_other_tables() {
        let dispatcher = Dispatcher::new("orders", IndexMap::new(), TableOptions::default());
        let sink = RecordingSink::new();
        dispatcher.dispatch(sample_group("customers"), &sink).await.unwrap();
        assert!(sink.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn row_oriented_emits_hint_then_rows() {
        let dispatcher = Dispatcher::new("orders", IndexMap::new(), TableOptions::default());
        let sink = RecordingSink::new();
        dispatcher.dispatch(sample_group("orders"), &sink).await.unwrap();
        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], DispatchItem::SchemaHint { .. }));
        assert!(matches!(received[1], DispatchItem::Rows { .. }));
    }

    #[tokio::test]
    async fn columnar_backend_emits_single_batch() {
        let mut options = TableOptions::default();
        options.backend = Backend::Columnar;
        let dispatcher = Dispatcher::new("orders", IndexMap::new(), options);
        let sink = RecordingSink::new();
        dispatcher.dispatch(sample_group("orders"), &sink).await.unwrap();
        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], DispatchItem::ColumnarBatch { .. }));
    }

    #[tokio::test]
    async fn column_hint_overrides_inferred_field() {
        let mut hints = IndexMap::new();
        let mut hint_col = ColumnSchema::new("id", DataType::Text);
        hint_col.nullable = Some(true);
        hints.insert("id".to_string(), hint_col);

        let dispatcher = Dispatcher::new("orders", hints, TableOptions::default());
        let sink = RecordingSink::new();
        dispatcher.dispatch(sample_group("orders"), &sink).await.unwrap();

        let received = sink.received.lock().unwrap();
        match &received[0] {
            DispatchItem::SchemaHint { columns, .. } => {
                assert_eq!(columns["id"].data_type, DataType::Text);
                assert_eq!(columns["id"].nullable, Some(true));
            }
            _ => panic!("expected schema hint"),
        }
    }
}
