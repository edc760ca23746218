//! Stateful stream handler for logical replication messages
//!
//! Ported from `MessageConsumer` in the dlt `pg_legacy_replication` source.
//! `StopReplication` is modeled as an explicit [`ControlFlow`] return value
//! instead of an exception, per the source's own design note: Rust has no
//! control-flow exceptions, so the driver loop checks this sentinel after
//! every dispatched message rather than relying on unwinding.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::core::errors::{CdcError, CdcResult};
use crate::protocol::decoderbufs::{Op, RowMessage};
use crate::protocol::lsn::Lsn;
use crate::schema::value::decode_value;
use crate::schema::{TableSchema, inferencer, reconciler};

/// A single emitted row: column name to decoded value.
pub type RowItem = HashMap<String, crate::schema::Value>;

/// Whether the driver loop should keep forwarding messages or stop the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Stop,
}

/// Per-stream-invocation state, never shared across streams.
pub struct ConsumerState {
    pub upto_lsn: Lsn,
    pub table_qnames: HashSet<String>,
    pub target_batch_size: usize,
    pub included_columns: HashMap<String, HashSet<String>>,

    pub consumed_all: bool,
    pub data_items: HashMap<String, Vec<RowItem>>,
    pub last_table_schema: HashMap<String, TableSchema>,
    pub last_table_hashes: HashMap<String, u64>,
    pub last_commit_ts: Option<i64>,
    pub last_commit_lsn: Option<Lsn>,
}

impl ConsumerState {
    pub fn new(
        upto_lsn: Lsn,
        table_qnames: HashSet<String>,
        target_batch_size: usize,
        included_columns: HashMap<String, HashSet<String>>,
        last_table_schema: HashMap<String, TableSchema>,
        last_table_hashes: HashMap<String, u64>,
    ) -> Self {
        Self {
            upto_lsn,
            table_qnames,
            target_batch_size,
            included_columns,
            consumed_all: false,
            data_items: HashMap::new(),
            last_table_schema,
            last_table_hashes,
            last_commit_ts: None,
            last_commit_lsn: None,
        }
    }

    fn total_buffered(&self) -> usize {
        self.data_items.values().map(Vec::len).sum()
    }

    /// Processes one decoded row message, returning whether the driver loop
    /// should stop (invariant: `Stop` is only ever returned immediately
    /// after a COMMIT).
    pub fn process_message(&mut self, msg: &RowMessage, data_start: Lsn, commit_time: Option<i64>) -> CdcResult<ControlFlow> {
        match msg.op {
            Op::Unknown => Err(CdcError::UnsupportedOperation(format!("{msg:?}"))),
            Op::Begin => {
                self.last_commit_ts = commit_time.or(msg.commit_time.map(|t| t as i64));
                Ok(ControlFlow::Continue)
            }
            Op::Commit => {
                self.last_commit_lsn = Some(data_start);
                if data_start >= self.upto_lsn {
                    self.consumed_all = true;
                }
                if self.consumed_all || self.total_buffered() >= self.target_batch_size {
                    Ok(ControlFlow::Stop)
                } else {
                    Ok(ControlFlow::Continue)
                }
            }
            Op::Insert | Op::Update | Op::Delete => self.process_change(msg, data_start),
        }
    }

    fn process_change(&mut self, msg: &RowMessage, data_start: Lsn) -> CdcResult<ControlFlow> {
        if !self.table_qnames.contains(&msg.table) {
            return Ok(ControlFlow::Continue);
        }

        let table_name = inferencer::extract_table_name(&msg.table)?;
        let for_delete = msg.op == Op::Delete;

        let schema = match self.resolve_schema(msg, &table_name)? {
            Some(schema) => schema,
            None => return Ok(ControlFlow::Stop), // incompatible schema change: graceful stop
        };

        let included = self.included_columns.get(&table_name);
        let source_tuple = if for_delete { &msg.old_tuple } else { &msg.new_tuple };

        let mut row: RowItem = HashMap::new();
        for datum in source_tuple {
            if let Some(allow_list) = included {
                if !allow_list.contains(&datum.column_name) {
                    continue;
                }
            }
            let column = schema
                .columns
                .get(&datum.column_name)
                .ok_or_else(|| CdcError::malformed(format!("column '{}' missing from cached schema", datum.column_name)))?;
            let value = decode_value(&datum.value, datum.datum_missing, column.data_type, for_delete)?;
            row.insert(datum.column_name.clone(), value);
        }

        if for_delete {
            row.insert(
                crate::schema::DELETED_TS_COLUMN.to_string(),
                self.last_commit_ts
                    .map(timestamp_micros_to_value)
                    .unwrap_or(crate::schema::Value::Null),
            );
        }
        row.insert(crate::schema::LSN_COLUMN.to_string(), crate::schema::Value::Bigint(data_start.as_u64() as i64));

        self.data_items.entry(table_name).or_default().push(row);
        Ok(ControlFlow::Continue)
    }

    /// Resolves the effective schema for a change message, returning `None`
    /// when the Reconciler rejected an incompatible change (the caller
    /// should treat this as a graceful batch stop, per spec's schema
    /// resolution algorithm).
    fn resolve_schema(&mut self, msg: &RowMessage, table_name: &str) -> CdcResult<Option<TableSchema>> {
        if msg.op == Op::Delete {
            if let Some(cached) = self.last_table_schema.get(table_name) {
                return Ok(Some(cached.clone()));
            }
        }

        let fingerprint = inferencer::fingerprint(&msg.new_typeinfo);
        if self.last_table_hashes.get(table_name) == Some(&fingerprint) {
            return Ok(self.last_table_schema.get(table_name).cloned());
        }

        let inferred = inferencer::infer_table_schema(msg, self.included_columns.get(table_name))?;

        match self.last_table_schema.get(table_name) {
            None => {
                self.last_table_schema.insert(table_name.to_string(), inferred.clone());
                self.last_table_hashes.insert(table_name.to_string(), fingerprint);
                Ok(Some(inferred))
            }
            Some(cached) => match reconciler::reconcile(cached, &inferred) {
                Ok(reconciled) => {
                    self.last_table_schema.insert(table_name.to_string(), reconciled.clone());
                    // hash intentionally not updated: the cached schema was
                    // merged, not replaced, so the old fingerprint still
                    // identifies it for subsequent identical messages.
                    Ok(Some(reconciled))
                }
                Err(err) => {
                    warn!(table = table_name, error = %err, "incompatible schema change, stopping batch");
                    Ok(None)
                }
            },
        }
    }
}

fn timestamp_micros_to_value(micros: i64) -> crate::schema::Value {
    use chrono::DateTime;
    DateTime::from_timestamp_micros(micros)
        .map(|dt| crate::schema::Value::Timestamp(dt.naive_utc()))
        .unwrap_or(crate::schema::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoderbufs::{DatumMessage, DatumValue, TypeInfo};

    fn datum(name: &str, oid: u32, value: DatumValue, pkey: bool) -> DatumMessage {
        DatumMessage {
            column_name: name.to_string(),
            column_type: oid,
            datum_missing: false,
            value,
            atttypmod: -1,
            part_of_pkey: pkey,
        }
    }

    fn fresh_consumer(upto: u64, batch_size: usize) -> ConsumerState {
        let mut qnames = HashSet::new();
        qnames.insert("public.\"t\"".to_string());
        ConsumerState::new(Lsn::from_u64(upto), qnames, batch_size, HashMap::new(), HashMap::new(), HashMap::new())
    }

    #[test]
    fn single_insert_committed_emits_one_group() {
        let mut consumer = fresh_consumer(0, 1000);

        let begin = RowMessage {
            transaction_id: None,
            commit_time: Some(1_700_000_000_000_000),
            table: String::new(),
            op: Op::Begin,
            new_tuple: vec![],
            old_tuple: vec![],
            new_typeinfo: vec![],
        };
        assert_eq!(consumer.process_message(&begin, Lsn::ZERO, None).unwrap(), ControlFlow::Continue);

        let insert = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: "public.\"t\"".to_string(),
            op: Op::Insert,
            new_tuple: vec![datum("id", 23, DatumValue::Int32(7), true)],
            old_tuple: vec![],
            new_typeinfo: vec![TypeInfo {
                modifier: "integer".to_string(),
                value_optional: false,
            }],
        };
        assert_eq!(
            consumer.process_message(&insert, Lsn::from_u64(0x100), None).unwrap(),
            ControlFlow::Continue
        );

        let commit = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: String::new(),
            op: Op::Commit,
            new_tuple: vec![],
            old_tuple: vec![],
            new_typeinfo: vec![],
        };
        let result = consumer.process_message(&commit, Lsn::from_u64(0x110), None).unwrap();
        assert_eq!(result, ControlFlow::Stop);
        assert_eq!(consumer.last_commit_lsn, Some(Lsn::from_u64(0x110)));

        let rows = &consumer.data_items["t"];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], crate::schema::Value::Bigint(7));
        assert_eq!(rows[0]["lsn"], crate::schema::Value::Bigint(0x100));
    }

    #[test]
    fn batch_size_cutoff_stops_after_target_reached() {
        let mut consumer = fresh_consumer(u64::MAX, 2);

        for (i, lsn) in [(1u32, 0x10u64), (2, 0x20)] {
            let insert = RowMessage {
                transaction_id: None,
                commit_time: None,
                table: "public.\"t\"".to_string(),
                op: Op::Insert,
                new_tuple: vec![datum("id", 23, DatumValue::Int32(i as i32), true)],
                old_tuple: vec![],
                new_typeinfo: vec![TypeInfo {
                    modifier: "integer".to_string(),
                    value_optional: false,
                }],
            };
            consumer.process_message(&insert, Lsn::from_u64(lsn), None).unwrap();
        }

        let commit = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: String::new(),
            op: Op::Commit,
            new_tuple: vec![],
            old_tuple: vec![],
            new_typeinfo: vec![],
        };
        let result = consumer.process_message(&commit, Lsn::from_u64(0x30), None).unwrap();
        assert_eq!(result, ControlFlow::Stop);
        assert!(!consumer.consumed_all);
    }

    #[test]
    fn unknown_op_is_unsupported() {
        let mut consumer = fresh_consumer(0, 1000);
        let msg = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: String::new(),
            op: Op::Unknown,
            new_tuple: vec![],
            old_tuple: vec![],
            new_typeinfo: vec![],
        };
        assert!(matches!(
            consumer.process_message(&msg, Lsn::ZERO, None),
            Err(CdcError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn row_for_table_not_in_allow_list_is_dropped() {
        let mut consumer = fresh_consumer(0, 1000);
        let insert = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: "public.\"other\"".to_string(),
            op: Op::Insert,
            new_tuple: vec![datum("id", 23, DatumValue::Int32(1), true)],
            old_tuple: vec![],
            new_typeinfo: vec![],
        };
        consumer.process_message(&insert, Lsn::from_u64(1), None).unwrap();
        assert!(consumer.data_items.is_empty());
    }

    fn begin(commit_time: Option<u64>) -> RowMessage {
        RowMessage {
            transaction_id: None,
            commit_time,
            table: String::new(),
            op: Op::Begin,
            new_tuple: vec![],
            old_tuple: vec![],
            new_typeinfo: vec![],
        }
    }

    fn commit() -> RowMessage {
        RowMessage {
            transaction_id: None,
            commit_time: None,
            table: String::new(),
            op: Op::Commit,
            new_tuple: vec![],
            old_tuple: vec![],
            new_typeinfo: vec![],
        }
    }

    // scenario 4: upto cut-off. COMMITs at A, B, C with upto_lsn = B stop
    // the batch right after B; C is never observed.
    #[test]
    fn upto_cutoff_stops_after_matching_commit() {
        let mut consumer = fresh_consumer(0x20, 1000);

        assert_eq!(consumer.process_message(&commit(), Lsn::from_u64(0x10), None).unwrap(), ControlFlow::Continue);
        assert!(!consumer.consumed_all);

        let result = consumer.process_message(&commit(), Lsn::from_u64(0x20), None).unwrap();
        assert_eq!(result, ControlFlow::Stop);
        assert!(consumer.consumed_all);
        assert_eq!(consumer.last_commit_lsn, Some(Lsn::from_u64(0x20)));

        // a COMMIT at C is never handed to the consumer once the driver
        // loop honours `Stop`, so nothing here observes it.
    }

    // scenario 5: DELETE without a cached schema. The schema is inferred
    // from `old_tuple` alone and the row carries a dummy for any field the
    // source marked missing, plus `deleted_ts` from the preceding BEGIN.
    #[test]
    fn delete_without_cached_schema_infers_and_dummies() {
        let mut consumer = fresh_consumer(0, 1000);
        consumer.process_message(&begin(Some(1_700_000_000_000_000)), Lsn::ZERO, None).unwrap();

        let delete = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: "public.\"t\"".to_string(),
            op: Op::Delete,
            new_tuple: vec![],
            old_tuple: vec![datum("id", 23, DatumValue::Int32(9), true)],
            new_typeinfo: vec![],
        };
        assert_eq!(
            consumer.process_message(&delete, Lsn::from_u64(0x50), None).unwrap(),
            ControlFlow::Continue
        );

        let rows = &consumer.data_items["t"];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], crate::schema::Value::Bigint(9));
        assert!(matches!(rows[0][crate::schema::DELETED_TS_COLUMN], crate::schema::Value::Timestamp(_)));
        assert!(consumer.last_table_schema.contains_key("t"));
    }

    // scenario 6: incompatible schema change. Column `c`'s data type
    // changes between two transactions; the second transaction's change is
    // rejected, the batch stops, and only the first transaction's rows
    // survive.
    #[test]
    fn incompatible_schema_change_stops_batch_after_first_transaction() {
        let mut consumer = fresh_consumer(u64::MAX, 1000);

        consumer.process_message(&begin(None), Lsn::ZERO, None).unwrap();
        let first_insert = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: "public.\"t\"".to_string(),
            op: Op::Insert,
            new_tuple: vec![datum("c", 23, DatumValue::Int32(1), false)],
            old_tuple: vec![],
            new_typeinfo: vec![TypeInfo {
                modifier: "integer".to_string(),
                value_optional: false,
            }],
        };
        consumer.process_message(&first_insert, Lsn::from_u64(0x10), None).unwrap();
        let first_commit = consumer.process_message(&commit(), Lsn::from_u64(0x20), None).unwrap();
        assert_eq!(first_commit, ControlFlow::Continue);
        assert_eq!(consumer.last_commit_lsn, Some(Lsn::from_u64(0x20)));

        consumer.process_message(&begin(None), Lsn::from_u64(0x30), None).unwrap();
        let second_insert = RowMessage {
            transaction_id: None,
            commit_time: None,
            table: "public.\"t\"".to_string(),
            op: Op::Insert,
            new_tuple: vec![datum("c", 701, DatumValue::Double(1.5), false)],
            old_tuple: vec![],
            new_typeinfo: vec![TypeInfo {
                modifier: "double precision".to_string(),
                value_optional: false,
            }],
        };
        let result = consumer.process_message(&second_insert, Lsn::from_u64(0x40), None).unwrap();
        assert_eq!(result, ControlFlow::Stop);

        assert_eq!(consumer.data_items["t"].len(), 1);
        assert_eq!(consumer.last_commit_lsn, Some(Lsn::from_u64(0x20)));
    }

    // commit atomicity: every emitted row carries an lsn no greater than
    // the batch's last_commit_lsn, across multiple buffered rows.
    #[test]
    fn every_emitted_row_lsn_is_at_or_before_last_commit_lsn() {
        let mut consumer = fresh_consumer(u64::MAX, 1000);
        consumer.process_message(&begin(None), Lsn::ZERO, None).unwrap();

        for (i, lsn) in [(1u32, 0x10u64), (2, 0x18), (3, 0x1c)] {
            let insert = RowMessage {
                transaction_id: None,
                commit_time: None,
                table: "public.\"t\"".to_string(),
                op: Op::Insert,
                new_tuple: vec![datum("id", 23, DatumValue::Int32(i as i32), true)],
                old_tuple: vec![],
                new_typeinfo: vec![TypeInfo {
                    modifier: "integer".to_string(),
                    value_optional: false,
                }],
            };
            consumer.process_message(&insert, Lsn::from_u64(lsn), None).unwrap();
        }

        consumer.process_message(&commit(), Lsn::from_u64(0x20), None).unwrap();
        let last_commit_lsn = consumer.last_commit_lsn.unwrap();

        for row in &consumer.data_items["t"] {
            let lsn = match row[crate::schema::LSN_COLUMN] {
                crate::schema::Value::Bigint(v) => v as u64,
                _ => panic!("expected bigint lsn column"),
            };
            assert!(Lsn::from_u64(lsn) <= last_commit_lsn);
        }
    }
}
