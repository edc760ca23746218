//! Builds a table schema from a decoded row message, and fingerprints it
//!
//! Ported from `_extract_table_schema`/`hash_typeinfo` in the dlt
//! `pg_legacy_replication` source.

use std::collections::HashSet;

use blake2::Blake2bVar;
use blake2::digest::{Update, VariableOutput};

use crate::core::errors::{CdcError, CdcResult};
use crate::protocol::decoderbufs::{DatumMessage, Op, RowMessage, TypeInfo};

use super::type_mapper::column_type;
use super::{ColumnSchema, TableSchema};

/// Unquoted table name, the second dotted component of `schema."name"`.
///
/// Also recognizes the original source's snapshot-table naming convention
/// (`"<table>_snapshot_<snapshot_name>"`) so a snapshot table and its live
/// counterpart resolve to the same table name; the snapshot half itself is
/// out of scope here and simply discarded.
pub fn extract_table_name(qualified: &str) -> CdcResult<String> {
    let (_, raw_name) = qualified
        .split_once('.')
        .ok_or_else(|| CdcError::malformed(format!("malformed table identifier '{qualified}'")))?;

    let unquoted = raw_name.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(raw_name);

    Ok(strip_snapshot_suffix(unquoted).to_string())
}

fn strip_snapshot_suffix(table_name: &str) -> &str {
    if let Some(idx) = table_name.find("_snapshot_") {
        let (base, _) = table_name.split_at(idx);
        if !base.is_empty() {
            return base;
        }
    }
    table_name
}

fn source_tuple(msg: &RowMessage) -> &[DatumMessage] {
    if msg.op == Op::Delete {
        &msg.old_tuple
    } else {
        &msg.new_tuple
    }
}

/// Infers a [`TableSchema`] from a decoded row message.
///
/// `new_typeinfo` (absent for DELETE) supplies `nullable`; when absent the
/// column's nullability is left unset.
pub fn infer_table_schema(msg: &RowMessage, included_columns: Option<&HashSet<String>>) -> CdcResult<TableSchema> {
    let table_name = extract_table_name(&msg.table)?;
    let mut schema = TableSchema::new(table_name);

    let datums = source_tuple(msg);
    let typeinfo = if msg.op == Op::Delete { &[][..] } else { &msg.new_typeinfo[..] };

    for (idx, datum) in datums.iter().enumerate() {
        if let Some(allow_list) = included_columns {
            if !allow_list.contains(&datum.column_name) {
                continue;
            }
        }

        let (data_type, precision, scale) = column_type(datum.column_type, datum.atttypmod);
        let mut column = ColumnSchema::new(&datum.column_name, data_type);
        column.precision = precision;
        column.scale = scale;
        column.primary_key = Some(datum.part_of_pkey);

        if let Some(ti) = typeinfo.get(idx) {
            column.nullable = Some(ti.value_optional);
        }

        schema.columns.insert(datum.column_name.clone(), column);
    }

    Ok(schema.with_replication_columns())
}

/// 64-bit stable hash over `[(modifier, value_optional)]`, matching the
/// source's `hashlib.blake2b(repr(tuple), digest_size=8)`.
pub fn fingerprint(typeinfo: &[TypeInfo]) -> u64 {
    let canonical = typeinfo
        .iter()
        .map(|ti| format!("({:?}, {})", ti.modifier, if ti.value_optional { "True" } else { "False" }))
        .collect::<Vec<_>>()
        .join(", ");

    let mut hasher = Blake2bVar::new(8).expect("8-byte Blake2bVar output is valid");
    hasher.update(canonical.as_bytes());
    let mut out = [0u8; 8];
    hasher.finalize_variable(&mut out).expect("8-byte buffer matches requested output size");
    u64::from_be_bytes(out)
}
