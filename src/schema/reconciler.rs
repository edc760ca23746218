//! Compares a newly inferred table schema against the cached one
//!
//! Ported from `compare_schemas`/`ALLOWED_COL_SCHEMA_FIELDS` in the dlt
//! `pg_legacy_replication` source, minus the latter's extra-field check.
//!
//! The source's `ALLOWED_COL_SCHEMA_FIELDS` guards against a `new` schema
//! dict carrying keys outside `{name, data_type, nullable, precision,
//! scale}`, which is meaningful there because `TColumnSchema` is an
//! unconstrained dict. `_to_dlt_column_schema` always sets `primary_key` on
//! every column it produces, though, so a literal port of that check would
//! reject every schema this crate ever infers (`primary_key` is outside the
//! allowed set) -- `compare_schemas` would never actually retain a merged
//! schema in practice, only ever raise. This port's `ColumnSchema` is a
//! fixed Rust struct with exactly `{name, data_type, nullable, precision,
//! scale, primary_key}` as its fields: there is no dict-like path by which a
//! `ColumnSchema` value could carry a field outside that set, so there is no
//! runtime check to perform. See DESIGN.md's reconciler entry for the full
//! resolution.

use crate::core::errors::{CdcError, CdcResult};

use super::{ColumnSchema, TableSchema};

/// Merges one column pair under the "earliest-seen wins" policy: `last`'s
/// value is kept whenever present, falling back to `new`'s. This is the
/// literal behavior of the source's `s1.get(field, s2.get(field))` — see
/// the open-question note on whether "earlier" or "more precise" was
/// intended; this implementation follows "earlier" exactly.
fn merge_column(last: &ColumnSchema, new: &ColumnSchema) -> ColumnSchema {
    ColumnSchema {
        name: last.name.clone(),
        data_type: last.data_type,
        nullable: last.nullable.or(new.nullable),
        precision: last.precision.or(new.precision),
        scale: last.scale.or(new.scale),
        primary_key: last.primary_key.or(new.primary_key),
    }
}

/// Reconciles `new` against the cached `last` schema for the same table.
///
/// Every column in `last` must exist in `new` with the same `data_type`;
/// the merged schema contains exactly the columns listed in `last`.
pub fn reconcile(last: &TableSchema, new: &TableSchema) -> CdcResult<TableSchema> {
    let mut merged = TableSchema::new(last.name.clone());

    for (name, last_col) in &last.columns {
        let new_col = new.columns.get(name).ok_or_else(|| {
            CdcError::incompatible_schema(name.clone(), "column missing from newly inferred schema")
        })?;

        if new_col.data_type != last_col.data_type {
            return Err(CdcError::incompatible_schema(
                name.clone(),
                format!("data_type changed from {} to {}", last_col.data_type, new_col.data_type),
            ));
        }

        merged.columns.insert(name.clone(), merge_column(last_col, new_col));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::type_mapper::DataType;

    fn schema_with(name: &str, mut col: ColumnSchema) -> TableSchema {
        col.name = col.name.clone();
        let mut s = TableSchema::new(name);
        s.columns.insert(col.name.clone(), col);
        s
    }

    #[test]
    fn reconciles_compatible_schemas_keeping_earlier_precision() {
        let mut last_col = ColumnSchema::new("amount", DataType::Decimal);
        last_col.precision = Some(10);
        last_col.scale = Some(2);
        let last = schema_with("orders", last_col);

        let mut new_col = ColumnSchema::new("amount", DataType::Decimal);
        new_col.precision = Some(20);
        new_col.scale = Some(4);
        let new = schema_with("orders", new_col);

        let merged = reconcile(&last, &new).unwrap();
        let merged_col = &merged.columns["amount"];
        assert_eq!(merged_col.precision, Some(10));
        assert_eq!(merged_col.scale, Some(2));
    }

    #[test]
    fn rejects_incompatible_data_type_change() {
        let last = schema_with("orders", ColumnSchema::new("id", DataType::Bigint));
        let new = schema_with("orders", ColumnSchema::new("id", DataType::Text));

        let err = reconcile(&last, &new);
        assert!(matches!(err, Err(CdcError::IncompatibleSchema { .. })));
    }

    #[test]
    fn rejects_column_missing_from_new_schema() {
        let last = schema_with("orders", ColumnSchema::new("id", DataType::Bigint));
        let new = TableSchema::new("orders");

        let err = reconcile(&last, &new);
        assert!(err.is_err());
    }

    #[test]
    fn fills_missing_precision_from_new_when_last_lacks_it() {
        let last_col = ColumnSchema::new("amount", DataType::Decimal);
        let last = schema_with("orders", last_col);

        let mut new_col = ColumnSchema::new("amount", DataType::Decimal);
        new_col.precision = Some(20);
        let new = schema_with("orders", new_col);

        let merged = reconcile(&last, &new).unwrap();
        assert_eq!(merged.columns["amount"].precision, Some(20));
    }

    #[test]
    fn primary_key_on_new_schema_is_not_an_unexpected_field() {
        // every schema `schema::inferencer::infer_table_schema` produces sets
        // `primary_key`; reconciliation must not treat that as an extra field.
        let mut last_col = ColumnSchema::new("id", DataType::Bigint);
        last_col.primary_key = Some(true);
        let last = schema_with("orders", last_col);

        let mut new_col = ColumnSchema::new("id", DataType::Bigint);
        new_col.primary_key = Some(true);
        let new = schema_with("orders", new_col);

        let merged = reconcile(&last, &new).unwrap();
        assert_eq!(merged.columns["id"].primary_key, Some(true));
    }
}
