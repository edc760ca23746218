//! Maps a PostgreSQL type OID + atttypmod to an internal column type
//!
//! Ported from `_to_dlt_column_type`/`_get_precision`/`_get_scale` in the
//! dlt `pg_legacy_replication` source this engine's schema handling is
//! modeled on; OIDs and precision/scale formulas are reproduced exactly.

use std::fmt;

/// Internal column data type, matching the type system the Dispatcher's
/// destination side understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bigint,
    Binary,
    Bool,
    Complex,
    Date,
    Decimal,
    Double,
    Text,
    Time,
    Timestamp,
    Wei,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Bigint => "bigint",
            DataType::Binary => "binary",
            DataType::Bool => "bool",
            DataType::Complex => "complex",
            DataType::Date => "date",
            DataType::Decimal => "decimal",
            DataType::Double => "double",
            DataType::Text => "text",
            DataType::Time => "time",
            DataType::Timestamp => "timestamp",
            DataType::Wei => "wei",
        };
        write!(f, "{s}")
    }
}

/// `type_id → DataType`, restricted to the OIDs the source replication
/// stream actually surfaces. Anything else defaults to `Text`.
fn pg_type_from_oid(type_id: u32) -> DataType {
    match type_id {
        16 => DataType::Bool,
        17 => DataType::Binary,
        20 => DataType::Bigint,
        21 => DataType::Bigint,  // smallint, widened; precision distinguishes it
        23 => DataType::Bigint,  // integer, widened; precision distinguishes it
        701 => DataType::Double,
        1043 => DataType::Text,
        1082 => DataType::Date,
        1083 => DataType::Time,
        1184 => DataType::Timestamp,
        1700 => DataType::Decimal,
        3802 => DataType::Complex,
        _ => DataType::Text,
    }
}

/// Precision, in bits for integers and digits for numeric/varchar/time types.
///
/// See https://stackoverflow.com/a/3351120 for the `atttypmod` bit layout
/// the numeric/varchar branches decode.
pub fn precision(type_id: u32, atttypmod: i32) -> Option<u32> {
    match type_id {
        21 => return Some(16), // smallint
        23 => return Some(32), // integer
        20 => return Some(64), // bigint
        _ => {}
    }
    if atttypmod == -1 {
        return None;
    }
    match type_id {
        1700 => Some((((atttypmod - 4) >> 16) & 0xFFFF) as u32), // numeric
        1083 | 1184 => Some(atttypmod as u32),                   // time, timestamptz
        1043 => Some((atttypmod - 4) as u32),                    // varchar
        _ => None,
    }
}

/// Scale: digits after the decimal point for `numeric`, `0` for integers.
pub fn scale(type_id: u32, atttypmod: i32) -> Option<u32> {
    if atttypmod == -1 {
        return None;
    }
    match type_id {
        21 | 23 | 20 => Some(0),
        1700 => Some(((atttypmod - 4) & 0xFFFF) as u32),
        _ => None,
    }
}

/// Converts a postgres type OID + atttypmod into an internal column type.
///
/// Type OIDs not in the known set default to `Text`.
pub fn column_type(type_id: u32, atttypmod: i32) -> (DataType, Option<u32>, Option<u32>) {
    let data_type = pg_type_from_oid(type_id);
    (data_type, precision(type_id, atttypmod), scale(type_id, atttypmod))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallint_precision_is_16() {
        let (dt, prec, sc) = column_type(21, -1);
        assert_eq!(dt, DataType::Bigint);
        assert_eq!(prec, Some(16));
        assert_eq!(sc, Some(0));
    }

    #[test]
    fn numeric_precision_and_scale_from_atttypmod() {
        // numeric(10, 2): atttypmod = ((10 << 16) | 2) + 4
        let atttypmod = ((10i32) << 16 | 2) + 4;
        let (dt, prec, sc) = column_type(1700, atttypmod);
        assert_eq!(dt, DataType::Decimal);
        assert_eq!(prec, Some(10));
        assert_eq!(sc, Some(2));
    }

    #[test]
    fn varchar_precision_subtracts_header() {
        let (dt, prec, _) = column_type(1043, 50 + 4);
        assert_eq!(dt, DataType::Text);
        assert_eq!(prec, Some(50));
    }

    #[test]
    fn unknown_oid_defaults_to_text() {
        let (dt, _, _) = column_type(99999, -1);
        assert_eq!(dt, DataType::Text);
    }
}
