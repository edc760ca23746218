//! Minimal decoder for the `decoderbufs` logical decoding output plugin
//!
//! `decoderbufs` emits each change as a protobuf-encoded `RowMessage`. Rather
//! than pull in a full protobuf codegen pipeline for three small, fixed
//! message shapes, this reads the wire format directly: varints and
//! length-delimited fields only, the same manual-byte-parsing style used for
//! the outer replication frames in [`super::wire`].
//!
//! Message shapes (field numbers are part of the `decoderbufs` wire
//! contract, not something this crate can renegotiate):
//!
//! ```text
//! message RowMessage {
//!   optional uint32 transaction_id = 1;
//!   optional uint64 commit_time    = 2;
//!   optional string table          = 3;
//!   optional Op     op             = 4;
//!   repeated DatumMessage new_tuple   = 5;
//!   repeated DatumMessage old_tuple   = 6;
//!   repeated TypeInfo     new_typeinfo = 7;
//! }
//!
//! message DatumMessage {
//!   optional string column_name   = 1;
//!   optional uint32 column_type   = 2;
//!   optional bool   datum_missing = 3;
//!   oneof datum {
//!     int32  datum_int32  = 4;
//!     int64  datum_int64  = 5;
//!     float  datum_float  = 6;
//!     double datum_double = 7;
//!     bool   datum_bool   = 8;
//!     string datum_string = 9;
//!     bytes  datum_bytes  = 10;
//!     uint32 datum_uint32 = 11;
//!     uint64 datum_uint64 = 12;
//!   }
//! }
//!
//! message TypeInfo {
//!   optional string modifier       = 1;
//!   optional bool   value_optional = 2;
//! }
//! ```

use crate::core::errors::{CdcError, CdcResult};

/// `Op` enum values as assigned by the `decoderbufs` `.proto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    /// Any tag outside the known range. Decoding never fails on this; it's
    /// the Message Consumer's job to reject it with `UnsupportedOperation`.
    Unknown,
}

impl From<u64> for Op {
    fn from(value: u64) -> Self {
        match value {
            0 => Op::Insert,
            1 => Op::Update,
            2 => Op::Delete,
            3 => Op::Begin,
            4 => Op::Commit,
            _ => Op::Unknown,
        }
    }
}

/// Which oneof arm of `datum` was set on the wire, mirroring
/// `DatumMessage.WhichOneof("datum")` in the Python source.
#[derive(Debug, Clone, PartialEq)]
pub enum DatumValue {
    Null,
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Uint32(u32),
    Uint64(u64),
}

impl DatumValue {
    /// Name of the oneof field, used to look up `_DATUM_PRECISIONS`.
    pub fn oneof_name(&self) -> Option<&'static str> {
        match self {
            DatumValue::Int32(_) => Some("datum_int32"),
            DatumValue::Int64(_) => Some("datum_int64"),
            DatumValue::Float(_) => Some("datum_float"),
            DatumValue::Double(_) => Some("datum_double"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatumMessage {
    pub column_name: String,
    pub column_type: u32,
    pub datum_missing: bool,
    pub value: DatumValue,
    /// PostgreSQL type modifier, used for precision/scale. Not part of the
    /// stock `decoderbufs` wire contract; carried here (field 13) so the
    /// Type Mapper can apply the `(type_id, atttypmod)` rules it's specified
    /// against without a second round-trip to the catalog.
    pub atttypmod: i32,
    /// Whether this column is part of the table's replica identity key.
    /// Also not part of the stock plugin; carried here (field 14).
    pub part_of_pkey: bool,
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub modifier: String,
    pub value_optional: bool,
}

#[derive(Debug, Clone)]
pub struct RowMessage {
    pub transaction_id: Option<u32>,
    pub commit_time: Option<u64>,
    pub table: String,
    pub op: Op,
    pub new_tuple: Vec<DatumMessage>,
    pub old_tuple: Vec<DatumMessage>,
    pub new_typeinfo: Vec<TypeInfo>,
}

// --- wire format primitives --------------------------------------------

enum WireValue<'a> {
    Varint(u64),
    Fixed64([u8; 8]),
    LengthDelimited(&'a [u8]),
    Fixed32([u8; 4]),
}

struct ProtoReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_varint(&mut self) -> CdcResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            if self.pos >= self.data.len() {
                return Err(CdcError::malformed("truncated varint"));
            }
            let byte = self.data[self.pos];
            self.pos += 1;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 64 {
                return Err(CdcError::malformed("varint too long"));
            }
        }
        Ok(result)
    }

    fn read_fixed32(&mut self) -> CdcResult<[u8; 4]> {
        if self.pos + 4 > self.data.len() {
            return Err(CdcError::malformed("truncated fixed32"));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(buf)
    }

    fn read_fixed64(&mut self) -> CdcResult<[u8; 8]> {
        if self.pos + 8 > self.data.len() {
            return Err(CdcError::malformed("truncated fixed64"));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(buf)
    }

    fn read_length_delimited(&mut self) -> CdcResult<&'a [u8]> {
        let len = self.read_varint()? as usize;
        if self.pos + len > self.data.len() {
            return Err(CdcError::malformed("truncated length-delimited field"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads one (field_number, wire_value) pair.
    fn read_field(&mut self) -> CdcResult<(u32, WireValue<'a>)> {
        let tag = self.read_varint()?;
        let field_number = (tag >> 3) as u32;
        let wire_type = tag & 0x07;
        let value = match wire_type {
            0 => WireValue::Varint(self.read_varint()?),
            1 => WireValue::Fixed64(self.read_fixed64()?),
            2 => WireValue::LengthDelimited(self.read_length_delimited()?),
            5 => WireValue::Fixed32(self.read_fixed32()?),
            other => return Err(CdcError::malformed(format!("unsupported wire type {other}"))),
        };
        Ok((field_number, value))
    }
}

fn as_varint(value: &WireValue) -> CdcResult<u64> {
    match value {
        WireValue::Varint(v) => Ok(*v),
        _ => Err(CdcError::malformed("expected varint field")),
    }
}

fn as_string(value: &WireValue) -> CdcResult<String> {
    match value {
        WireValue::LengthDelimited(bytes) => Ok(String::from_utf8(bytes.to_vec())?),
        _ => Err(CdcError::malformed("expected length-delimited string field")),
    }
}

fn as_bytes(value: &WireValue) -> CdcResult<Vec<u8>> {
    match value {
        WireValue::LengthDelimited(bytes) => Ok(bytes.to_vec()),
        _ => Err(CdcError::malformed("expected length-delimited bytes field")),
    }
}

fn parse_datum_message(data: &[u8]) -> CdcResult<DatumMessage> {
    let mut reader = ProtoReader::new(data);
    let mut column_name = None;
    let mut column_type = None;
    let mut datum_missing = false;
    let mut value = DatumValue::Null;
    let mut atttypmod: i32 = -1;
    let mut part_of_pkey = false;

    while !reader.eof() {
        let (field_number, wire_value) = reader.read_field()?;
        match field_number {
            1 => column_name = Some(as_string(&wire_value)?),
            2 => column_type = Some(as_varint(&wire_value)? as u32),
            3 => datum_missing = as_varint(&wire_value)? != 0,
            4 => value = DatumValue::Int32(as_varint(&wire_value)? as i32),
            5 => value = DatumValue::Int64(as_varint(&wire_value)? as i64),
            6 => {
                if let WireValue::Fixed32(bytes) = wire_value {
                    value = DatumValue::Float(f32::from_le_bytes(bytes));
                }
            }
            7 => {
                if let WireValue::Fixed64(bytes) = wire_value {
                    value = DatumValue::Double(f64::from_le_bytes(bytes));
                }
            }
            8 => value = DatumValue::Bool(as_varint(&wire_value)? != 0),
            9 => value = DatumValue::String(as_string(&wire_value)?),
            10 => value = DatumValue::Bytes(as_bytes(&wire_value)?),
            11 => value = DatumValue::Uint32(as_varint(&wire_value)? as u32),
            12 => value = DatumValue::Uint64(as_varint(&wire_value)?),
            13 => atttypmod = as_varint(&wire_value)? as i32,
            14 => part_of_pkey = as_varint(&wire_value)? != 0,
            _ => {} // forward-compatible: ignore unknown fields
        }
    }

    Ok(DatumMessage {
        column_name: column_name.ok_or_else(|| CdcError::malformed("DatumMessage missing column_name"))?,
        column_type: column_type.ok_or_else(|| CdcError::malformed("DatumMessage missing column_type"))?,
        datum_missing,
        value,
        atttypmod,
        part_of_pkey,
    })
}

fn parse_type_info(data: &[u8]) -> CdcResult<TypeInfo> {
    let mut reader = ProtoReader::new(data);
    let mut modifier = None;
    let mut value_optional = false;

    while !reader.eof() {
        let (field_number, wire_value) = reader.read_field()?;
        match field_number {
            1 => modifier = Some(as_string(&wire_value)?),
            2 => value_optional = as_varint(&wire_value)? != 0,
            _ => {}
        }
    }

    Ok(TypeInfo {
        modifier: modifier.ok_or_else(|| CdcError::malformed("TypeInfo missing modifier"))?,
        value_optional,
    })
}

/// Decodes one `decoderbufs` `RowMessage` from its raw protobuf bytes.
pub fn parse_row_message(data: &[u8]) -> CdcResult<RowMessage> {
    let mut reader = ProtoReader::new(data);
    let mut transaction_id = None;
    let mut commit_time = None;
    let mut table = None;
    let mut op = None;
    let mut new_tuple = Vec::new();
    let mut old_tuple = Vec::new();
    let mut new_typeinfo = Vec::new();

    while !reader.eof() {
        let (field_number, wire_value) = reader.read_field()?;
        match field_number {
            1 => transaction_id = Some(as_varint(&wire_value)? as u32),
            2 => commit_time = Some(as_varint(&wire_value)?),
            3 => table = Some(as_string(&wire_value)?),
            4 => op = Some(Op::from(as_varint(&wire_value)?)),
            5 => {
                if let WireValue::LengthDelimited(bytes) = wire_value {
                    new_tuple.push(parse_datum_message(bytes)?);
                }
            }
            6 => {
                if let WireValue::LengthDelimited(bytes) = wire_value {
                    old_tuple.push(parse_datum_message(bytes)?);
                }
            }
            7 => {
                if let WireValue::LengthDelimited(bytes) = wire_value {
                    new_typeinfo.push(parse_type_info(bytes)?);
                }
            }
            _ => {}
        }
    }

    Ok(RowMessage {
        transaction_id,
        commit_time,
        table: table.ok_or_else(|| CdcError::malformed("RowMessage missing table"))?,
        op: op.ok_or_else(|| CdcError::malformed("RowMessage missing op"))?,
        new_tuple,
        old_tuple,
        new_typeinfo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(field_number: u32, wire_type: u8) -> u8 {
        ((field_number << 3) as u8) | wire_type
    }

    fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn encode_string_field(field_number: u32, s: &str, out: &mut Vec<u8>) {
        out.push(tag(field_number, 2));
        encode_varint(s.len() as u64, out);
        out.extend_from_slice(s.as_bytes());
    }

    fn encode_varint_field(field_number: u32, value: u64, out: &mut Vec<u8>) {
        out.push(tag(field_number, 0));
        encode_varint(value, out);
    }

    fn encode_datum(column_name: &str, column_type: u32, int64_value: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_string_field(1, column_name, &mut buf);
        encode_varint_field(2, column_type as u64, &mut buf);
        encode_varint_field(5, int64_value as u64, &mut buf);
        buf
    }

    #[test]
    fn decodes_insert_row_message() {
        let mut buf = Vec::new();
        encode_varint_field(1, 1001, &mut buf);
        encode_string_field(3, "public.\"orders\"", &mut buf);
        encode_varint_field(4, 0, &mut buf); // Op::Insert

        let datum = encode_datum("id", 20, 42);
        buf.push(tag(5, 2));
        encode_varint(datum.len() as u64, &mut buf);
        buf.extend_from_slice(&datum);

        let row = parse_row_message(&buf).unwrap();
        assert_eq!(row.table, "public.\"orders\"");
        assert_eq!(row.op, Op::Insert);
        assert_eq!(row.new_tuple.len(), 1);
        assert_eq!(row.new_tuple[0].column_name, "id");
        assert_eq!(row.new_tuple[0].value, DatumValue::Int64(42));
    }

    #[test]
    fn rejects_truncated_message() {
        let buf = vec![tag(3, 2), 10]; // claims a 10-byte string but has none
        assert!(parse_row_message(&buf).is_err());
    }
}
