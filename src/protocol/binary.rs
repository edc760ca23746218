//! Binary data manipulation utilities for PostgreSQL protocol handling
//!
//! Provides functions for reading and writing binary data with proper endianness
//! handling for network byte order communication with PostgreSQL.

// Type aliases matching PostgreSQL internal types
pub type XLogRecPtr = u64; // WAL location pointer
#[allow(dead_code)]
pub type Xid = u32; // Transaction ID
#[allow(dead_code)]
pub type Oid = u32; // Object ID
#[allow(dead_code)]
pub type TimestampTz = i64; // Timestamp with timezone

pub const INVALID_XLOG_REC_PTR: XLogRecPtr = 0;

/// Seconds from the Unix epoch (1970-01-01) to the PostgreSQL epoch (2000-01-01).
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Converts a [`std::time::SystemTime`] to a PostgreSQL `TimestampTz` (
/// microseconds since the PostgreSQL epoch), the unit `StandbyStatusUpdate`
/// and keepalive messages carry on the wire.
pub fn pg_epoch_micros(time: std::time::SystemTime) -> TimestampTz {
    let since_unix = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO);
    let unix_micros = since_unix.as_secs() as i64 * 1_000_000 + since_unix.subsec_micros() as i64;
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

pub fn buf_recv_u32(buf: &[u8]) -> u32 {
    assert!(buf.len() >= 4);
    u32::from_be_bytes(buf[..4].try_into().unwrap())
}

pub fn buf_recv_u64(buf: &[u8]) -> u64 {
    assert!(buf.len() >= 8);
    u64::from_be_bytes(buf[..8].try_into().unwrap())
}

pub fn buf_recv_i16(buf: &[u8]) -> i16 {
    assert!(buf.len() >= 2);
    i16::from_be_bytes(buf[..2].try_into().unwrap())
}

pub fn buf_recv_i32(buf: &[u8]) -> i32 {
    assert!(buf.len() >= 4);
    i32::from_be_bytes(buf[..4].try_into().unwrap())
}

pub fn buf_recv_i64(buf: &[u8]) -> i64 {
    assert!(buf.len() >= 8);
    i64::from_be_bytes(buf[..8].try_into().unwrap())
}

pub fn buf_send_u32(val: u32, buf: &mut [u8]) {
    assert!(buf.len() >= 4);
    buf[..4].copy_from_slice(&val.to_be_bytes());
}

pub fn buf_send_u64(val: u64, buf: &mut [u8]) {
    assert!(buf.len() >= 8);
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

pub fn buf_send_i64(val: i64, buf: &mut [u8]) {
    assert!(buf.len() >= 8);
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_u64() {
        let mut buf = [0u8; 8];
        buf_send_u64(0x0123_4567_89ab_cdef, &mut buf);
        assert_eq!(buf_recv_u64(&buf), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn round_trips_i32() {
        let mut buf = [0u8; 4];
        buf_send_u32((-42i32) as u32, &mut buf);
        assert_eq!(buf_recv_i32(&buf), -42);
    }
}
