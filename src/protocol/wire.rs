//! PostgreSQL streaming replication wire messages
//!
//! These are the outer COPY-BOTH frames (keepalive, XLogData, standby status
//! update, hot standby feedback) common to any logical replication output
//! plugin. The payload carried inside an `XLogDataMessage` is plugin-specific
//! and is decoded separately (see [`super::decoderbufs`]).

use crate::core::errors::{CdcError, CdcResult};

use super::buffer::{BufferReader, BufferWriter};
use super::lsn::Lsn;

/// Keepalive message (`'k'`) from the PostgreSQL server.
///
/// https://www.postgresql.org/docs/current/protocol-replication.html
pub struct KeepaliveMessage {
    pub message_type: char,
    pub wal_end: Lsn,
    pub timestamp: u64,
    pub reply_requested: bool,
}

impl TryFrom<BufferReader<'_>> for KeepaliveMessage {
    type Error = CdcError;

    fn try_from(reader: BufferReader<'_>) -> CdcResult<Self> {
        if !reader.has_bytes(18) {
            return Err(CdcError::protocol("Keepalive message too short"));
        }
        let mut reader = reader;
        let message_type = reader.read_char()?;
        let wal_end = Lsn::from_u64(reader.read_u64()?);
        let timestamp = reader.read_u64()?;
        let reply_requested = reader.read_u8()? != 0;

        Ok(KeepaliveMessage {
            message_type,
            wal_end,
            timestamp,
            reply_requested,
        })
    }
}

/// WAL data message (`'w'`) carrying one output-plugin change record.
pub struct XLogDataMessage {
    pub message_type: char,
    pub data_start: Lsn,
    pub wal_end: Lsn,
    pub send_time: u64,
    pub data: Vec<u8>,
}

impl TryFrom<BufferReader<'_>> for XLogDataMessage {
    type Error = CdcError;

    fn try_from(reader: BufferReader<'_>) -> CdcResult<Self> {
        if !reader.has_bytes(25) {
            return Err(CdcError::protocol("WAL message too short"));
        }
        let mut reader = reader;
        let message_type = reader.read_char()?;
        let data_start = Lsn::from_u64(reader.read_u64()?);
        let wal_end = Lsn::from_u64(reader.read_u64()?);
        let send_time = reader.read_u64()?;
        let data = reader.read_bytes(reader.remaining())?;

        Ok(XLogDataMessage {
            message_type,
            data_start,
            wal_end,
            send_time,
            data,
        })
    }
}

/// Standby status update (`'r'`) sent back to the server to acknowledge LSNs.
pub struct StandbyStatusUpdateMessage {
    pub message_type: char,
    pub write_lsn: Lsn,
    pub flush_lsn: Lsn,
    pub apply_lsn: Lsn,
    pub send_time: u64,
    pub reply_requested: u8,
}

impl StandbyStatusUpdateMessage {
    pub fn new(write_lsn: Lsn, flush_lsn: Lsn, apply_lsn: Lsn, send_time: u64) -> Self {
        Self {
            message_type: 'r',
            write_lsn,
            flush_lsn,
            apply_lsn,
            send_time,
            // spec.md §6: acknowledgements are sent with `reply=true, force=true`
            // (psycopg2 `send_feedback` semantics) so the server always replies
            // with a fresh keepalive rather than waiting for its own timer.
            reply_requested: 1,
        }
    }

    /// Serializes into the 34-byte wire form PostgreSQL expects.
    pub fn to_bytes(&self) -> CdcResult<[u8; 34]> {
        let mut buf = [0u8; 34];
        let mut writer = BufferWriter::new(&mut buf);
        writer.write_char(self.message_type)?;
        writer.write_u64(self.write_lsn.as_u64())?;
        writer.write_u64(self.flush_lsn.as_u64())?;
        writer.write_u64(self.apply_lsn.as_u64())?;
        writer.write_u64(self.send_time)?;
        writer.write_u8(self.reply_requested)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keepalive() {
        let mut data = Vec::new();
        data.push(b'k');
        data.extend_from_slice(&42u64.to_be_bytes());
        data.extend_from_slice(&100u64.to_be_bytes());
        data.push(1);

        let reader = BufferReader::new(&data);
        let keepalive = KeepaliveMessage::try_from(reader).unwrap();
        assert_eq!(keepalive.wal_end.as_u64(), 42);
        assert!(keepalive.reply_requested);
    }

    #[test]
    fn status_update_round_trips_byte_layout() {
        let msg = StandbyStatusUpdateMessage::new(Lsn(1), Lsn(1), Lsn(1), 5);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes[0], b'r');
        assert_eq!(bytes.len(), 34);
    }

    #[test]
    fn status_update_requests_a_reply() {
        // spec.md §6: acks are sent with reply=true, force=true.
        let msg = StandbyStatusUpdateMessage::new(Lsn(1), Lsn(1), Lsn(1), 5);
        assert_eq!(msg.reply_requested, 1);
        assert_eq!(msg.to_bytes().unwrap()[33], 1);
    }
}
