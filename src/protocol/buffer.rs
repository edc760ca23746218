//! Position-tracked byte buffer reader/writer for replication wire messages

use crate::core::errors::{CdcError, CdcResult};

use super::binary::{buf_recv_i16, buf_recv_i32, buf_recv_i64, buf_recv_u32, buf_recv_u64};

/// A buffer reader that manages position and provides meaningful parsing methods
#[derive(Debug)]
pub struct BufferReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    pub fn has_bytes(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn skip_message_type(&mut self) -> CdcResult<char> {
        if !self.has_bytes(1) {
            return Err(CdcError::buffer("Empty buffer or not enough bytes for message type"));
        }
        let msg_type = self.buffer[self.position] as char;
        self.position += 1;
        Ok(msg_type)
    }

    pub fn read_u8(&mut self) -> CdcResult<u8> {
        if !self.has_bytes(1) {
            return Err(CdcError::buffer("Not enough bytes for u8"));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    pub fn read_i16(&mut self) -> CdcResult<i16> {
        if !self.has_bytes(2) {
            return Err(CdcError::buffer("Not enough bytes for i16"));
        }
        let value = buf_recv_i16(&self.buffer[self.position..]);
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> CdcResult<u32> {
        if !self.has_bytes(4) {
            return Err(CdcError::buffer("Not enough bytes for u32"));
        }
        let value = buf_recv_u32(&self.buffer[self.position..]);
        self.position += 4;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> CdcResult<i32> {
        if !self.has_bytes(4) {
            return Err(CdcError::buffer("Not enough bytes for i32"));
        }
        let value = buf_recv_i32(&self.buffer[self.position..]);
        self.position += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> CdcResult<u64> {
        if !self.has_bytes(8) {
            return Err(CdcError::buffer("Not enough bytes for u64"));
        }
        let value = buf_recv_u64(&self.buffer[self.position..]);
        self.position += 8;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> CdcResult<i64> {
        if !self.has_bytes(8) {
            return Err(CdcError::buffer("Not enough bytes for i64"));
        }
        let value = buf_recv_i64(&self.buffer[self.position..]);
        self.position += 8;
        Ok(value)
    }

    pub fn read_null_terminated_string(&mut self) -> CdcResult<String> {
        let start_pos = self.position;
        while self.position < self.buffer.len() && self.buffer[self.position] != 0 {
            self.position += 1;
        }
        if self.position >= self.buffer.len() {
            return Err(CdcError::buffer("String not null-terminated"));
        }
        let string_value = String::from_utf8_lossy(&self.buffer[start_pos..self.position]).into_owned();
        self.position += 1;
        Ok(string_value)
    }

    /// Read a length-prefixed string (32-bit length followed by data).
    pub fn read_length_prefixed_string(&mut self) -> CdcResult<String> {
        let length = self.read_i32()?;
        if length < 0 {
            return Err(CdcError::buffer("Negative string length"));
        }

        const MAX_STRING_LENGTH: usize = 1024 * 1024; // 1MB limit, avoids unbounded allocation
        let length = length as usize;
        if length > MAX_STRING_LENGTH {
            return Err(CdcError::buffer("String length exceeds maximum allowed size"));
        }
        if !self.has_bytes(length) {
            return Err(CdcError::buffer("String data truncated"));
        }

        let string_value =
            String::from_utf8_lossy(&self.buffer[self.position..self.position + length]).into_owned();
        self.position += length;
        Ok(string_value)
    }

    pub fn peek_u8(&self) -> CdcResult<u8> {
        if !self.has_bytes(1) {
            return Err(CdcError::buffer("No bytes to peek"));
        }
        Ok(self.buffer[self.position])
    }

    pub fn set_position(&mut self, position: usize) -> CdcResult<()> {
        if position > self.buffer.len() {
            return Err(CdcError::buffer("Position out of bounds"));
        }
        self.position = position;
        Ok(())
    }

    pub fn read_char(&mut self) -> CdcResult<char> {
        if !self.has_bytes(1) {
            return Err(CdcError::buffer("Not enough bytes for char"));
        }
        let val = self.buffer[self.position] as char;
        self.position += 1;
        Ok(val)
    }

    pub fn read_bytes(&mut self, count: usize) -> CdcResult<Vec<u8>> {
        if !self.has_bytes(count) {
            return Err(CdcError::buffer("Not enough bytes"));
        }
        let bytes = self.buffer[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }
}

/// A buffer writer for constructing binary messages with position tracking.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    pub fn has_space(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn write_u8(&mut self, value: u8) -> CdcResult<()> {
        if !self.has_space(1) {
            return Err(CdcError::buffer("Not enough space for u8"));
        }
        self.buffer[self.position] = value;
        self.position += 1;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> CdcResult<()> {
        if !self.has_space(8) {
            return Err(CdcError::buffer("Not enough space for u64"));
        }
        super::binary::buf_send_u64(value, &mut self.buffer[self.position..]);
        self.position += 8;
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> CdcResult<()> {
        if !self.has_space(8) {
            return Err(CdcError::buffer("Not enough space for i64"));
        }
        super::binary::buf_send_i64(value, &mut self.buffer[self.position..]);
        self.position += 8;
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.position
    }

    pub fn write_char(&mut self, message_type: char) -> CdcResult<()> {
        if !self.has_space(1) {
            return Err(CdcError::buffer("Not enough space for char"));
        }
        self.buffer[self.position] = message_type as u8;
        self.position += 1;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> CdcResult<()> {
        if !self.has_space(4) {
            return Err(CdcError::buffer("Not enough space for u32"));
        }
        super::binary::buf_send_u32(value, &mut self.buffer[self.position..]);
        self.position += 4;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_null_terminated_string() {
        let data = b"hello\0rest";
        let mut reader = BufferReader::new(data);
        assert_eq!(reader.read_null_terminated_string().unwrap(), "hello");
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn rejects_oversized_length_prefixed_string() {
        let mut data = Vec::new();
        data.extend_from_slice(&(2_000_000i32).to_be_bytes());
        let mut reader = BufferReader::new(&data);
        assert!(reader.read_length_prefixed_string().is_err());
    }

    #[test]
    fn writer_round_trips_u64() {
        let mut buf = [0u8; 8];
        {
            let mut writer = BufferWriter::new(&mut buf);
            writer.write_u64(42).unwrap();
        }
        let mut reader = BufferReader::new(&buf);
        assert_eq!(reader.read_u64().unwrap(), 42);
    }
}
