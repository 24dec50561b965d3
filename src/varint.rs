use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// A VarInt never spans more than five 7-bit groups (32-bit ceiling).
pub const MAX_VARINT_LEN: usize = 5;

/// Writes a VarInt into the provided buffer.
pub fn write_varint<B: BufMut>(mut value: u32, buf: &mut B) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn encode_varint(value: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    write_varint(value, &mut buf);
    buf
}

/// Reads a VarInt from an in-memory buffer, advancing it past the value.
pub fn read_varint<B: Buf>(buf: &mut B) -> Result<u32, ProtocolError> {
    let mut result = 0u32;
    for num_read in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as u32) << (7 * num_read);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(ProtocolError::MalformedVarint)
}

/// Incremental VarInt decoder for sources that hand out one byte at a time.
#[derive(Debug, Default)]
pub struct VarIntDecoder {
    value: u32,
    groups: usize,
}

impl VarIntDecoder {
    /// Feeds one byte. Returns the decoded value once the terminating byte
    /// has been seen.
    pub fn push(&mut self, byte: u8) -> Result<Option<u32>, ProtocolError> {
        if self.groups >= MAX_VARINT_LEN {
            return Err(ProtocolError::MalformedVarint);
        }
        self.value |= ((byte & 0x7F) as u32) << (7 * self.groups);
        self.groups += 1;
        if byte & 0x80 == 0 {
            Ok(Some(self.value))
        } else if self.groups == MAX_VARINT_LEN {
            Err(ProtocolError::MalformedVarint)
        } else {
            Ok(None)
        }
    }
}

/// Appends a VarInt length and a UTF-8 string to the buffer.
pub fn write_string<B: BufMut>(s: &str, buf: &mut B) {
    write_varint(s.len() as u32, buf);
    buf.put_slice(s.as_bytes());
}

/// Frames a packet as `varint(len) ++ varint(packet_id) ++ body`.
pub fn frame_packet(packet_id: u32, body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_VARINT_LEN + body.len());
    write_varint(packet_id, &mut data);
    data.put_slice(body);

    let mut packet = Vec::with_capacity(MAX_VARINT_LEN + data.len());
    write_varint(data.len() as u32, &mut packet);
    packet.put_slice(&data);
    packet
}
