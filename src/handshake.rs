use byteorder::{BigEndian, ReadBytesExt};
use bytes::Buf;
use log::{debug, trace};
use tokio::io::AsyncRead;
use tokio::time::Duration;

use crate::packet_stream::{read_frame_recorded, with_timeout};
use crate::varint::read_varint;

/// Packet id of the serverbound handshake.
pub const HANDSHAKE_PACKET_ID: u32 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
}

impl NextState {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(NextState::Status),
            2 => Some(NextState::Login),
            _ => None,
        }
    }
}

/// What the inspector learned from the first packet of a connection.
///
/// `raw_bytes` is exactly what came off the socket (length prefix included)
/// and is replayed verbatim if the connection ends up proxied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRecord {
    pub next_state: Option<NextState>,
    pub raw_bytes: Vec<u8>,
}

impl HandshakeRecord {
    pub fn is_login(&self) -> bool {
        self.next_state == Some(NextState::Login)
    }
}

/// Reads the first packet with a bounded timeout and classifies it.
///
/// Never fails: a timeout, early close or malformed frame yields
/// `next_state: None` together with whatever bytes were captured.
pub async fn inspect_handshake<R>(reader: &mut R, timeout: Duration) -> HandshakeRecord
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let next_state = match with_timeout(timeout, read_frame_recorded(reader, &mut raw)).await {
        Ok(payload_start) => parse_next_state(&raw[payload_start..]),
        Err(e) => {
            debug!("Handshake inspection ended early ({} bytes): {}", raw.len(), e);
            None
        }
    };
    HandshakeRecord {
        next_state,
        raw_bytes: raw,
    }
}

/// Walks a handshake payload: id, protocol version, address, port, next state.
pub fn parse_next_state(payload: &[u8]) -> Option<NextState> {
    let mut cursor = payload;

    let packet_id = read_varint(&mut cursor).ok()?;
    if packet_id != HANDSHAKE_PACKET_ID {
        trace!("First packet id 0x{:02X} is not a handshake", packet_id);
        return None;
    }
    let protocol = read_varint(&mut cursor).ok()?;

    let address_len = read_varint(&mut cursor).ok()? as usize;
    if address_len > cursor.remaining() {
        return None;
    }
    cursor.advance(address_len);

    let port = cursor.read_u16::<BigEndian>().ok()?;
    let next_state = read_varint(&mut cursor).ok()?;
    trace!(
        "Handshake protocol={} port={} next_state={}",
        protocol,
        port,
        next_state
    );
    NextState::from_wire(next_state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::varint::{frame_packet, write_string, write_varint};
    use tokio::io::AsyncWriteExt;

    pub(crate) fn handshake_bytes(next_state: u32) -> Vec<u8> {
        let mut body = Vec::new();
        write_varint(767, &mut body);
        write_string("play.example.net", &mut body);
        body.extend_from_slice(&25565u16.to_be_bytes());
        write_varint(next_state, &mut body);
        frame_packet(HANDSHAKE_PACKET_ID, &body)
    }

    #[tokio::test]
    async fn classifies_login_and_keeps_raw_bytes() {
        let wire = handshake_bytes(2);
        let mut reader = wire.as_slice();
        let record = inspect_handshake(&mut reader, Duration::from_secs(1)).await;
        assert_eq!(record.next_state, Some(NextState::Login));
        assert_eq!(record.raw_bytes, wire);
        assert!(record.is_login());
    }

    #[tokio::test]
    async fn does_not_consume_the_following_packet() {
        let mut wire = handshake_bytes(1);
        let status_request = frame_packet(0x00, b"");
        wire.extend_from_slice(&status_request);
        let mut reader = wire.as_slice();
        let record = inspect_handshake(&mut reader, Duration::from_secs(1)).await;
        assert_eq!(record.next_state, Some(NextState::Status));
        assert_eq!(reader, status_request.as_slice());
    }

    #[tokio::test]
    async fn replaying_captured_bytes_gives_the_same_answer() {
        for state in [1, 2, 3] {
            let wire = handshake_bytes(state);
            let first = inspect_handshake(&mut wire.as_slice(), Duration::from_secs(1)).await;
            let second =
                inspect_handshake(&mut first.raw_bytes.as_slice(), Duration::from_secs(1)).await;
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn unknown_next_state_is_none() {
        let wire = handshake_bytes(3);
        let record = inspect_handshake(&mut wire.as_slice(), Duration::from_secs(1)).await;
        assert_eq!(record.next_state, None);
        assert_eq!(record.raw_bytes, wire);
    }

    #[tokio::test]
    async fn non_handshake_packet_id_degrades_to_none() {
        let wire = frame_packet(0x05, &[1, 2, 3]);
        let record = inspect_handshake(&mut wire.as_slice(), Duration::from_secs(1)).await;
        assert_eq!(record.next_state, None);
        assert_eq!(record.raw_bytes, wire);
    }

    #[test]
    fn address_longer_than_payload_is_none() {
        let mut body = Vec::new();
        write_varint(0x00, &mut body);
        write_varint(767, &mut body);
        write_varint(200, &mut body);
        body.extend_from_slice(b"short");
        assert_eq!(parse_next_state(&body), None);
    }

    #[tokio::test]
    async fn silent_client_times_out_with_partial_capture() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x10, 0x00]).await.unwrap();
        let record = inspect_handshake(&mut server, Duration::from_millis(50)).await;
        assert_eq!(record.next_state, None);
        assert_eq!(record.raw_bytes, vec![0x10, 0x00]);
    }
}
