use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Duration;

use crate::error::ProtocolError;
use crate::varint::{read_varint, VarIntDecoder};

/// Largest frame a vanilla client may send (three VarInt groups).
pub const MAX_PACKET_LEN: usize = 2_097_151;

/// One decoded packet: the leading VarInt id and whatever follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub id: u32,
    pub body: Vec<u8>,
}

/// Reads exactly `n` bytes, appending them to `out` as they arrive so the
/// caller keeps whatever was received even if the future is cancelled.
pub async fn read_exact_into<R>(
    reader: &mut R,
    n: usize,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let target = out.len() + n;
    let mut chunk = [0u8; 1024];
    while out.len() < target {
        let want = (target - out.len()).min(chunk.len());
        let read = reader.read(&mut chunk[..want]).await?;
        if read == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        out.extend_from_slice(&chunk[..read]);
    }
    Ok(())
}

pub async fn read_exact<R>(reader: &mut R, n: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(n);
    read_exact_into(reader, n, &mut out).await?;
    Ok(out)
}

/// Reads a VarInt one byte at a time, recording the raw bytes in `raw`.
pub async fn read_varint_recorded<R>(
    reader: &mut R,
    raw: &mut Vec<u8>,
) -> Result<u32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = VarIntDecoder::default();
    loop {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte).await? == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        raw.push(byte[0]);
        if let Some(value) = decoder.push(byte[0])? {
            return Ok(value);
        }
    }
}

/// Reads one length-prefixed frame, appending prefix and payload to `raw`.
/// Returns the offset in `raw` where the payload starts.
pub async fn read_frame_recorded<R>(
    reader: &mut R,
    raw: &mut Vec<u8>,
) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let length = read_varint_recorded(reader, raw).await? as usize;
    if length > MAX_PACKET_LEN {
        return Err(ProtocolError::MalformedPacket(format!(
            "declared length {} exceeds {}",
            length, MAX_PACKET_LEN
        )));
    }
    let payload_start = raw.len();
    read_exact_into(reader, length, raw).await?;
    Ok(payload_start)
}

/// Splits a frame payload into its packet id and body.
pub fn split_packet(payload: &[u8]) -> Result<RawPacket, ProtocolError> {
    let mut cursor = payload;
    let id = read_varint(&mut cursor)
        .map_err(|e| ProtocolError::MalformedPacket(format!("bad packet id: {}", e)))?;
    Ok(RawPacket {
        id,
        body: cursor.to_vec(),
    })
}

/// Reads one full framed packet off the stream.
pub async fn read_packet<R>(reader: &mut R) -> Result<RawPacket, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let start = read_frame_recorded(reader, &mut raw).await?;
    split_packet(&raw[start..])
}

/// Runs a read future with a deadline, mapping expiry to [`ProtocolError::TimedOut`].
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ProtocolError>>,
) -> Result<T, ProtocolError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::TimedOut),
    }
}
