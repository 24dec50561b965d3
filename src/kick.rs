use log::trace;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Duration};

use crate::packet_stream::{read_packet, with_timeout};
use crate::varint::{frame_packet, write_string};

pub const LOGIN_DISCONNECT_ID: u32 = 0x00;

pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);
/// Pause after the half-close so the message reaches the client before the socket drops.
pub const FLUSH_LINGER: Duration = Duration::from_millis(50);

pub const STARTING_MESSAGE: &str =
    "§6[Wake] §fServer is starting...\n§7Try again in about 60 seconds!";
pub const RETRY_SOON_MESSAGE: &str = "§6[Wake] §fServer is starting...\n§7Try again in a moment!";

pub fn disconnect_packet(message: &str) -> Vec<u8> {
    let json = json!({"text": message, "color": "yellow", "bold": true}).to_string();
    let mut body = Vec::with_capacity(json.len() + 3);
    write_string(&json, &mut body);
    frame_packet(LOGIN_DISCONNECT_ID, &body)
}

/// Best-effort login-phase disconnect. Consumes and closes the stream.
pub async fn kick_with_message<S>(mut stream: S, message: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // The pending login-start packet is discarded so the client is not
    // mid-send when the disconnect arrives.
    if let Err(e) = with_timeout(DRAIN_TIMEOUT, read_packet(&mut stream)).await {
        trace!("Nothing drained before kick: {}", e);
    }

    let _ = stream.write_all(&disconnect_packet(message)).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
    sleep(FLUSH_LINGER).await;
}
