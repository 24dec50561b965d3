use log::{debug, trace};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Duration;

use crate::error::ProtocolError;
use crate::lifecycle::ServerState;
use crate::packet_stream::{read_packet, with_timeout};
use crate::varint::{frame_packet, write_string};

pub const STATUS_REQUEST_ID: u32 = 0x00;
pub const STATUS_RESPONSE_ID: u32 = 0x00;
pub const PING_ID: u32 = 0x01;

/// Label shown before the configured version name in the server list.
const VERSION_LABEL: &str = "Online";

/// Chat/MOTD text component in the JSON shape the client renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextComponent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<TextComponent>,
}

impl TextComponent {
    pub fn plain(text: impl Into<String>) -> Self {
        TextComponent {
            text: text.into(),
            color: None,
            bold: None,
            extra: Vec::new(),
        }
    }

    pub fn bold(text: impl Into<String>, color: &'static str) -> Self {
        TextComponent {
            color: Some(color),
            bold: Some(true),
            ..TextComponent::plain(text)
        }
    }
}

/// Second MOTD line, picked from what the lifecycle poll returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtitle {
    Unavailable,
    Starting,
    Offline,
    Online,
}

impl Subtitle {
    pub fn for_state(state: Option<&ServerState>) -> Self {
        match state {
            None => Subtitle::Unavailable,
            Some(s) if s.waiting_start || (s.running && !s.joinable) => Subtitle::Starting,
            Some(s) if !s.running => Subtitle::Offline,
            Some(_) => Subtitle::Online,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Subtitle::Unavailable => "Proxy online. Unable to fetch server status.",
            Subtitle::Starting => "Server is starting...",
            Subtitle::Offline => "Server offline. Join to wake it.",
            Subtitle::Online => "Server online.",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Subtitle::Unavailable => "gray",
            Subtitle::Starting => "yellow",
            Subtitle::Offline => "red",
            Subtitle::Online => "green",
        }
    }
}

/// Builds the two-line description: gold title, colored subtitle.
pub fn describe(title: &str, subtitle: Subtitle) -> TextComponent {
    let mut description = TextComponent::bold(title, "gold");
    description.extra = vec![
        TextComponent::plain("\n"),
        TextComponent::bold(subtitle.text(), subtitle.color()),
    ];
    description
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    name: String,
    protocol: u32,
}

#[derive(Debug, Serialize)]
struct PlayersInfo {
    max: u32,
    online: u32,
}

#[derive(Debug, Serialize)]
struct StatusDocument {
    version: VersionInfo,
    players: PlayersInfo,
    description: TextComponent,
}

/// Everything the responder needs besides the socket.
#[derive(Debug, Clone)]
pub struct StatusReply {
    pub version_name: String,
    pub protocol: u32,
    pub max_players: u32,
    pub online_players: u32,
    pub description: TextComponent,
}

impl StatusReply {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&StatusDocument {
            version: VersionInfo {
                name: format!("{} ({})", VERSION_LABEL, self.version_name),
                protocol: self.protocol,
            },
            players: PlayersInfo {
                max: self.max_players,
                online: self.online_players,
            },
            description: self.description.clone(),
        })
    }
}

/// Answers one status request and, if the client follows up, one ping.
///
/// The stream is shut down before returning whatever happened; read
/// failures and timeouts just end the exchange early.
pub async fn respond_status<S>(stream: &mut S, reply: &StatusReply, read_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = status_exchange(stream, reply, read_timeout).await {
        debug!("Status exchange ended: {}", e);
    }
    let _ = stream.shutdown().await;
}

async fn status_exchange<S>(
    stream: &mut S,
    reply: &StatusReply,
    read_timeout: Duration,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = with_timeout(read_timeout, read_packet(stream)).await?;
    if request.id != STATUS_REQUEST_ID {
        trace!("Expected status request, got 0x{:02X}", request.id);
        return Ok(());
    }

    let json = reply
        .to_json()
        .map_err(|e| ProtocolError::MalformedPacket(format!("status JSON: {}", e)))?;
    let mut body = Vec::with_capacity(json.len() + 3);
    write_string(&json, &mut body);
    stream
        .write_all(&frame_packet(STATUS_RESPONSE_ID, &body))
        .await?;
    stream.flush().await?;

    let ping = with_timeout(read_timeout, read_packet(stream)).await?;
    if ping.id == PING_ID {
        stream.write_all(&frame_packet(PING_ID, &ping.body)).await?;
        stream.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_stream::read_packet;
    use crate::varint::read_varint;
    use serde_json::Value;
    use tokio::io::AsyncWriteExt;

    fn state(running: bool, waiting_start: bool, joinable: bool) -> ServerState {
        ServerState {
            running,
            waiting_start,
            players: 0,
            joinable,
        }
    }

    fn reply(subtitle: Subtitle) -> StatusReply {
        StatusReply {
            version_name: "1.21.1".into(),
            protocol: 767,
            max_players: 5,
            online_players: 2,
            description: describe("Crafty Proxy", subtitle),
        }
    }

    #[test]
    fn subtitle_follows_state_table() {
        assert_eq!(Subtitle::for_state(None), Subtitle::Unavailable);
        assert_eq!(
            Subtitle::for_state(Some(&state(false, true, false))),
            Subtitle::Starting
        );
        assert_eq!(
            Subtitle::for_state(Some(&state(true, false, false))),
            Subtitle::Starting
        );
        assert_eq!(
            Subtitle::for_state(Some(&state(false, false, false))),
            Subtitle::Offline
        );
        assert_eq!(
            Subtitle::for_state(Some(&state(true, false, true))),
            Subtitle::Online
        );
        assert_eq!(Subtitle::Online.color(), "green");
        assert_eq!(Subtitle::Unavailable.color(), "gray");
    }

    #[test]
    fn status_document_shape() {
        let json: Value = serde_json::from_str(&reply(Subtitle::Offline).to_json().unwrap()).unwrap();
        assert_eq!(json["version"]["name"], "Online (1.21.1)");
        assert_eq!(json["version"]["protocol"], 767);
        assert_eq!(json["players"]["max"], 5);
        assert_eq!(json["players"]["online"], 2);
        assert_eq!(json["description"]["text"], "Crafty Proxy");
        assert_eq!(json["description"]["color"], "gold");
        assert_eq!(json["description"]["extra"][0]["text"], "\n");
        assert_eq!(
            json["description"]["extra"][1]["text"],
            "Server offline. Join to wake it."
        );
        assert_eq!(json["description"]["extra"][1]["color"], "red");
        assert_eq!(json["description"]["extra"][1]["bold"], true);
    }

    #[tokio::test]
    async fn answers_status_then_echoes_ping() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let reply = reply(Subtitle::Online);
        let responder = tokio::spawn(async move {
            respond_status(&mut server, &reply, Duration::from_secs(1)).await;
        });

        client.write_all(&frame_packet(0x00, b"")).await.unwrap();
        let response = read_packet(&mut client).await.unwrap();
        assert_eq!(response.id, STATUS_RESPONSE_ID);
        let mut body = response.body.as_slice();
        let len = read_varint(&mut body).unwrap() as usize;
        assert_eq!(len, body.len());
        let json: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["description"]["extra"][1]["text"], "Server online.");

        let payload = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04];
        client.write_all(&frame_packet(PING_ID, &payload)).await.unwrap();
        let pong = read_packet(&mut client).await.unwrap();
        assert_eq!(pong.id, PING_ID);
        assert_eq!(pong.body, payload);

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_first_packet_gets_no_response() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let reply = reply(Subtitle::Online);
        let responder = tokio::spawn(async move {
            respond_status(&mut server, &reply, Duration::from_secs(1)).await;
        });
        client.write_all(&frame_packet(0x05, b"x")).await.unwrap();
        responder.await.unwrap();

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut rest)
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn missing_ping_still_closes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let reply = reply(Subtitle::Starting);
        let responder = tokio::spawn(async move {
            respond_status(&mut server, &reply, Duration::from_millis(100)).await;
        });
        client.write_all(&frame_packet(0x00, b"")).await.unwrap();
        let response = read_packet(&mut client).await.unwrap();
        assert_eq!(response.id, STATUS_RESPONSE_ID);
        responder.await.unwrap();
    }
}
