use std::io;

use thiserror::Error;

/// Failures while reading or decoding the game wire protocol.
///
/// Every variant ends the exchange on the connection it happened on; frames
/// are never retried on the same socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("peer closed the connection")]
    ConnectionClosed,
    #[error("input ended in the middle of a value")]
    Truncated,
    #[error("VarInt too long")]
    MalformedVarint,
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("timed out waiting for client data")]
    TimedOut,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The management API could not be reached or answered with an error.
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("management API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("management API answered with HTTP {0}")]
    Status(u16),
    #[error("management API request timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing required config field '{0}'")]
    MissingField(&'static str),
    #[error("failed to build management API client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend unreachable: {0}")]
    BackendUnreachable(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}
