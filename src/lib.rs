//! Lazy-wake reverse proxy for a game server.
//!
//! Sits on the public game port, answers server-list pings and turns away
//! logins while the backend is offline or starting, asks the management API
//! to start it on demand, and forwards traffic untouched once it is up. An
//! idle monitor stops the backend after a stretch with nobody online.

pub mod config_loader;
pub mod error;
pub mod forwarding;
pub mod handshake;
pub mod kick;
pub mod lifecycle;
pub mod logger;
pub mod management;
pub mod monitor;
pub mod packet_stream;
pub mod proxy;
pub mod status;
pub mod varint;
