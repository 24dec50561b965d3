use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration, Instant};

use crate::config_loader::ProxyConfig;
use crate::error::ProxyError;
use crate::forwarding::spawn_relay;
use crate::handshake::{inspect_handshake, HandshakeRecord};
use crate::kick::{kick_with_message, RETRY_SOON_MESSAGE, STARTING_MESSAGE};
use crate::lifecycle::{LifecycleController, ServerState};
use crate::status::{describe, respond_status, StatusReply, Subtitle};

/// How a connection was finally handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Status answered locally.
    Status,
    /// Login kicked while the backend is starting or unreachable.
    LoginWait,
    /// Login kicked after asking the backend to start.
    LoginWake,
    /// Handed to the relay.
    Proxied,
}

/// Everything a connection handler needs, shared by all connections.
pub struct ProxyContext {
    pub config: Arc<ProxyConfig>,
    pub lifecycle: Arc<LifecycleController>,
}

/// Accepts players on the public port and routes each connection.
pub struct TcpProxy {
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
}

impl TcpProxy {
    pub async fn bind(ctx: Arc<ProxyContext>) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(ctx.config.bind_addr()).await?;
        Ok(Self::from_listener(listener, ctx))
    }

    pub fn from_listener(listener: TcpListener, ctx: Arc<ProxyContext>) -> Self {
        Self { listener, ctx }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts forever. Per-connection failures never reach this loop.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    // Try disabling Nagle for lower latency
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to disable Nagle for {}: {}", peer, e);
                    }
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        let route = handle_client(stream, &ctx).await;
                        debug!("{} handled as {:?}", peer, route);
                    });
                }
                Err(e) => error!("Accept error: {}", e),
            }
        }
    }
}

fn status_reply(
    config: &ProxyConfig,
    state: Option<&ServerState>,
    subtitle: Subtitle,
) -> StatusReply {
    StatusReply {
        version_name: config.mc_version_name.clone(),
        protocol: config.mc_protocol,
        max_players: config.max_players,
        online_players: state.map_or(0, |s| s.players),
        description: describe(&config.motd_title, subtitle),
    }
}

/// Retries the backend until it accepts or `deadline` elapses.
pub async fn connect_with_retry(
    addr: SocketAddr,
    deadline: Duration,
    interval: Duration,
) -> Result<TcpStream, ProxyError> {
    let give_up = Instant::now() + deadline;
    let mut last_error = None;
    loop {
        let remaining = give_up.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => break,
        }
        sleep(interval.min(give_up.saturating_duration_since(Instant::now()))).await;
    }
    Err(ProxyError::BackendUnreachable(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::TimedOut, "Unable to connect")
    })))
}

/// Routes one accepted connection to its final handler.
pub async fn handle_client(mut client: TcpStream, ctx: &ProxyContext) -> Route {
    let config = &ctx.config;
    let handshake = inspect_handshake(&mut client, config.handshake_timeout).await;
    let state = ctx.lifecycle.poll().await;
    let read_timeout = config.handshake_timeout;

    if state.is_some_and(|s| s.waiting_start) {
        if handshake.is_login() {
            kick_with_message(client, STARTING_MESSAGE).await;
            return Route::LoginWait;
        }
        let reply = status_reply(config, state.as_ref(), Subtitle::for_state(state.as_ref()));
        respond_status(&mut client, &reply, read_timeout).await;
        return Route::Status;
    }

    if !state.is_some_and(|s| s.running) {
        if handshake.is_login() {
            info!("[Wake] Server is sleeping. Waking it now!");
            ctx.lifecycle.request_start().await;
            kick_with_message(client, STARTING_MESSAGE).await;
            return Route::LoginWake;
        }
        let reply = status_reply(config, state.as_ref(), Subtitle::for_state(state.as_ref()));
        respond_status(&mut client, &reply, read_timeout).await;
        return Route::Status;
    }

    let backend = match connect_with_retry(
        config.backend_addr(),
        config.connect_retry,
        config.connect_retry_interval,
    )
    .await
    {
        Ok(backend) => backend,
        Err(e) => {
            debug!("{}", e);
            if handshake.is_login() {
                kick_with_message(client, RETRY_SOON_MESSAGE).await;
                return Route::LoginWait;
            }
            let reply = status_reply(config, state.as_ref(), Subtitle::Starting);
            respond_status(&mut client, &reply, read_timeout).await;
            return Route::Status;
        }
    };

    match forward_to_backend(client, backend, handshake).await {
        Ok(()) => {
            if config.log_connections {
                info!("[Proxy] Player connected.");
            }
        }
        Err(e) => debug!("Failed to hand connection to backend: {}", e),
    }
    Route::Proxied
}

/// Replays the captured handshake bytes, then hands both sockets to the relay.
async fn forward_to_backend(
    client: TcpStream,
    mut backend: TcpStream,
    handshake: HandshakeRecord,
) -> io::Result<()> {
    if let Err(e) = backend.set_nodelay(true) {
        debug!("Failed to disable Nagle on backend: {}", e);
    }
    if !handshake.raw_bytes.is_empty() {
        backend.write_all(&handshake.raw_bytes).await?;
        backend.flush().await?;
    }
    spawn_relay(client, backend);
    Ok(())
}
