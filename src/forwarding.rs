use std::sync::Arc;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Shared "this pair is done" flag. Whichever direction finishes first
/// trips it and the other direction stops at its next await.
#[derive(Clone)]
pub struct PairClose {
    tx: Arc<watch::Sender<bool>>,
}

impl PairClose {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Idempotent.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for PairClose {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies `from` into `to` until EOF, an I/O error, or the pair closing.
/// Always trips the pair flag and shuts `to` down on the way out.
pub async fn forward_loop<R, W>(mut from: R, mut to: W, pair: PairClose, tag: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let step = async {
            let n = from.read(&mut buf).await?;
            if n > 0 {
                to.write_all(&buf[..n]).await?;
            }
            Ok::<usize, std::io::Error>(n)
        };
        tokio::select! {
            _ = pair.closed() => break,
            res = step => match res {
                Ok(0) => break, // EOF
                Ok(n) => total += n as u64,
                Err(e) => {
                    debug!("{} - relay error: {}", tag, e);
                    break;
                }
            },
        }
    }
    debug!("{} - closed after {} bytes", tag, total);
    pair.close();
    let _ = to.shutdown().await;
}

pub struct RelayHandles {
    pub client_to_backend: JoinHandle<()>,
    pub backend_to_client: JoinHandle<()>,
}

/// Starts the two copy tasks between a client and its backend connection.
/// Both sockets are closed once either direction ends.
pub fn spawn_relay(client: TcpStream, backend: TcpStream) -> RelayHandles {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();
    let pair = PairClose::new();

    let client_to_backend = tokio::spawn(forward_loop(
        client_read,
        backend_write,
        pair.clone(),
        "client->backend",
    ));
    let backend_to_client = tokio::spawn(forward_loop(
        backend_read,
        client_write,
        pair,
        "backend->client",
    ));
    RelayHandles {
        client_to_backend,
        backend_to_client,
    }
}
