//! Scripted in-process clamd for testing the collector without a daemon.
//!
//! `MockDaemon` listens on a loopback TCP port or a unix socket, reads the
//! client's commands up to `END` and answers with a scripted reply. A
//! connection counts as open until the client closes it. Each
//! accepted connection consumes the next entry of the script; the last
//! entry repeats.
//!
//! ```ignore
//! use clamav_exporter_core::collector::mock::{MockDaemon, MockReply, scenarios};
//!
//! let daemon = MockDaemon::tcp(vec![MockReply::bytes(scenarios::healthy_reply())]).await?;
//! let config = ScrapeConfig::new(daemon.address().clone(), Duration::from_secs(1), 0)?;
//! ```

pub mod scenarios;

use std::io;
#[cfg(unix)]
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;

use crate::config::DaemonAddress;

/// How the mock answers one connection.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Writes `chunks` one after another, sleeping `pause` before each, then closes.
    Reply { chunks: Vec<Vec<u8>>, pause: Duration },
    /// Closes the connection right after accepting it.
    HangUp,
    /// Reads the commands, then keeps the connection open without replying.
    Stall,
}

impl MockReply {
    /// Replies with `bytes` in a single write.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        MockReply::Reply {
            chunks: vec![bytes.into()],
            pause: Duration::ZERO,
        }
    }

    /// Replies with `bytes` split into `chunk_size` pieces, `pause` apart.
    pub fn fragmented(bytes: &[u8], chunk_size: usize, pause: Duration) -> Self {
        MockReply::Reply {
            chunks: bytes.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect(),
            pause,
        }
    }

    /// Replies with `bytes` after waiting `pause`.
    pub fn delayed(bytes: impl Into<Vec<u8>>, pause: Duration) -> Self {
        MockReply::Reply {
            chunks: vec![bytes.into()],
            pause,
        }
    }
}

#[derive(Debug)]
struct Shared {
    script: Vec<MockReply>,
    connections: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    received: Mutex<Vec<Vec<u8>>>,
}

impl Shared {
    fn new(script: Vec<MockReply>) -> Self {
        Self {
            script,
            connections: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    fn reply_for(&self, index: usize) -> MockReply {
        self.script
            .get(index)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or(MockReply::HangUp)
    }

    async fn serve<S>(&self, stream: S, index: usize)
    where
        S: AsyncRead + AsyncWrite,
    {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let (mut reader, mut writer) = tokio::io::split(stream);

        match self.reply_for(index) {
            MockReply::HangUp => {
                trace!(index, "mock clamd hanging up");
            }
            MockReply::Stall => {
                self.record(read_commands(&mut reader).await);
                wait_for_close(&mut reader).await;
            }
            MockReply::Reply { chunks, pause } => {
                self.record(read_commands(&mut reader).await);
                let reply = async {
                    for chunk in chunks {
                        if !pause.is_zero() {
                            time::sleep(pause).await;
                        }
                        if writer.write_all(&chunk).await.is_err() || writer.flush().await.is_err() {
                            return;
                        }
                    }
                    // clamd closes its side once the session is over.
                    let _ = writer.shutdown().await;
                };
                tokio::select! {
                    _ = reply => {}
                    _ = wait_for_close(&mut reader) => {
                        trace!(index, "client left before the reply was sent");
                    }
                }
                wait_for_close(&mut reader).await;
            }
        }

        drop(reader);
        drop(writer);
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn record(&self, commands: Vec<u8>) {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(commands);
    }
}

/// Reads until the client closes its side of the connection.
async fn wait_for_close<S: AsyncRead + Unpin>(stream: &mut S) {
    let mut buf = [0u8; 256];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

/// Reads until `zEND\0`, EOF or an error, whichever comes first.
async fn read_commands<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while !received.ends_with(b"zEND\0") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}

/// A fake clamd serving a reply script. Stops listening when dropped.
pub struct MockDaemon {
    address: DaemonAddress,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockDaemon {
    /// Listens on an ephemeral loopback TCP port.
    pub async fn tcp(script: Vec<MockReply>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = DaemonAddress::Tcp {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr()?.port(),
        };
        let shared = Arc::new(Shared::new(script));

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = accept_shared.clone();
                tokio::spawn(async move { shared.serve(stream, index).await });
            }
        });

        Ok(Self {
            address,
            shared,
            accept_task,
        })
    }

    /// Listens on a unix socket at `path`, which must not exist yet.
    #[cfg(unix)]
    pub fn unix(path: impl AsRef<Path>, script: Vec<MockReply>) -> io::Result<Self> {
        let path = path.as_ref();
        let listener = UnixListener::bind(path)?;
        let address = DaemonAddress::Unix(path.to_path_buf());
        let shared = Arc::new(Shared::new(script));

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = accept_shared.clone();
                tokio::spawn(async move { shared.serve(stream, index).await });
            }
        });

        Ok(Self {
            address,
            shared,
            accept_task,
        })
    }

    /// Address to point a collector at.
    pub fn address(&self) -> &DaemonAddress {
        &self.address
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Number of connections that both sides have closed.
    pub fn closed_connections(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` connections are closed. Returns false if
    /// that did not happen within `within`.
    pub async fn wait_closed(&self, count: usize, within: Duration) -> bool {
        let closed = async {
            while self.closed_connections() < count {
                time::sleep(Duration::from_millis(5)).await;
            }
        };
        time::timeout(within, closed).await.is_ok()
    }

    /// Highest number of connections that were open at the same time.
    pub fn max_concurrent_connections(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    /// Command bytes received on each connection that got past accept.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.shared
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
