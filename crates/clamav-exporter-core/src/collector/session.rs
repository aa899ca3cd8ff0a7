//! One clamd connection attempt.
//!
//! clamd requires clients to read all replies it has sent before sending
//! more commands, otherwise both sides can block in `send()`. The session
//! therefore reads on a separate task for the whole lifetime of the
//! connection while the caller pipelines the commands without waiting for
//! individual replies. Replies are matched to commands by request ID, not
//! by arrival order.
//!
//! ```text
//!   caller (writer)                    reader task
//!   ───────────────                    ───────────
//!   zIDSESSION\0 ─┐                ┌─▶ read ─▶ demultiplex complete frames
//!   zPING\0       │                │   read ─▶ ...
//!   zVERSION\0    ├──▶ socket ─────┤   EOF  ─▶ return ResponseSlots
//!   zSTATS\0      │                │
//!   zEND\0       ─┘                │
//!   await reader ◀─────────────────┘
//! ```

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tracing::{debug, trace};

use crate::collector::protocol::{Command, ResponseSlots, demultiplex};
use crate::config::DaemonAddress;
use crate::error::ScrapeError;

const READ_BUFFER_SIZE: usize = 4096;

/// Dials `address` and runs one scrape session on the new connection.
///
/// The dial and every subsequent read and write are bounded by `timeout`.
/// The connection is closed when this returns, whatever the outcome.
pub async fn open(address: &DaemonAddress, timeout: Duration) -> Result<ResponseSlots, ScrapeError> {
    open_with_permit(address, timeout, ()).await
}

/// Like [`open`], but `permit` is dropped only after the connection is.
///
/// The permit lives in the reader task, so it also outlives a session whose
/// caller was cancelled until the aborted reader has released the socket.
pub async fn open_with_permit<P>(
    address: &DaemonAddress,
    timeout: Duration,
    permit: P,
) -> Result<ResponseSlots, ScrapeError>
where
    P: Send + 'static,
{
    match address {
        DaemonAddress::Tcp { host, port } => {
            let stream = time::timeout(timeout, TcpStream::connect((host.as_str(), *port)))
                .await
                .map_err(|_| ScrapeError::timed_out("connect to clamd", timeout))?
                .map_err(|e| ScrapeError::io("connect to clamd", e))?;
            debug!(%address, "connected");
            run_with_permit(stream, timeout, permit).await
        }
        #[cfg(unix)]
        DaemonAddress::Unix(path) => {
            let stream = time::timeout(timeout, UnixStream::connect(path))
                .await
                .map_err(|_| ScrapeError::timed_out("connect to clamd", timeout))?
                .map_err(|e| ScrapeError::io("connect to clamd", e))?;
            debug!(%address, "connected");
            run_with_permit(stream, timeout, permit).await
        }
        #[cfg(not(unix))]
        DaemonAddress::Unix(_) => Err(ScrapeError::io(
            "connect to clamd",
            io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            ),
        )),
    }
}

/// Runs the scrape command sequence over an established stream.
///
/// Succeeds once clamd closes the connection after `END` and every byte
/// received formed a valid frame. Dropping the returned future aborts the
/// reader, which closes the stream.
pub async fn run<S>(stream: S, timeout: Duration) -> Result<ResponseSlots, ScrapeError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    run_with_permit(stream, timeout, ()).await
}

async fn run_with_permit<S, P>(
    stream: S,
    timeout: Duration,
    permit: P,
) -> Result<ResponseSlots, ScrapeError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    P: Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = ReaderTask(tokio::spawn(async move {
        let result = read_replies(read_half, timeout).await;
        (result, permit)
    }));
    let writer = CommandWriter::new(write_half, timeout);

    for command in Command::SCRAPE_SEQUENCE {
        if let Err(e) = writer.send(command).await {
            drop(writer);
            reader.cancel().await;
            return Err(e);
        }
    }
    trace!("commands sent, waiting for replies");

    let joined = reader.join().await;
    drop(writer);
    let (result, permit) =
        joined.map_err(|e| ScrapeError::io("join reply reader", io::Error::other(e)))?;
    // Both halves are gone here, so the connection is closed.
    drop(permit);
    result
}

/// Reply reader of a session. Aborted when dropped so that a cancelled
/// session does not keep its connection open.
struct ReaderTask<T>(JoinHandle<T>);

impl<T> ReaderTask<T> {
    async fn join(&mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }

    /// Aborts the reader and waits until it has dropped its half of the stream.
    async fn cancel(&mut self) {
        self.0.abort();
        let _ = (&mut self.0).await;
    }
}

impl<T> Drop for ReaderTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Write side of a session. Writes never overlap.
struct CommandWriter<W> {
    inner: Mutex<W>,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> CommandWriter<W> {
    fn new(inner: W, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(inner),
            timeout,
        }
    }

    async fn send(&self, command: Command) -> Result<(), ScrapeError> {
        let frame = command.encode();
        let mut writer = self.inner.lock().await;

        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        time::timeout(self.timeout, write)
            .await
            .map_err(|_| ScrapeError::timed_out("send command", self.timeout))?
            .map_err(|e| {
                debug!(command = command.name(), error = %e, "send failed");
                ScrapeError::io("send command", e)
            })?;

        trace!(command = command.name(), "sent");
        Ok(())
    }
}

/// Reads until clamd closes the connection, demultiplexing complete frames
/// as they arrive.
async fn read_replies<R>(mut reader: R, timeout: Duration) -> Result<ResponseSlots, ScrapeError>
where
    R: AsyncRead + Unpin,
{
    let mut slots = ResponseSlots::default();
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = time::timeout(timeout, reader.read(&mut buf))
            .await
            .map_err(|_| ScrapeError::timed_out("read response", timeout))?
            .map_err(|e| ScrapeError::io("read response", e))?;
        // tokio only reports a zero-length read once the peer has closed.
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);
        trace!(bytes = n, pending = pending.len(), "received");

        if let Some(end) = pending.iter().rposition(|&b| b == 0) {
            demultiplex(&pending[..=end], slots.as_mut_slice())?;
            pending.drain(..=end);
        }
    }

    // Leftover bytes are a frame without its terminator.
    demultiplex(&pending, slots.as_mut_slice())?;
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::scenarios;
    use crate::error::FrameError;
    use tokio::io::DuplexStream;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Reads the client's commands up to and including `zEND\0`.
    async fn read_commands(server: &mut DuplexStream) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while !received.ends_with(b"zEND\0") {
            let n = server.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    }

    #[tokio::test]
    async fn test_run_collects_all_slots() {
        let (client, mut server) = tokio::io::duplex(1024);
        let daemon = tokio::spawn(async move {
            let commands = read_commands(&mut server).await;
            server.write_all(&scenarios::healthy_reply()).await.unwrap();
            commands
        });

        let slots = run(client, TIMEOUT).await.unwrap();
        assert_eq!(slots.ping(), b"PONG");
        assert_eq!(slots.version(), scenarios::VERSION.as_bytes());
        assert_eq!(slots.stats(), scenarios::STATS.as_bytes());

        let commands = daemon.await.unwrap();
        assert_eq!(commands, b"zIDSESSION\0zPING\0zVERSION\0zSTATS\0zEND\0".to_vec());
    }

    #[tokio::test]
    async fn test_run_reassembles_fragmented_frames() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            read_commands(&mut server).await;
            for chunk in scenarios::healthy_reply().chunks(7) {
                server.write_all(chunk).await.unwrap();
                server.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let slots = run(client, TIMEOUT).await.unwrap();
        assert_eq!(slots.ping(), b"PONG");
        assert_eq!(slots.stats(), scenarios::STATS.as_bytes());
    }

    #[tokio::test]
    async fn test_run_accepts_out_of_order_replies() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            read_commands(&mut server).await;
            server
                .write_all(b"3: stats\x002: version\x001: PONG\x00")
                .await
                .unwrap();
        });

        let slots = run(client, TIMEOUT).await.unwrap();
        assert_eq!(slots, ResponseSlots::new("PONG", "version", "stats"));
    }

    #[tokio::test]
    async fn test_run_unterminated_frame() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            read_commands(&mut server).await;
            server.write_all(b"1: PONG\x002: ClamAV").await.unwrap();
        });

        let err = run(client, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::MalformedFrame(FrameError::MissingTerminator)
        ));
    }

    #[tokio::test]
    async fn test_run_bad_response_id() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            read_commands(&mut server).await;
            server.write_all(b"7: PONG\x00").await.unwrap();
        });

        let err = run(client, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::MalformedFrame(FrameError::IdOutOfRange(7))
        ));
    }

    #[tokio::test]
    async fn test_run_times_out_when_daemon_stalls() {
        let (client, mut server) = tokio::io::duplex(1024);
        let daemon = tokio::spawn(async move {
            read_commands(&mut server).await;
            // Keep the connection open without replying.
            time::sleep(Duration::from_secs(5)).await;
            drop(server);
        });

        let err = run(client, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_timeout());
        daemon.abort();
    }

    #[tokio::test]
    async fn test_run_early_close_yields_empty_slots() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);

        // Either the first write fails or the reader sees EOF; both end the attempt.
        match run(client, TIMEOUT).await {
            Ok(slots) => assert_eq!(slots, ResponseSlots::default()),
            Err(e) => assert!(matches!(e, ScrapeError::Connection { .. })),
        }
    }

    /// Asserts that the client end of `server` goes away within a second.
    async fn assert_peer_closed(server: &mut DuplexStream) {
        let mut rest = Vec::new();
        let closed = time::timeout(Duration::from_secs(1), server.read_to_end(&mut rest)).await;
        assert!(closed.is_ok(), "connection still open");
    }

    #[tokio::test]
    async fn test_cancelled_run_closes_connection() {
        let (client, mut server) = tokio::io::duplex(1024);

        let attempt = time::timeout(Duration::from_millis(50), run(client, Duration::from_secs(5))).await;
        assert!(attempt.is_err());

        assert_eq!(
            read_commands(&mut server).await,
            b"zIDSESSION\0zPING\0zVERSION\0zSTATS\0zEND\0".to_vec()
        );
        assert_peer_closed(&mut server).await;
    }

    #[tokio::test]
    async fn test_malformed_reply_closes_connection() {
        let (client, mut server) = tokio::io::duplex(1024);
        let session = tokio::spawn(run(client, Duration::from_secs(5)));

        read_commands(&mut server).await;
        server.write_all(b"1: PONG\x00junk\x00").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, ScrapeError::MalformedFrame(FrameError::MissingId)));
        assert_peer_closed(&mut server).await;
    }

    #[tokio::test]
    async fn test_failed_write_closes_connection() {
        // Room for only part of the first command, and nobody reads it.
        let (client, mut server) = tokio::io::duplex(4);

        let err = run(client, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, ScrapeError::Connection { action: "send command", .. }));
        assert_peer_closed(&mut server).await;
    }

    #[tokio::test]
    async fn test_permit_released_after_connection_closed() {
        let slot = std::sync::Arc::new(Mutex::new(()));
        let (client, mut server) = tokio::io::duplex(1024);

        let permit = slot.clone().lock_owned().await;
        let attempt = time::timeout(
            Duration::from_millis(50),
            run_with_permit(client, Duration::from_secs(5), permit),
        )
        .await;
        assert!(attempt.is_err());

        let next = time::timeout(Duration::from_secs(1), slot.lock()).await;
        assert!(next.is_ok(), "permit not released");
        assert_peer_closed(&mut server).await;
    }

    #[tokio::test]
    async fn test_open_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let address = DaemonAddress::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        };
        let err = open(&address, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::Connection {
                action: "connect to clamd",
                ..
            }
        ));
    }
}
