//! A framed protocol connection.
//!
//! Each TCP connection (notification server or switchboard) is wrapped in a
//! [`Connection`]: one reader task drives the inbound side, outbound frames
//! go through a single-writer lock, and reply correlation happens here.
//!
//! Inbound commands take one of two paths:
//!
//! 1. If a pending transaction matches the command's trid (and the command
//!    is a server error or in the caller's accepted-verb set), the command
//!    completes that transaction's oneshot. This path never drops.
//! 2. Everything else is rebroadcast to subscribers (dispatchers, session
//!    filters, login sequences). Subscribers keep bounded queues; a lagging
//!    subscriber loses old commands and is told so, but never stalls the
//!    reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use msgr_protocol::{Command, CommandReader, CommandWriter, ProtocolError, Verb};

use crate::error::{ClientError, ClientResult};
use crate::transport::BoxedTransport;

/// A registered wait for a correlated reply.
struct PendingReply {
    accept: Vec<Verb>,
    tx: oneshot::Sender<Command>,
}

/// Shared state between a connection handle and its reader task.
struct Shared {
    pending: StdMutex<HashMap<u32, PendingReply>>,
    broadcast: broadcast::Sender<Command>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Routes one inbound command: pending transaction first, broadcast
    /// second.
    fn route(&self, command: Command) {
        if let Some(trid) = command.trid() {
            let mut pending = self.pending.lock().expect("pending lock");
            let matches = pending
                .get(&trid)
                .map(|p| command.verb() == Verb::Error || p.accept.contains(&command.verb()))
                .unwrap_or(false);
            if matches {
                let entry = pending.remove(&trid).expect("pending entry");
                drop(pending);
                // The receiver may have timed out and gone away; that
                // transaction is simply abandoned.
                let _ = entry.tx.send(command);
                return;
            }
        }
        // No subscriber is fine (e.g. a switchboard between dispatchers).
        let _ = self.broadcast.send(command);
    }

    /// Marks the connection closed and cancels every pending transaction.
    fn shut(&self) {
        let _ = self.closed_tx.send(true);
        self.pending.lock().expect("pending lock").clear();
    }
}

/// One protocol connection: writer lock, trid counter, reply correlation,
/// inbound broadcast.
pub(crate) struct Connection {
    writer: Mutex<CommandWriter<WriteHalf<BoxedTransport>>>,
    shared: Arc<Shared>,
    next_trid: AtomicU32,
    closed_rx: watch::Receiver<bool>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
}

impl Connection {
    /// Wraps a transport and spawns its reader task.
    pub fn open(transport: BoxedTransport, broadcast_capacity: usize) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(transport);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (broadcast_tx, _) = broadcast::channel(broadcast_capacity);

        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
            broadcast: broadcast_tx,
            closed_tx,
        });

        let reader_shared = shared.clone();
        let reader_task = tokio::spawn(read_loop(CommandReader::new(read_half), reader_shared));

        Arc::new(Self {
            writer: Mutex::new(CommandWriter::new(write_half)),
            shared,
            next_trid: AtomicU32::new(1),
            closed_rx,
            reader_task: StdMutex::new(Some(reader_task)),
            closing: AtomicBool::new(false),
        })
    }

    /// Allocates the next transaction id.
    pub fn next_trid(&self) -> u32 {
        self.next_trid.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribes to the inbound command broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<Command> {
        self.shared.broadcast.subscribe()
    }

    /// Returns a watch that flips to `true` when the connection dies.
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Returns true once the connection is closed or lost.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Writes one command without waiting for any reply.
    pub async fn send(&self, command: &Command) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Cancelled);
        }
        let mut writer = self.writer.lock().await;
        writer.send(command).await.map_err(ClientError::from)
    }

    /// Sends a command and awaits its correlated reply.
    ///
    /// The pending entry is registered before the write so a fast server
    /// cannot reply into the void. A server error with the same trid always
    /// matches and comes back as [`ClientError::Server`]; a missing reply is
    /// [`ClientError::Timeout`]; connection loss while waiting is
    /// [`ClientError::Cancelled`].
    pub async fn request(
        &self,
        command: Command,
        accept: &[Verb],
        timeout: Duration,
    ) -> ClientResult<Command> {
        let trid = command.trid().ok_or_else(|| {
            ClientError::InvalidArgument("request command carries no transaction id".into())
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().expect("pending lock");
            pending.insert(
                trid,
                PendingReply {
                    accept: accept.to_vec(),
                    tx,
                },
            );
        }

        if let Err(err) = self.send(&command).await {
            self.shared.pending.lock().expect("pending lock").remove(&trid);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.shared.pending.lock().expect("pending lock").remove(&trid);
                Err(ClientError::Timeout)
            }
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Ok(Ok(reply)) => match reply {
                Command::ServerError { code, .. } => Err(ClientError::server(code)),
                reply => Ok(reply),
            },
        }
    }

    /// Shuts the connection down. Idempotent; pending transactions are
    /// cancelled, the reader task is stopped, the transport is closed once.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing connection");
        self.shared.shut();

        if let Some(task) = self.reader_task.lock().expect("reader task lock").take() {
            task.abort();
        }

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "transport shutdown failed");
        }
    }
}

/// The per-connection reader loop: decode, route, repeat.
async fn read_loop(mut reader: CommandReader<ReadHalf<BoxedTransport>>, shared: Arc<Shared>) {
    loop {
        match reader.next().await {
            Ok(Some(Command::Unknown { verb, line })) => {
                // Unknown identifiers are logged and skipped; the stream
                // resumes on the next line.
                warn!(verb = %verb, line = %line, "skipping unknown command");
            }
            Ok(Some(command)) => shared.route(command),
            Ok(None) => {
                debug!("connection closed by peer");
                break;
            }
            Err(ProtocolError::MalformedCommand { line, reason }) => {
                warn!(line = %line, reason = %reason, "skipping malformed command");
            }
            Err(err) => {
                warn!(error = %err, "read failed, dropping connection");
                break;
            }
        }
    }
    shared.shut();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Opens a connection over an in-memory duplex stream, returning the
    /// far end for the test to script.
    fn pipe() -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let conn = Connection::open(Box::new(near), 64);
        (conn, far)
    }

    #[tokio::test]
    async fn request_matches_reply_by_trid() {
        let (conn, mut far) = pipe();

        let trid = conn.next_trid();
        let request = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.request(
                    Command::QryOk { trid },
                    &[Verb::Qry],
                    Duration::from_secs(5),
                )
                .await
            }
        });

        // Read the outbound frame, then reply with noise and the real reply.
        let mut buf = vec![0u8; 64];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"QRY 1\r\n");

        far.write_all(b"QNG 50\r\nNLN NLN r@x.y R 0\r\nQRY 1\r\n")
            .await
            .unwrap();

        let reply = request.await.unwrap().unwrap();
        assert_eq!(reply, Command::QryOk { trid: 1 });
        conn.close().await;
    }

    #[tokio::test]
    async fn server_error_fails_matching_request() {
        let (conn, mut far) = pipe();

        let trid = conn.next_trid();
        let request = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.request(
                    Command::UsrTwnToken {
                        trid,
                        token: "t=x".into(),
                    },
                    &[Verb::Usr],
                    Duration::from_secs(5),
                )
                .await
            }
        });

        let mut buf = vec![0u8; 64];
        let _ = far.read(&mut buf).await.unwrap();
        far.write_all(b"911 1\r\n").await.unwrap();

        let err = request.await.unwrap().unwrap_err();
        assert_eq!(err.server_code(), Some(911));
        conn.close().await;
    }

    #[tokio::test]
    async fn request_times_out() {
        let (conn, mut far) = pipe();

        let trid = conn.next_trid();
        let result = conn
            .request(
                Command::QryOk { trid },
                &[Verb::Qry],
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(ClientError::Timeout)));

        // Keep the far end alive until after the timeout.
        let mut buf = vec![0u8; 64];
        let _ = far.read(&mut buf).await.unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn close_cancels_pending_requests() {
        let (conn, mut far) = pipe();

        let trid = conn.next_trid();
        let request = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.request(
                    Command::QryOk { trid },
                    &[Verb::Qry],
                    Duration::from_secs(30),
                )
                .await
            }
        });

        let mut buf = vec![0u8; 64];
        let _ = far.read(&mut buf).await.unwrap();
        conn.close().await;

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }

    #[tokio::test]
    async fn unsolicited_commands_reach_subscribers_in_order() {
        let (conn, mut far) = pipe();
        let mut rx = conn.subscribe();

        far.write_all(b"NLN NLN a@b.c A 0\r\nFLN a@b.c\r\nQNG 7\r\n")
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), Command::Nln { .. }));
        assert!(matches!(rx.recv().await.unwrap(), Command::Fln { .. }));
        assert_eq!(rx.recv().await.unwrap(), Command::Qng { until_next: 7 });
        conn.close().await;
    }

    #[tokio::test]
    async fn trids_are_strictly_increasing() {
        let (conn, _far) = pipe();
        let a = conn.next_trid();
        let b = conn.next_trid();
        let c = conn.next_trid();
        assert!(a < b && b < c);
        assert_eq!(a, 1);
        conn.close().await;
    }

    #[tokio::test]
    async fn concurrent_payload_frames_are_contiguous() {
        let (conn, mut far) = pipe();

        // Two tasks race to write payload-bearing frames.
        let send = |body: &'static [u8]| {
            let conn = conn.clone();
            tokio::spawn(async move {
                let trid = conn.next_trid();
                conn.send(&Command::MsgSend {
                    trid,
                    class: msgr_protocol::MsgClass::Unacknowledged,
                    payload: body.to_vec(),
                })
                .await
                .unwrap();
            })
        };
        let a = send(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let b = send(b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        a.await.unwrap();
        b.await.unwrap();

        // Each frame is a 12-byte header line plus a 32-byte body.
        let mut wire = Vec::new();
        let mut buf = vec![0u8; 256];
        while wire.len() < 2 * (12 + 32) {
            let n = far.read(&mut buf).await.unwrap();
            wire.extend_from_slice(&buf[..n]);
        }

        // Each frame must be contiguous: header, CRLF, then its whole body.
        let text = String::from_utf8(wire).unwrap();
        let mut rest = text.as_str();
        for _ in 0..2 {
            let (line, tail) = rest.split_once("\r\n").unwrap();
            assert!(line.starts_with("MSG "));
            let len: usize = line.rsplit(' ').next().unwrap().parse().unwrap();
            let body = &tail[..len];
            assert!(body.chars().all(|c| c == 'a') || body.chars().all(|c| c == 'b'));
            rest = &tail[len..];
        }
        assert!(rest.is_empty());
        conn.close().await;
    }

    #[tokio::test]
    async fn peer_eof_flips_closed_watch() {
        let (conn, far) = pipe();
        let mut closed = conn.closed_watch();
        assert!(!*closed.borrow());

        drop(far);
        closed.changed().await.unwrap();
        assert!(*closed.borrow());
        assert!(conn.is_closed());
    }
}
