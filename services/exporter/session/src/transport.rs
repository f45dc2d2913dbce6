//! Transport seam of the exporter and its TCP implementation.
//!
//! The protocol engine only sees the synchronous [`Transport`] trait. The TCP
//! implementation backs every connection with a reader task that decodes
//! frames for the runtime and a writer task that drains an unbounded channel,
//! so `send` never blocks.

use bytes::{Bytes, BytesMut};
use ipdr_wire::FrameDecoder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use crate::error::TransportError;
use crate::model::{CollectorId, ConnId, Direction};
use crate::runtime::ExporterCommand;

/// Byte transport used by the exporter
pub trait Transport {
    /// Queue `bytes` for delivery on `conn`
    fn send(&mut self, conn: ConnId, bytes: Bytes) -> Result<(), TransportError>;

    /// Release `conn`
    fn disconnect(&mut self, conn: ConnId);

    /// Discard writes queued on `conn` that have not reached the socket yet
    fn reset(&mut self, conn: ConnId);
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

struct WriteRequest {
    epoch: u64,
    bytes: Bytes,
}

/// Write side of one TCP connection, owned by the transport
pub struct TcpConnection {
    peer: SocketAddr,
    writer: mpsc::UnboundedSender<WriteRequest>,
    epoch: Arc<AtomicU64>,
    // Dropping the sender stops the reader task
    _close: oneshot::Sender<()>,
}

impl TcpConnection {
    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

/// TCP transport holding the write side of every live connection
#[derive(Debug, Default)]
pub struct TcpTransport {
    connections: HashMap<ConnId, TcpConnection>,
}

impl TcpTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a connection created by [`spawn_connection`]
    pub fn register(&mut self, conn: ConnId, link: TcpConnection) {
        self.connections.insert(conn, link);
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, conn: ConnId, bytes: Bytes) -> Result<(), TransportError> {
        let link = self
            .connections
            .get(&conn)
            .ok_or(TransportError::Closed(conn))?;
        let epoch = link.epoch.load(Ordering::Acquire);
        link.writer
            .send(WriteRequest { epoch, bytes })
            .map_err(|_| TransportError::Closed(conn))
    }

    fn disconnect(&mut self, conn: ConnId) {
        if self.connections.remove(&conn).is_some() {
            debug!(%conn, "transport released");
        }
    }

    fn reset(&mut self, conn: ConnId) {
        if let Some(link) = self.connections.get(&conn) {
            let epoch = link.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(%conn, epoch, "transport reset");
        }
    }
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Split `stream` into reader and writer tasks and announce it to the runtime.
///
/// Decoded frames, decode errors and the final close are forwarded on
/// `commands`. `done` fires once the connection is gone for good.
pub fn spawn_connection(
    stream: TcpStream,
    direction: Direction,
    collector: Option<CollectorId>,
    max_message_size: usize,
    commands: mpsc::UnboundedSender<ExporterCommand>,
    done: Option<oneshot::Sender<()>>,
) -> std::io::Result<ConnId> {
    let peer = stream.peer_addr()?;
    let _ = stream.set_nodelay(true);
    let conn = ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
    let (mut read_half, mut write_half) = stream.into_split();

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriteRequest>();
    let (close_tx, mut close_rx) = oneshot::channel::<()>();
    let epoch = Arc::new(AtomicU64::new(0));

    let link = TcpConnection {
        peer,
        writer: writer_tx,
        epoch: epoch.clone(),
        _close: close_tx,
    };
    if commands
        .send(ExporterCommand::Opened {
            conn,
            peer,
            direction,
            collector,
            link,
        })
        .is_err()
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "exporter runtime stopped",
        ));
    }
    debug!(%conn, %peer, ?direction, "connection spawned");

    tokio::spawn(async move {
        while let Some(request) = writer_rx.recv().await {
            if request.epoch != epoch.load(Ordering::Acquire) {
                trace!(%conn, "discarding write from before reset");
                continue;
            }
            if let Err(e) = write_half.write_all(&request.bytes).await {
                error!(%conn, "write failed: {}", e);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    tokio::spawn(async move {
        let mut decoder = FrameDecoder::with_max_message_size(max_message_size);
        let mut buf = BytesMut::with_capacity(8192);
        let mut released = false;
        'read: loop {
            // Drain every complete frame before reading more
            loop {
                match decoder.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if commands.send(ExporterCommand::Frame { conn, frame }).is_err() {
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = commands.send(ExporterCommand::DecodeError { conn, error });
                        break 'read;
                    }
                }
            }

            let reason = tokio::select! {
                _ = &mut close_rx => {
                    released = true;
                    break 'read;
                }
                result = read_half.read_buf(&mut buf) => match result {
                    Ok(0) => "peer closed connection".to_string(),
                    Ok(_) => continue 'read,
                    Err(e) => format!("read failed: {}", e),
                },
            };
            let _ = commands.send(ExporterCommand::Closed { conn, reason });
            break;
        }

        if let Some(done) = done {
            if !released {
                // Wait until the exporter releases the write side
                let _ = close_rx.await;
            }
            let _ = done.send(());
        }
    });

    Ok(conn)
}
