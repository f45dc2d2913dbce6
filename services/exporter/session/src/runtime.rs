//! Async driver for the exporter.
//!
//! One task owns the [`Exporter`] and serializes everything that touches it:
//! commands from connection tasks and from the application, accepted
//! connections and timer deadlines all meet in a single `select!` loop.
//! Outbound collectors are dialled by one task each, which reconnects with
//! exponential backoff whenever the collector has no connection.

use bytes::Bytes;
use ipdr_wire::{Frame, Template, WireError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExporterError;
use crate::exporter::Exporter;
use crate::model::{CollectorId, ConnId, Direction, TemplateHandle};
use crate::transport::{connect_tcp, spawn_connection, TcpConnection, TcpTransport};

/// First reconnect delay
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Longest reconnect delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type Reply<T> = oneshot::Sender<Result<T, ExporterError>>;

/// Work items processed by the exporter task
#[derive(Debug)]
pub enum ExporterCommand {
    /// A connection task started
    Opened {
        /// Connection
        conn: ConnId,
        /// Remote address
        peer: SocketAddr,
        /// Opening side
        direction: Direction,
        /// Collector a dialled connection belongs to
        collector: Option<CollectorId>,
        /// Write side handed to the transport
        link: TcpConnection,
    },
    /// A complete frame arrived
    Frame {
        /// Connection
        conn: ConnId,
        /// Frame
        frame: Frame,
    },
    /// The byte stream could not be decoded; the reader has stopped
    DecodeError {
        /// Connection
        conn: ConnId,
        /// Decode failure
        error: WireError,
    },
    /// The peer closed the connection or reading failed
    Closed {
        /// Connection
        conn: ConnId,
        /// Why
        reason: String,
    },
    /// A dialler asks whether its collector still needs a connection
    NeedsDial {
        /// Collector
        collector: CollectorId,
        /// Answer
        reply: oneshot::Sender<bool>,
    },
    /// Application record submission
    SendData {
        /// Session id
        session: u8,
        /// Template handle
        handle: TemplateHandle,
        /// Record payload
        payload: Bytes,
        /// Assigned sequence number
        reply: Reply<u64>,
    },
    /// Template handle lookup
    TemplateHandle {
        /// Session id
        session: u8,
        /// Template id
        template_id: u16,
        /// Handle, if the template exists
        reply: oneshot::Sender<Option<TemplateHandle>>,
    },
    /// Resume a session
    StartSession {
        /// Session id
        session: u8,
        /// Completion
        reply: Reply<()>,
    },
    /// Pause a session
    StopSession {
        /// Session id
        session: u8,
        /// Completion
        reply: Reply<()>,
    },
    /// Replace the templates of a session
    SetTemplates {
        /// Session id
        session: u8,
        /// New templates
        templates: Vec<Template>,
        /// Whether collectors may modify them
        negotiable: bool,
        /// New configuration id
        reply: Reply<u16>,
    },
    /// Stop every session and close every connection
    Shutdown {
        /// Completion
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable application handle to a running exporter
#[derive(Debug, Clone)]
pub struct ExporterHandle {
    commands: mpsc::UnboundedSender<ExporterCommand>,
}

impl ExporterHandle {
    async fn request<T>(
        &self,
        command: ExporterCommand,
        reply: oneshot::Receiver<Result<T, ExporterError>>,
    ) -> Result<T, ExporterError> {
        self.commands
            .send(command)
            .map_err(|_| ExporterError::Shutdown)?;
        reply.await.map_err(|_| ExporterError::Shutdown)?
    }

    /// Submit one record; returns its sequence number
    pub async fn send_data(
        &self,
        session: u8,
        handle: TemplateHandle,
        payload: Bytes,
    ) -> Result<u64, ExporterError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ExporterCommand::SendData {
                session,
                handle,
                payload,
                reply,
            },
            rx,
        )
        .await
    }

    /// Handle for `template_id` in the current configuration of `session`
    pub async fn template_handle(
        &self,
        session: u8,
        template_id: u16,
    ) -> Result<Option<TemplateHandle>, ExporterError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ExporterCommand::TemplateHandle {
                session,
                template_id,
                reply,
            })
            .map_err(|_| ExporterError::Shutdown)?;
        rx.await.map_err(|_| ExporterError::Shutdown)
    }

    /// Resume a stopped session
    pub async fn start_session(&self, session: u8) -> Result<(), ExporterError> {
        let (reply, rx) = oneshot::channel();
        self.request(ExporterCommand::StartSession { session, reply }, rx)
            .await
    }

    /// Stop streaming a session
    pub async fn stop_session(&self, session: u8) -> Result<(), ExporterError> {
        let (reply, rx) = oneshot::channel();
        self.request(ExporterCommand::StopSession { session, reply }, rx)
            .await
    }

    /// Replace the templates of a session; returns the new configuration id
    pub async fn set_templates(
        &self,
        session: u8,
        templates: Vec<Template>,
        negotiable: bool,
    ) -> Result<u16, ExporterError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ExporterCommand::SetTemplates {
                session,
                templates,
                negotiable,
                reply,
            },
            rx,
        )
        .await
    }

    /// Stop the exporter and wait until every connection is released
    pub async fn shutdown(&self) -> Result<(), ExporterError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ExporterCommand::Shutdown { reply })
            .map_err(|_| ExporterError::Shutdown)?;
        rx.await.map_err(|_| ExporterError::Shutdown)
    }
}

/// Start the exporter task, one dialler per outbound collector and, if
/// given, the accept loop on `listener`
pub fn spawn(
    exporter: Exporter<TcpTransport>,
    listener: Option<TcpListener>,
) -> (ExporterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let max_message_size = exporter.config().max_message_size;

    let dialers = exporter
        .dial_targets()
        .into_iter()
        .map(|(collector, addr)| {
            tokio::spawn(dial(collector, addr, max_message_size, tx.clone()))
        })
        .collect();

    let handle = ExporterHandle {
        commands: tx.clone(),
    };
    let task = tokio::spawn(run(exporter, listener, rx, tx, dialers));
    (handle, task)
}

async fn run(
    mut exporter: Exporter<TcpTransport>,
    listener: Option<TcpListener>,
    mut commands: mpsc::UnboundedReceiver<ExporterCommand>,
    command_tx: mpsc::UnboundedSender<ExporterCommand>,
    dialers: Vec<JoinHandle<()>>,
) {
    let max_message_size = exporter.config().max_message_size;
    info!(
        collectors = exporter.dial_targets().len(),
        listening = listener.is_some(),
        "exporter running"
    );

    loop {
        let deadline = exporter.next_deadline();
        tokio::select! {
            Some(command) = commands.recv() => {
                if !handle_command(&mut exporter, command) {
                    break;
                }
            }

            accepted = async {
                match &listener {
                    Some(listener) => listener.accept().await,
                    None => std::future::pending().await,
                }
            } => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        if let Err(e) = spawn_connection(
                            stream,
                            Direction::Inbound,
                            None,
                            max_message_size,
                            command_tx.clone(),
                            None,
                        ) {
                            warn!(%peer, "failed to start connection: {}", e);
                        }
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }

            _ = async {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                    }
                    None => std::future::pending().await,
                }
            } => {
                exporter.poll_timers(Instant::now());
            }
        }
    }

    for dialer in dialers {
        dialer.abort();
    }
    info!("exporter stopped");
}

/// Apply one command; returns false once the exporter has shut down
fn handle_command(exporter: &mut Exporter<TcpTransport>, command: ExporterCommand) -> bool {
    let now = Instant::now();
    match command {
        ExporterCommand::Opened {
            conn,
            peer,
            direction,
            collector,
            link,
        } => {
            exporter.transport_mut().register(conn, link);
            exporter.connection_opened(conn, peer, direction, collector, now);
        }
        ExporterCommand::Frame { conn, frame } => exporter.handle_frame(conn, frame, now),
        ExporterCommand::DecodeError { conn, error } => exporter.frame_error(conn, error, now),
        ExporterCommand::Closed { conn, reason } => exporter.connection_closed(conn, &reason, now),
        ExporterCommand::NeedsDial { collector, reply } => {
            let _ = reply.send(exporter.needs_dial(collector));
        }
        ExporterCommand::SendData {
            session,
            handle,
            payload,
            reply,
        } => {
            let _ = reply.send(exporter.send_data(session, handle, payload, now));
        }
        ExporterCommand::TemplateHandle {
            session,
            template_id,
            reply,
        } => {
            let _ = reply.send(exporter.template_handle(session, template_id));
        }
        ExporterCommand::StartSession { session, reply } => {
            let _ = reply.send(exporter.start_session(session, now));
        }
        ExporterCommand::StopSession { session, reply } => {
            let _ = reply.send(exporter.stop_session(session, now));
        }
        ExporterCommand::SetTemplates {
            session,
            templates,
            negotiable,
            reply,
        } => {
            let _ = reply.send(exporter.set_templates(session, templates, negotiable, now));
        }
        ExporterCommand::Shutdown { reply } => {
            exporter.shutdown(now);
            let _ = reply.send(());
            return false;
        }
    }
    true
}

/// Keep `collector` connected, reconnecting with exponential backoff
async fn dial(
    collector: CollectorId,
    addr: SocketAddr,
    max_message_size: usize,
    commands: mpsc::UnboundedSender<ExporterCommand>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let (reply, rx) = oneshot::channel();
        if commands
            .send(ExporterCommand::NeedsDial { collector, reply })
            .is_err()
        {
            return;
        }
        match rx.await {
            Ok(true) => {}
            Ok(false) => {
                tokio::time::sleep(INITIAL_BACKOFF).await;
                continue;
            }
            Err(_) => return,
        }

        info!(%collector, %addr, "dialling collector");
        match connect_tcp(addr).await {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                let (done_tx, done_rx) = oneshot::channel();
                match spawn_connection(
                    stream,
                    Direction::Outbound,
                    Some(collector),
                    max_message_size,
                    commands.clone(),
                    Some(done_tx),
                ) {
                    Ok(conn) => {
                        let _ = done_rx.await;
                        debug!(%collector, %conn, "dialled connection ended");
                    }
                    Err(e) => warn!(%collector, %addr, "failed to start connection: {}", e),
                }

                // Brief pause before reconnecting
                tokio::time::sleep(INITIAL_BACKOFF).await;
            }
            Err(e) => {
                warn!(
                    %collector,
                    "Failed to connect to {}: {}; retrying in {:?}",
                    addr, e, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
