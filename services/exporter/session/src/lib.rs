//! IPDR exporter protocol engine: handshake, keepalive, collector failover,
//! template negotiation and acknowledged record delivery.
//!
//! The [`Exporter`] is a synchronous state machine. It owns every collector,
//! connection and session, receives inbound messages, connection changes and
//! timer deadlines together with the current instant, and writes through a
//! [`Transport`]. The [`runtime`] module drives it over TCP from a single
//! tokio task and hands the application an [`ExporterHandle`].
//!
//! ## Features
//!
//! - **Handshake**: CONNECT / CONNECT_RESPONSE with capability negotiation
//!   and dummy collector resolution
//! - **Keepalive**: inbound expiry and outbound KEEP_ALIVE per connection
//! - **Failover**: priority based selection of one active collector per
//!   session, with SESSION_START / SESSION_STOP on every switch
//! - **Templates**: TEMPLATE_DATA announcement, MODIFY_TEMPLATE and
//!   START_NEGOTIATION
//! - **Delivery**: windowed DATA with DATA_ACK pruning and retransmission
//!   after a switch
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use ipdr_session::{
//!     runtime, CollectorConfig, Exporter, ExporterConfig, SessionCollector, SessionConfig,
//!     TcpTransport,
//! };
//! use ipdr_wire::{Key, Template};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut exporter = Exporter::new(ExporterConfig::default(), TcpTransport::new());
//! exporter.add_collector(CollectorConfig {
//!     name: "primary".to_string(),
//!     address: "10.0.0.1".parse()?,
//!     port: Some(4737),
//!     dummy: false,
//! });
//! exporter.add_session(SessionConfig {
//!     id: 1,
//!     name: "usage".to_string(),
//!     description: String::new(),
//!     negotiable: true,
//!     collectors: vec![SessionCollector {
//!         name: "primary".to_string(),
//!         priority: 1,
//!     }],
//!     templates: vec![Template::new(1, "DOCSIS", "SAMIS-Type")
//!         .with_key(Key::new(0x21, 1, "ServiceOctetsPassed"))],
//! })?;
//!
//! let (handle, _task) = runtime::spawn(exporter, None);
//! if let Some(template) = handle.template_handle(1, 1).await? {
//!     let dsn = handle.send_data(1, template, Bytes::from_static(b"record")).await?;
//!     println!("queued record {}", dsn);
//! }
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector_session;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod exporter;
pub mod handshake;
pub mod keepalive;
pub mod model;
pub mod runtime;
pub mod templates;
pub mod timer;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::{CollectorConfig, ExporterConfig, SessionCollector, SessionConfig};
pub use error::{ExporterError, TransportError};
pub use events::{
    ApplicationHooks, ChannelEventSink, DefaultHooks, EventSink, ExporterEvent, TracingEventSink,
};
pub use exporter::Exporter;
pub use model::{
    Collector, CollectorId, CollectorSession, ConnId, Connection, ConnectionState,
    ConnectionStats, CsKey, CsState, Direction, Session, SessionStats, TemplateHandle,
    TransmissionContext,
};
pub use runtime::{ExporterCommand, ExporterHandle};
pub use timer::{TimerKind, TimerService};
pub use transport::{Transport, TcpConnection, TcpTransport};
