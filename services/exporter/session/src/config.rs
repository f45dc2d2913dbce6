//! Exporter, collector and session configuration.
//!
//! Durations are written as human readable strings (`"30s"`, `"500ms"`).

use ipdr_storage::QueueMode;
use ipdr_wire::{Capabilities, Template, DEFAULT_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Protocol engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Vendor id announced in CONNECT / CONNECT_RESPONSE
    pub vendor_id: String,
    /// Capabilities offered to collectors
    pub capabilities: Capabilities,
    /// Address announced as initiator id in CONNECT
    pub initiator_address: Ipv4Addr,
    /// Port announced in CONNECT (0 when not listening)
    pub initiator_port: u16,
    /// Inbound keepalive interval; also announced to peers
    #[serde(with = "duration_str")]
    pub keepalive_interval: Duration,
    /// Time allowed for CONNECT_RESPONSE after sending CONNECT
    #[serde(with = "duration_str")]
    pub connect_response_timeout: Duration,
    /// Time allowed for FINAL_TEMPLATE_DATA_ACK after sending TEMPLATE_DATA
    #[serde(with = "duration_str")]
    pub template_ack_timeout: Duration,
    /// Maximum number of unacknowledged records in flight
    pub window_size: usize,
    /// Time unacknowledged records may stay in flight
    #[serde(with = "duration_str")]
    pub window_timeout: Duration,
    /// Time to wait for more candidate collectors before sending templates
    /// to the first one (zero disables waiting)
    #[serde(with = "duration_str")]
    pub best_collector_wait: Duration,
    /// Maximum time between DATA_ACKs requested in SESSION_START
    #[serde(with = "duration_str")]
    pub ack_time_interval: Duration,
    /// Maximum records between DATA_ACKs requested in SESSION_START
    pub ack_sequence_interval: u32,
    /// Invalid-state violations tolerated on one connection before dropping it
    pub max_invalid_state: u32,
    /// Largest accepted inbound message
    pub max_message_size: usize,
    /// Outstanding-record queue backend
    pub queue: QueueMode,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            vendor_id: "ipdr-exporter".to_string(),
            capabilities: Capabilities::STRUCTURE | Capabilities::TEMPLATE_NEGOTIATION,
            initiator_address: Ipv4Addr::UNSPECIFIED,
            initiator_port: 0,
            keepalive_interval: Duration::from_secs(30),
            connect_response_timeout: Duration::from_secs(10),
            template_ack_timeout: Duration::from_secs(30),
            window_size: 256,
            window_timeout: Duration::from_secs(30),
            best_collector_wait: Duration::ZERO,
            ack_time_interval: Duration::from_secs(60),
            ack_sequence_interval: 200,
            max_invalid_state: 3,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue: QueueMode::default(),
        }
    }
}

/// A configured collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Unique name used by session configuration
    pub name: String,
    /// Collector address; for a dummy collector `0.0.0.0` matches any peer
    pub address: IpAddr,
    /// Port to dial; collectors without a port are only accepted inbound
    #[serde(default)]
    pub port: Option<u16>,
    /// Placeholder resolved to a concrete identity on its first CONNECT
    #[serde(default)]
    pub dummy: bool,
}

/// A collector's participation in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCollector {
    /// Collector name
    pub name: String,
    /// Priority, lower is preferred
    pub priority: u32,
}

/// A configured session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Wire session id
    pub id: u8,
    /// Session name
    pub name: String,
    /// Session description
    #[serde(default)]
    pub description: String,
    /// Whether collectors may renegotiate templates
    #[serde(default)]
    pub negotiable: bool,
    /// Participating collectors
    pub collectors: Vec<SessionCollector>,
    /// Initial templates
    #[serde(default)]
    pub templates: Vec<Template>,
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
