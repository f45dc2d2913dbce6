//! CONNECT / CONNECT_RESPONSE exchange and collector identification.
//!
//! A dialled connection sends CONNECT and waits for CONNECT_RESPONSE. An
//! accepted connection waits for CONNECT, identifies the collector from the
//! peer address or the announced initiator id and answers with
//! CONNECT_RESPONSE. Either way the link ends up CONNECTED with the pairwise
//! capabilities and both keepalive timers armed.

use ipdr_wire::{Capabilities, Connect, ConnectResponse, ErrorCode, Message};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::events::ExporterEvent;
use crate::exporter::Exporter;
use crate::model::{
    CollectorId, ConnId, Connection, ConnectionState, ConnectionStats, Direction,
};
use crate::timer::TimerKind;
use crate::transport::Transport;

impl<T: Transport> Exporter<T> {
    /// Register a new transport connection.
    ///
    /// `collector` names the collector an outbound connection was dialled
    /// for; inbound connections identify their collector from CONNECT.
    pub fn connection_opened(
        &mut self,
        conn: ConnId,
        peer: SocketAddr,
        direction: Direction,
        collector: Option<CollectorId>,
        now: Instant,
    ) {
        if self.shutting_down {
            debug!(%conn, "connection refused during shutdown");
            self.transport.disconnect(conn);
            return;
        }
        if let Some(id) = collector {
            let busy = self.collectors.get(id.0).map_or(true, |c| c.conn.is_some());
            if busy {
                debug!(%conn, collector = %id, "collector already connected, dropping dialled link");
                self.transport.disconnect(conn);
                return;
            }
        }

        self.connections.insert(
            conn,
            Connection {
                id: conn,
                peer,
                direction,
                state: ConnectionState::Disconnected,
                collector: None,
                capabilities: Capabilities::empty(),
                keepalive_out: self.config.keepalive_interval,
                invalid_state_count: 0,
                stats: ConnectionStats::default(),
            },
        );
        info!(%conn, %peer, ?direction, "connection up");
        self.emit(ExporterEvent::ConnectionUp { conn, peer });

        match (direction, collector) {
            (Direction::Inbound, _) => {
                self.timers.arm(
                    TimerKind::KeepAliveIn(conn),
                    now + self.config.keepalive_interval,
                );
            }
            (Direction::Outbound, Some(id)) => self.send_connect(conn, id, now),
            (Direction::Outbound, None) => {
                warn!(%conn, "dialled connection without a collector");
                self.schedule_drop(conn, "no collector for dialled link".to_string());
            }
        }
        self.finish(now);
    }

    /// The transport lost `conn`
    pub fn connection_closed(&mut self, conn: ConnId, reason: &str, now: Instant) {
        self.close_connection(conn, reason, now);
        self.finish(now);
    }

    fn send_connect(&mut self, conn: ConnId, collector: CollectorId, now: Instant) {
        self.collectors[collector.0].conn = Some(conn);
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.collector = Some(collector);
            connection.state = ConnectionState::WaitResponse;
        }

        let connect = Connect {
            initiator_id: u32::from(self.config.initiator_address),
            initiator_port: self.config.initiator_port,
            capabilities: self.config.capabilities,
            keepalive_interval: self.config.keepalive_interval.as_secs() as u32,
            vendor_id: self.config.vendor_id.clone(),
        };
        if self.send_message(conn, 0, &Message::Connect(connect), now) {
            debug!(%conn, %collector, "CONNECT sent");
            self.timers.arm(
                TimerKind::ConnectResponse(conn),
                now + self.config.connect_response_timeout,
            );
        }
    }

    pub(crate) fn handle_connect(&mut self, conn: ConnId, connect: Connect, now: Instant) {
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        if connection.state != ConnectionState::Disconnected {
            self.protocol_violation(
                conn,
                0,
                ErrorCode::InvalidConnectionState,
                "CONNECT on an established connection".to_string(),
                now,
            );
            return;
        }

        let initiator = Ipv4Addr::from(connect.initiator_id);
        let peer_ip = connection.peer.ip();
        let Some(collector) = self.identify_collector(peer_ip, initiator) else {
            warn!(%conn, %peer_ip, %initiator, "CONNECT from unknown collector");
            self.send_error(
                conn,
                0,
                ErrorCode::CollectorNotConfigured,
                format!("{} is not a configured collector", initiator),
                now,
            );
            self.schedule_drop(conn, "collector not configured".to_string());
            return;
        };

        if let Some(existing) = self.collectors[collector.0].conn {
            warn!(%conn, %collector, %existing, "collector already connected");
            self.send_error(
                conn,
                0,
                ErrorCode::InvalidConnectionState,
                "collector already has a connection".to_string(),
                now,
            );
            self.schedule_drop(conn, "duplicate collector connection".to_string());
            return;
        }

        let entry = &mut self.collectors[collector.0];
        if entry.config.dummy && entry.resolved.is_none() {
            info!(collector = %entry.config.name, %initiator, "dummy collector resolved");
            entry.resolved = Some(initiator);
        }
        entry.conn = Some(conn);
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.collector = Some(collector);
        }

        self.establish(
            conn,
            collector,
            connect.capabilities,
            connect.keepalive_interval,
            &connect.vendor_id,
            now,
        );
        let response = ConnectResponse {
            capabilities: self.config.capabilities,
            keepalive_interval: self.config.keepalive_interval.as_secs() as u32,
            vendor_id: self.config.vendor_id.clone(),
        };
        self.send_message(conn, 0, &Message::ConnectResponse(response), now);
    }

    pub(crate) fn handle_connect_response(
        &mut self,
        conn: ConnId,
        response: ConnectResponse,
        now: Instant,
    ) {
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        let collector = match (connection.state, connection.collector) {
            (ConnectionState::WaitResponse, Some(collector)) => collector,
            _ => {
                self.protocol_violation(
                    conn,
                    0,
                    ErrorCode::InvalidConnectionState,
                    "unexpected CONNECT_RESPONSE".to_string(),
                    now,
                );
                return;
            }
        };
        self.timers.cancel(TimerKind::ConnectResponse(conn));
        self.establish(
            conn,
            collector,
            response.capabilities,
            response.keepalive_interval,
            &response.vendor_id,
            now,
        );
    }

    fn establish(
        &mut self,
        conn: ConnId,
        collector: CollectorId,
        remote: Capabilities,
        remote_keepalive: u32,
        vendor_id: &str,
        now: Instant,
    ) {
        let keepalive_out = if remote_keepalive == 0 {
            self.config.keepalive_interval
        } else {
            Duration::from_secs(u64::from(remote_keepalive)) / 2
        };
        let capabilities = self.config.capabilities & remote;
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        connection.capabilities = capabilities;
        connection.keepalive_out = keepalive_out;
        connection.state = ConnectionState::Connected;

        self.timers.arm(
            TimerKind::KeepAliveIn(conn),
            now + self.config.keepalive_interval,
        );
        self.timers
            .arm(TimerKind::KeepAliveOut(conn), now + keepalive_out);

        info!(
            %conn,
            collector = %self.collectors[collector.0].config.name,
            vendor = vendor_id,
            ?capabilities,
            "collector connected"
        );
        self.emit(ExporterEvent::CollectorConnected {
            collector,
            capabilities,
        });
    }

    /// Match a CONNECT to a configured collector. Concrete collectors win
    /// over dummies.
    fn identify_collector(&self, peer: IpAddr, initiator: Ipv4Addr) -> Option<CollectorId> {
        let initiator_ip = IpAddr::V4(initiator);
        let matches = |address: IpAddr| address == peer || address == initiator_ip;

        self.collectors
            .iter()
            .position(|c| !c.config.dummy && matches(c.config.address))
            .or_else(|| {
                self.collectors.iter().position(|c| {
                    c.config.dummy
                        && match c.resolved {
                            Some(resolved) => resolved == initiator,
                            None => c.config.address.is_unspecified() || matches(c.config.address),
                        }
                })
            })
            .map(CollectorId)
    }
}
