//! Link supervision timers: KEEP_ALIVE in both directions and the
//! CONNECT_RESPONSE deadline.

use ipdr_wire::{ErrorCode, Message};
use std::time::Instant;
use tracing::{debug, warn};

use crate::exporter::Exporter;
use crate::model::{ConnId, ConnectionState};
use crate::transport::Transport;

impl<T: Transport> Exporter<T> {
    /// Nothing heard from the peer within the keepalive interval
    pub(crate) fn keepalive_in_expired(&mut self, conn: ConnId, now: Instant) {
        if !self.connections.contains_key(&conn) {
            return;
        }
        warn!(%conn, interval = ?self.config.keepalive_interval, "keepalive expired");
        self.send_error(
            conn,
            0,
            ErrorCode::KeepAliveExpired,
            "no message received within the keepalive interval".to_string(),
            now,
        );
        self.schedule_drop(conn, "keepalive expired".to_string());
    }

    /// Nothing sent to the peer for half its keepalive interval
    pub(crate) fn keepalive_out_expired(&mut self, conn: ConnId, now: Instant) {
        let connected = self
            .connections
            .get(&conn)
            .is_some_and(|c| c.state == ConnectionState::Connected);
        if connected {
            debug!(%conn, "sending KEEP_ALIVE");
            self.send_message(conn, 0, &Message::KeepAlive, now);
        }
    }

    pub(crate) fn connect_response_expired(&mut self, conn: ConnId, _now: Instant) {
        let waiting = self
            .connections
            .get(&conn)
            .is_some_and(|c| c.state == ConnectionState::WaitResponse);
        if waiting {
            warn!(%conn, "no CONNECT_RESPONSE");
            self.schedule_drop(conn, "connect response timeout".to_string());
        }
    }
}
