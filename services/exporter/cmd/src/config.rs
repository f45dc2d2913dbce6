//! Configuration handling for the exporter binary.
//!
//! The YAML file describes the protocol engine settings, the collectors and
//! the sessions. A few settings can be overridden from the environment.

use anyhow::{Context, Result};
use ipdr_session::{CollectorConfig, ExporterConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// Exporter service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address to accept collector connections on
    pub listen: Option<SocketAddr>,
    /// Protocol engine settings
    pub exporter: ExporterConfig,
    /// Known collectors
    pub collectors: Vec<CollectorConfig>,
    /// Streamed sessions
    pub sessions: Vec<SessionConfig>,
}

impl AppConfig {
    /// Load configuration from file, then apply environment overrides.
    ///
    /// A missing file yields the defaults; a file that does not parse is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: AppConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Exporter configuration: listen={:?}, collectors={}, sessions={}, keepalive={:?}, window={}",
            config.listen,
            config.collectors.len(),
            config.sessions.len(),
            config.exporter.keepalive_interval,
            config.exporter.window_size
        );
        Ok(config)
    }

    /// Apply `IPDR_LISTEN`, `IPDR_KEEPALIVE` and `IPDR_WINDOW_SIZE`
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("IPDR_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring IPDR_LISTEN={:?}: {}", listen, e),
            }
        }

        if let Some(keepalive) = lookup("IPDR_KEEPALIVE") {
            match humantime::parse_duration(&keepalive) {
                Ok(interval) => {
                    self.exporter.keepalive_interval = interval;
                    info!("Keepalive interval overridden by environment: {:?}", interval);
                }
                Err(e) => warn!("Ignoring IPDR_KEEPALIVE={:?}: {}", keepalive, e),
            }
        }

        if let Some(window) = lookup("IPDR_WINDOW_SIZE") {
            match window.parse::<usize>() {
                Ok(size) => {
                    self.exporter.window_size = size;
                    info!("Window size overridden by environment: {}", size);
                }
                Err(e) => warn!("Ignoring IPDR_WINDOW_SIZE={:?}: {}", window, e),
            }
        }
    }
}
