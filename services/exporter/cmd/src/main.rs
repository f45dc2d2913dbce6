//! IPDR exporter binary.
//!
//! Loads collectors and sessions from a YAML file, dials and accepts
//! collectors, and optionally streams lines read from stdin as records of
//! one session.

use bytes::Bytes;
use clap::Parser;
use ipdr_session::{runtime, transport::listen_tcp, Exporter, ExporterHandle, TcpTransport};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::AppConfig;
use logging::IpdrLogFormatter;

/// IPDR/SP exporter
#[derive(Parser, Debug)]
#[command(name = "ipdr-exporter", version, about = "IPDR streaming protocol exporter")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "exporter.yaml")]
    config: PathBuf,

    /// Listen address for collector connections, e.g. 0.0.0.0:4737
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Stream stdin lines as records of this session
    #[arg(long)]
    stdin_session: Option<u8>,

    /// Template id used for stdin records
    #[arg(long, default_value = "1", requires = "stdin_session")]
    stdin_template: u16,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("ipdr_exporter={}", args.log_level).parse()?)
        .add_directive(format!("ipdr_session={}", args.log_level).parse()?)
        .add_directive(format!("ipdr_wire={}", args.log_level).parse()?)
        .add_directive(format!("ipdr_storage={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(IpdrLogFormatter::new("ipdr"))
        .init();

    info!("Starting IPDR exporter v{}", env!("CARGO_PKG_VERSION"));

    let mut app_config = AppConfig::load_from_file(&args.config)?;
    if let Some(listen) = args.listen {
        app_config.listen = Some(listen);
    }
    if let Some(listen) = app_config.listen {
        if app_config.exporter.initiator_port == 0 {
            app_config.exporter.initiator_port = listen.port();
        }
        if let IpAddr::V4(ip) = listen.ip() {
            if app_config.exporter.initiator_address.is_unspecified() {
                app_config.exporter.initiator_address = ip;
            }
        }
    }

    let mut exporter = Exporter::new(app_config.exporter, TcpTransport::new());
    for collector in app_config.collectors {
        exporter.add_collector(collector);
    }
    for session in app_config.sessions {
        exporter.add_session(session)?;
    }

    let listener = match app_config.listen {
        Some(addr) => {
            let listener = listen_tcp(addr).await?;
            info!("Accepting collectors on {}", listener.local_addr()?);
            Some(listener)
        }
        None => None,
    };

    let (handle, task) = runtime::spawn(exporter, listener);

    if let Some(session) = args.stdin_session {
        let feeder = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = feed_stdin(feeder, session, args.stdin_template).await {
                component_error!("feeder", "stdin feeder stopped: {:#}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await?;
    task.await?;

    info!("IPDR exporter stopped");
    Ok(())
}

/// Send every stdin line as one record of `session`
async fn feed_stdin(handle: ExporterHandle, session: u8, template_id: u16) -> anyhow::Result<()> {
    let template = handle
        .template_handle(session, template_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("session {} has no template {}", session, template_id))?;
    component_info!("feeder", "streaming stdin into session {} template {}", session, template_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sent = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let dsn = handle
            .send_data(session, template, Bytes::from(line.into_bytes()))
            .await?;
        component_debug!("feeder", "queued record {}", dsn);
        sent += 1;
    }

    component_info!("feeder", "stdin closed after {} records", sent);
    Ok(())
}
