//! Backbone node daemon.
//!
//! - Loads a [`NodeConfig`] from disk, fatal on a malformed file (§7).
//! - Brings up whichever transports the config enables (RF, Internet).
//! - Spawns the coordinator and logs its event stream.
//! - Shuts down on SIGINT, disconnecting transports in reverse order.

use std::fs::File;
use std::path::PathBuf;

use backbone_common::config::{DigipeaterRole, InternetMode, NodeConfig};
use backbone_common::Callsign;
use backbone_node::internet::{InternetTransport, Mode as InternetTransportMode, TlsMaterial};
use backbone_node::rf::RfTransport;
use backbone_node::{spawn_coordinator, CoordinatorEvent, InternetRoutingMode, Transport};

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Packet-radio backbone node daemon.
#[derive(Parser, Debug)]
#[command(name = "backbone-noded", about = "Packet-radio backbone node daemon")]
struct Cli {
    /// Path to the node's JSON config file.
    #[arg(long, default_value = "backbone-node.json")]
    config: PathBuf,

    /// TLS certificate chain (PEM), required when the Internet transport is
    /// enabled in `mesh` or `server` mode with TLS on.
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM), paired with `--tls-cert`.
    #[arg(long)]
    tls_key: Option<PathBuf>,
}

fn load_config(path: &std::path::Path) -> anyhow::Result<NodeConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    NodeConfig::from_json(&raw).map_err(|e| anyhow::anyhow!("{e}"))
}

fn load_tls_material(cli: &Cli) -> anyhow::Result<Option<TlsMaterial>> {
    match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsMaterial {
            cert_pem: std::fs::read(cert_path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", cert_path.display()))?,
            key_pem: std::fs::read(key_path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", key_path.display()))?,
        })),
        (None, None) => Ok(None),
        _ => Err(anyhow::anyhow!("--tls-cert and --tls-key must be given together")),
    }
}

fn build_transports(
    local: &Callsign,
    config: &NodeConfig,
    tls: Option<TlsMaterial>,
) -> anyhow::Result<(Vec<Box<dyn Transport>>, Option<InternetRoutingMode>, Option<Callsign>)> {
    let mut transports: Vec<Box<dyn Transport>> = Vec::new();
    let mut next_id: u8 = 0;
    let mut internet_mode = None;
    let mut internet_hub = None;

    if config.transports.rf.enabled {
        let device_path = config
            .transports
            .rf
            .device
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("transports.rf.enabled is true but transports.rf.device is unset"))?;
        let device = File::options()
            .read(true)
            .write(true)
            .open(device_path)
            .map_err(|e| anyhow::anyhow!("opening RF device {device_path}: {e}"))?;
        let role = match config.transports.rf.digipeater_role {
            DigipeaterRole::FillIn => backbone_proto::ax25::DigipeaterRole::FillIn,
            DigipeaterRole::Wide => backbone_proto::ax25::DigipeaterRole::Wide,
            DigipeaterRole::None => backbone_proto::ax25::DigipeaterRole::None,
        };
        transports.push(Box::new(RfTransport::new(
            next_id,
            local.clone(),
            role,
            config.transports.rf.max_wide_n,
            Box::new(device),
        )));
        next_id += 1;
    }

    if config.transports.internet.enabled {
        let net = &config.transports.internet;
        let tls_material = if net.tls { tls } else { None };
        if net.tls && tls_material.is_none() && !matches!(net.mode, InternetMode::Client) {
            tracing::warn!("transports.internet.tls is true but no --tls-cert/--tls-key were given; listening in plaintext");
        }

        let mode = match net.mode {
            InternetMode::Mesh => InternetTransportMode::Mesh { peers: net.peers.clone() },
            InternetMode::Server => InternetTransportMode::Server,
            InternetMode::Client => {
                let mut hubs = net.hub_servers.servers.clone();
                if hubs.is_empty() {
                    if let Some(single) = &net.hub_server {
                        hubs.push(single.clone());
                    }
                }
                if hubs.is_empty() {
                    return Err(anyhow::anyhow!(
                        "transports.internet.mode is client but no hub_server/hub_servers are configured"
                    ));
                }
                InternetTransportMode::Client { hubs }
            }
        };

        internet_mode = Some(match net.mode {
            InternetMode::Mesh => InternetRoutingMode::Mesh,
            InternetMode::Server => InternetRoutingMode::Server,
            InternetMode::Client => InternetRoutingMode::Client,
        });
        if matches!(net.mode, InternetMode::Client) {
            let hub = net
                .hub_servers
                .servers
                .first()
                .or(net.hub_server.as_ref())
                .ok_or_else(|| anyhow::anyhow!("client mode requires a hub"))?;
            internet_hub = Some(Callsign::parse(hub).unwrap_or_else(|_| local.clone()));
        }

        transports.push(Box::new(InternetTransport::new(
            next_id,
            local.clone(),
            net.bind_address.clone(),
            net.port,
            mode,
            tls_material,
        )));
    }

    Ok((transports, internet_mode, internet_hub))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "fatal: could not load configuration");
            return Err(e);
        }
    };

    if !config.enabled {
        tracing::info!("node is disabled in config, exiting");
        return Ok(());
    }

    let local = Callsign::parse(&config.local_callsign)
        .map_err(|e| anyhow::anyhow!("invalid local_callsign {:?}: {e}", config.local_callsign))?;

    let tls = load_tls_material(&cli)?;
    let (transports, internet_mode, internet_hub) = build_transports(&local, &config, tls)?;
    if transports.is_empty() {
        return Err(anyhow::anyhow!("no transports are enabled in config"));
    }

    tracing::info!(
        callsign = %local,
        transports = transports.len(),
        "backbone-noded starting"
    );

    let (handle, events, worker) = spawn_coordinator(
        local,
        transports,
        config.services.offer.clone(),
        config.services.request.clone(),
        internet_mode,
        internet_hub,
    );

    let log_handle = std::thread::spawn(move || {
        for event in events.iter() {
            log_event(&event);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received SIGINT, shutting down");

    handle.shutdown();
    let _ = worker.join();
    let _ = log_handle.join();

    tracing::info!("backbone-noded stopped");
    Ok(())
}

fn log_event(event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::Ready => tracing::info!("coordinator ready"),
        CoordinatorEvent::NeighborAdded(call) => tracing::info!(neighbor = %call, "neighbor added"),
        CoordinatorEvent::NeighborUpdated(call) => tracing::debug!(neighbor = %call, "neighbor updated"),
        CoordinatorEvent::NeighborRemoved(call) => tracing::info!(neighbor = %call, "neighbor removed (timed out)"),
        CoordinatorEvent::RoutesUpdated { route_count } => {
            tracing::info!(route_count, "routing table recomputed")
        }
        CoordinatorEvent::Data { source, destination, payload, .. } => {
            tracing::info!(from = %source, to = %destination, bytes = payload.len(), "data delivered")
        }
        CoordinatorEvent::MessageDropped { reason, .. } => tracing::warn!(reason, "message dropped"),
        CoordinatorEvent::MessageSent { destination, .. } => {
            tracing::debug!(to = %destination, "message sent")
        }
        CoordinatorEvent::MessageAcknowledged { rtt_ms, .. } => {
            tracing::debug!(rtt_ms, "message acknowledged")
        }
        CoordinatorEvent::MessageFailed { reason, .. } => tracing::warn!(reason, "message failed"),
        CoordinatorEvent::SyncNeeded { applied_entries } => {
            tracing::info!(applied_entries, "sync applied new registry entries")
        }
    }
}
