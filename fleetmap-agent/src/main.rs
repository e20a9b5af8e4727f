//! Fleetmap agent - telemetry reporter for the Fleetmap aggregator
//!
//! Runs on every machine of the fleet and periodically pushes a node report:
//! - System telemetry via best-effort sysinfo probes
//! - Identity (hostname, addresses, OS, kernel, agent version)
//! - Geolocation (env override or reverse-IP lookup, resolved once)
//! - TCP latency samples toward configured peers
//!
//! Configuration is environment-based: FLEETMAP_AGGREGATOR_URL,
//! FLEETMAP_REPORT_INTERVAL, FLEETMAP_AGENT_NAME, FLEETMAP_AGENT_PEERS and
//! the FLEETMAP_AGENT_LAT/_LON/_LOCATION/_PROVIDER overrides.

mod geo;
mod links;
mod metrics;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct AgentConfig {
    aggregator_url: String,
    report_interval_secs: u64,
    node_name: String,
    peers: Vec<links::PeerTarget>,
}

impl AgentConfig {
    fn from_env() -> Self {
        let node_name = std::env::var("FLEETMAP_AGENT_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(local_hostname);
        Self {
            aggregator_url: std::env::var("FLEETMAP_AGGREGATOR_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            report_interval_secs: std::env::var("FLEETMAP_REPORT_INTERVAL")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(30),
            node_name,
            peers: std::env::var("FLEETMAP_AGENT_PEERS")
                .map(|raw| links::parse_peers(&raw))
                .unwrap_or_default(),
        }
    }
}

fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

/// First non-loopback IPv4 address, if any.
fn internal_ip() -> Option<String> {
    let addrs = if_addrs::get_if_addrs().ok()?;
    addrs
        .into_iter()
        .find(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.ip().to_string())
}

/// Node report payload, as the aggregator ingests it.
#[derive(Debug, Serialize)]
struct NodeReport {
    name: String,
    hostname: String,
    internal_ip: Option<String>,
    external_ip: Option<String>,
    os_image: Option<String>,
    kernel_version: Option<String>,
    architecture: String,
    runtime_version: String,
    lat: Option<f64>,
    lon: Option<f64>,
    location: Option<String>,
    provider: Option<String>,
    #[serde(flatten)]
    telemetry: metrics::Telemetry,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    links: Option<Vec<links::LinkSample>>,
}

async fn build_report(cfg: &AgentConfig, geo: Option<&geo::GeoInfo>) -> NodeReport {
    let telemetry = metrics::collect().await;
    let samples = links::probe_peers(&cfg.peers).await;
    NodeReport {
        name: cfg.node_name.clone(),
        hostname: local_hostname(),
        internal_ip: internal_ip(),
        external_ip: geo.and_then(|g| g.external_ip.clone()),
        os_image: sysinfo::System::long_os_version(),
        kernel_version: sysinfo::System::kernel_version(),
        architecture: std::env::consts::ARCH.to_string(),
        runtime_version: format!("fleetmap-agent/{}", env!("CARGO_PKG_VERSION")),
        lat: geo.map(|g| g.lat),
        lon: geo.map(|g| g.lon),
        location: geo.and_then(|g| g.location.clone()),
        provider: geo.and_then(|g| g.provider.clone()),
        telemetry,
        timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        links: if samples.is_empty() { None } else { Some(samples) },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = AgentConfig::from_env();
    info!("starting fleetmap agent as {}", cfg.node_name);
    info!(
        "aggregator: {}, report interval: {}s, peers: {}",
        cfg.aggregator_url,
        cfg.report_interval_secs,
        cfg.peers.len()
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    // Resolved once at startup: machine placement does not move between reports
    let geo = geo::resolve(&cfg.node_name, &client).await;
    if geo.is_none() {
        warn!("no geolocation available, node will render without a map position");
    }

    let endpoint = format!("{}/api/nodes", cfg.aggregator_url.trim_end_matches('/'));
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.report_interval_secs.max(1)));
    loop {
        ticker.tick().await;
        let report = build_report(&cfg, geo.as_ref()).await;
        match client.post(&endpoint).json(&report).send().await {
            Ok(response) if response.status().is_success() => debug!("report delivered"),
            Ok(response) => warn!("aggregator returned status {}", response.status()),
            Err(e) => error!("failed to send report: {e}"),
        }
    }
}
