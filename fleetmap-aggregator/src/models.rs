use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Rapport de télémétrie poussé par un agent, clé logique : `name`.
/// Tous les champs hors `name` sont optionnels : la collecte côté agent est
/// best-effort, chaque sonde peut échouer sans invalider le rapport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub hostname: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub os_image: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: Option<String>,
    pub runtime_version: Option<String>,
    pub container_runtime: Option<String>,
    // Géolocalisation (lat/lon approximatives, label humain, source)
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub location: Option<String>,
    pub provider: Option<String>,
    // Télémétrie numérique à plat
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub fan_rpm: Option<u64>,
    pub cpu_freq_mhz: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub load_1: Option<f64>,
    pub load_5: Option<f64>,
    pub load_15: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    pub memory_total_bytes: Option<u64>,
    pub swap_used_bytes: Option<u64>,
    pub swap_total_bytes: Option<u64>,
    pub net_rx_bytes_per_sec: Option<f64>,
    pub net_tx_bytes_per_sec: Option<f64>,
    pub net_rx_errors: Option<u64>,
    pub net_tx_errors: Option<u64>,
    pub disk_read_bytes_per_sec: Option<f64>,
    pub disk_write_bytes_per_sec: Option<f64>,
    pub process_count: Option<u64>,
    pub network_interfaces: Option<Vec<String>>,
    /// Horodatage côté agent (secondes epoch), distinct de `received_at`.
    pub timestamp: Option<f64>,
    /// Mesures de latence vers les pairs ; liste remplacée en bloc si présente.
    pub links: Option<Vec<LinkSample>>,
}

/// Mesure de latence déclarée par un nœud source vers un nœud cible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSample {
    pub target_node: String,
    pub target_ip: Option<String>,
    pub latency_ms: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Rapport stocké : payload agent + horodatage d'ingestion côté agrégateur.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    #[serde(flatten)]
    pub report: NodeReport,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

/// Vue statut par nœud pour le frontend (GET /api/nodes).
#[derive(Debug, Serialize)]
pub struct NodeStatusView {
    pub name: String,
    pub hostname: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub location: Option<String>,
    pub provider: Option<String>,
    pub status: String, // online, warning, offline
    pub last_seen: String, // "30s ago", "2m ago", "1h ago"
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub uptime_seconds: Option<u64>,
    pub load_1: Option<f64>,
    pub net_rx_bytes_per_sec: Option<f64>,
    pub net_tx_bytes_per_sec: Option<f64>,
    pub process_count: Option<u64>,
    pub runtime_version: Option<String>,
}

/// Lien dérivé : mesure jointe aux coordonnées courantes des deux extrémités.
/// Jamais persisté, recalculé à chaque requête. Une cible inconnue garde des
/// coordonnées nulles, c'est un état d'affichage valide.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedLink {
    pub source_node: String,
    pub target_node: String,
    pub target_ip: Option<String>,
    pub latency_ms: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub source_lat: Option<f64>,
    pub source_lon: Option<f64>,
    pub target_lat: Option<f64>,
    pub target_lon: Option<f64>,
}

/// Statistiques agrégées du parc (GET /api/stats). Les moyennes ne portent
/// que sur les nœuds encore dans la fenêtre de vivacité.
#[derive(Debug, Serialize)]
pub struct FleetStats {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub avg_disk_percent: f64,
    pub avg_net_rx_bytes_per_sec: f64,
    pub avg_net_tx_bytes_per_sec: f64,
    pub providers: HashMap<String, usize>,
    pub total_connections: usize,
    pub timestamp: String,
}
