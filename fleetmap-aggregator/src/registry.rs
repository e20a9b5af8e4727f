/**
 * REGISTRE - Store en mémoire des rapports nœuds et des mesures de liens
 *
 * RÔLE :
 * Source de vérité du parc pour la durée de vie du process. Un rapport
 * vivant par nom logique, une liste de mesures de latence par nœud source.
 *
 * FONCTIONNEMENT :
 * - Ingestion : écrase le rapport précédent, tamponne received_at, remplace
 *   la liste de liens seulement si le rapport en porte une
 * - Remplacement : un changement d'identité (ip interne, hostname, version
 *   runtime) est réconcilié en silence, la géolocalisation connue est
 *   reportée sur le nouveau rapport pour éviter un saut sur la carte
 * - Vivacité : dérivée uniquement de l'âge du dernier rapport, pas de
 *   protocole de heartbeat
 * - Éviction : passe de GC synchrone, le full-scan des listes de liens est
 *   acceptable car le registre est borné par la taille du parc
 */

use std::collections::HashMap;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::config::AggregatorConfig;
use crate::models::{FleetStats, LinkSample, NodeRecord, NodeReport, NodeStatusView};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("node name must not be empty")]
    EmptyName,
}

/// Classement de vivacité, fonction pure de `now - received_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Online,
    Warning,
    Offline,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Online => "online",
            Liveness::Warning => "warning",
            Liveness::Offline => "offline",
        }
    }
}

pub fn liveness(age_secs: i64, cfg: &AggregatorConfig) -> Liveness {
    if age_secs < cfg.online_window_secs {
        Liveness::Online
    } else if age_secs < cfg.node_timeout_secs {
        Liveness::Warning
    } else {
        Liveness::Offline
    }
}

/// Âge lisible : "{s}s ago" sous la minute, "{m}m ago" sous l'heure,
/// "{h}h ago" au-delà. Division entière tronquée, pas d'arrondi.
pub fn format_age(age_secs: i64) -> String {
    let secs = age_secs.max(0);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

#[derive(Default)]
pub struct Registry {
    nodes: HashMap<String, NodeRecord>,
    links: HashMap<String, Vec<LinkSample>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingestion d'un rapport. Atomique : soit le rapport remplace
    /// entièrement le précédent, soit il est rejeté.
    pub fn ingest(&mut self, mut report: NodeReport, now: OffsetDateTime) -> Result<(), IngestError> {
        if report.name.trim().is_empty() {
            return Err(IngestError::EmptyName);
        }
        let name = report.name.clone();
        let links = report.links.take();

        if let Some(previous) = self.nodes.get(&name) {
            if is_replacement(&previous.report, &report) {
                backfill_geolocation(&previous.report, &mut report);
                info!("[registry] identity change for {name}, carrying geolocation over");
            }
        }

        if let Some(samples) = links {
            self.links.insert(name.clone(), samples);
        }
        self.nodes.insert(name, NodeRecord { report, received_at: now });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn links(&self) -> &HashMap<String, Vec<LinkSample>> {
        &self.links
    }

    /// Suppression manuelle (DELETE /api/nodes/{name}), même cascade que
    /// l'éviction. Retourne false si le nom est inconnu.
    pub fn remove(&mut self, name: &str) -> bool {
        if self.nodes.remove(name).is_none() {
            return false;
        }
        self.purge_links(name);
        true
    }

    /// Passe d'éviction : retire les nœuds dont l'âge dépasse
    /// timeout + grâce, leur liste de liens, et toute mesure d'un autre
    /// source les visant. Retourne les noms évincés pour la cascade sur le
    /// cache citations.
    pub fn evict_expired(&mut self, now: OffsetDateTime, cfg: &AggregatorConfig) -> Vec<String> {
        let horizon = Duration::seconds(cfg.node_timeout_secs + cfg.cleanup_grace_secs);
        let expired: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, record)| now - record.received_at >= horizon)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.nodes.remove(name);
            self.purge_links(name);
        }
        expired
    }

    fn purge_links(&mut self, name: &str) {
        self.links.remove(name);
        self.links.retain(|_, samples| {
            samples.retain(|sample| sample.target_node != name);
            !samples.is_empty()
        });
    }

    /// Vues statut (GET /api/nodes) : bucket de vivacité + âge lisible.
    pub fn status_views(&self, now: OffsetDateTime, cfg: &AggregatorConfig) -> Vec<NodeStatusView> {
        self.nodes
            .values()
            .map(|record| {
                let age = (now - record.received_at).whole_seconds();
                let r = &record.report;
                NodeStatusView {
                    name: r.name.clone(),
                    hostname: r.hostname.clone(),
                    internal_ip: r.internal_ip.clone(),
                    external_ip: r.external_ip.clone(),
                    lat: r.lat,
                    lon: r.lon,
                    location: r.location.clone(),
                    provider: r.provider.clone(),
                    status: liveness(age, cfg).as_str().to_string(),
                    last_seen: format_age(age),
                    cpu_percent: r.cpu_percent,
                    memory_percent: r.memory_percent,
                    disk_percent: r.disk_percent,
                    temperature_celsius: r.temperature_celsius,
                    uptime_seconds: r.uptime_seconds,
                    load_1: r.load_1,
                    net_rx_bytes_per_sec: r.net_rx_bytes_per_sec,
                    net_tx_bytes_per_sec: r.net_tx_bytes_per_sec,
                    process_count: r.process_count,
                    runtime_version: r.runtime_version.clone(),
                }
            })
            .collect()
    }

    /// Statistiques agrégées. Les moyennes ne comptent que les nœuds encore
    /// dans la fenêtre de timeout ; les offline sortent du dénominateur.
    pub fn stats(&self, now: OffsetDateTime, cfg: &AggregatorConfig) -> FleetStats {
        let mut online = 0usize;
        let mut cpu_sum = 0.0;
        let mut mem_sum = 0.0;
        let mut disk_sum = 0.0;
        let mut rx_sum = 0.0;
        let mut tx_sum = 0.0;
        let mut providers: HashMap<String, usize> = HashMap::new();

        for record in self.nodes.values() {
            let age = (now - record.received_at).whole_seconds();
            if age >= cfg.node_timeout_secs {
                continue;
            }
            online += 1;
            let r = &record.report;
            cpu_sum += r.cpu_percent.unwrap_or(0.0);
            mem_sum += r.memory_percent.unwrap_or(0.0);
            disk_sum += r.disk_percent.unwrap_or(0.0);
            rx_sum += r.net_rx_bytes_per_sec.unwrap_or(0.0);
            tx_sum += r.net_tx_bytes_per_sec.unwrap_or(0.0);
            let provider = r.provider.clone().unwrap_or_else(|| "unknown".to_string());
            *providers.entry(provider).or_insert(0) += 1;
        }

        let avg = |sum: f64| {
            if online > 0 {
                (sum / online as f64 * 100.0).round() / 100.0
            } else {
                0.0
            }
        };

        FleetStats {
            total_nodes: self.nodes.len(),
            online_nodes: online,
            offline_nodes: self.nodes.len() - online,
            avg_cpu_percent: avg(cpu_sum),
            avg_memory_percent: avg(mem_sum),
            avg_disk_percent: avg(disk_sum),
            avg_net_rx_bytes_per_sec: avg(rx_sum),
            avg_net_tx_bytes_per_sec: avg(tx_sum),
            providers,
            total_connections: self.links.values().map(Vec::len).sum(),
            timestamp: now.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

fn differs(old: &Option<String>, new: &Option<String>) -> bool {
    matches!((old, new), (Some(a), Some(b)) if a != b)
}

/// Détection de remplacement matériel sous le même nom logique. Comparaison
/// dans l'ordre : ip interne, hostname, version runtime. Un champ absent
/// d'un des deux côtés ne compte pas comme différence.
fn is_replacement(old: &NodeReport, new: &NodeReport) -> bool {
    differs(&old.internal_ip, &new.internal_ip)
        || differs(&old.hostname, &new.hostname)
        || differs(&old.runtime_version, &new.runtime_version)
}

/// Reporte la géolocalisation connue sur le nouveau rapport, uniquement là
/// où il n'en fournit pas. La télémétrie n'est jamais reportée.
fn backfill_geolocation(old: &NodeReport, new: &mut NodeReport) {
    if new.lat.is_none() {
        new.lat = old.lat;
    }
    if new.lon.is_none() {
        new.lon = old.lon;
    }
    if new.location.is_none() {
        new.location = old.location.clone();
    }
    if new.provider.is_none() {
        new.provider = old.provider.clone();
    }
}
