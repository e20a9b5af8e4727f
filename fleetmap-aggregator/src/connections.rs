/**
 * VUE CONNEXIONS - Liens dérivés dédupliqués et bornés pour l'affichage
 *
 * RÔLE : Joindre chaque mesure de latence aux coordonnées courantes des deux
 * extrémités, fusionner les liens A→B / B→A en une arête unique, puis borner
 * le résultat pour que la carte reste lisible. Lecture seule sur le registre,
 * recalcul complet à chaque requête.
 */

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::AggregatorConfig;
use crate::models::DerivedLink;
use crate::registry::Registry;

pub fn build_view(registry: &Registry, cfg: &AggregatorConfig) -> Vec<DerivedLink> {
    let mut links: Vec<DerivedLink> = Vec::new();
    for (source, samples) in registry.links() {
        let (source_lat, source_lon) = coords_of(registry, source);
        for sample in samples {
            // Une cible sans rapport vivant garde des coordonnées nulles :
            // état d'affichage valide, le lien n'est pas écarté
            let (target_lat, target_lon) = coords_of(registry, &sample.target_node);
            links.push(DerivedLink {
                source_node: source.clone(),
                target_node: sample.target_node.clone(),
                target_ip: sample.target_ip.clone(),
                latency_ms: sample.latency_ms,
                min_ms: sample.min_ms,
                max_ms: sample.max_ms,
                source_lat,
                source_lon,
                target_lat,
                target_lon,
            });
        }
    }

    if cfg.dedup_connections {
        links = dedup_undirected(links);
    }

    // Au-delà de la borne, on privilégie les chemins les plus rapides
    if links.len() > cfg.max_connections {
        links.sort_by(|a, b| {
            a.latency_ms
                .partial_cmp(&b.latency_ms)
                .unwrap_or(Ordering::Equal)
        });
        links.truncate(cfg.max_connections);
    }

    links
}

fn coords_of(registry: &Registry, name: &str) -> (Option<f64>, Option<f64>) {
    match registry.get(name) {
        Some(record) => (record.report.lat, record.report.lon),
        None => (None, None),
    }
}

/// À l'affichage les liens sont non orientés : A→B et B→A désignent la même
/// arête. En cas de doublon on garde la latence la plus basse (meilleure
/// mesure observée, pas la plus récente).
fn dedup_undirected(links: Vec<DerivedLink>) -> Vec<DerivedLink> {
    let mut best: HashMap<(String, String), DerivedLink> = HashMap::new();
    for link in links {
        let key = edge_key(&link.source_node, &link.target_node);
        match best.get(&key) {
            Some(existing) if existing.latency_ms <= link.latency_ms => {}
            _ => {
                best.insert(key, link);
            }
        }
    }
    best.into_values().collect()
}

fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkSample, NodeReport};
    use time::macros::datetime;

    fn cfg() -> AggregatorConfig {
        AggregatorConfig::default()
    }

    fn ingest(registry: &mut Registry, name: &str, coords: Option<(f64, f64)>, links: Vec<LinkSample>) {
        let report = NodeReport {
            name: name.to_string(),
            lat: coords.map(|c| c.0),
            lon: coords.map(|c| c.1),
            links: if links.is_empty() { None } else { Some(links) },
            ..NodeReport::default()
        };
        registry
            .ingest(report, datetime!(2026-01-01 12:00 UTC))
            .unwrap();
    }

    fn sample(target: &str, latency: f64) -> LinkSample {
        LinkSample {
            target_node: target.to_string(),
            target_ip: None,
            latency_ms: latency,
            min_ms: None,
            max_ms: None,
        }
    }

    #[test]
    fn test_view_joins_both_endpoint_coordinates() {
        let mut registry = Registry::new();
        ingest(&mut registry, "node-2", Some((40.7128, -74.0060)), vec![]);
        ingest(
            &mut registry,
            "node-1",
            Some((37.7749, -122.4194)),
            vec![sample("node-2", 10.5)],
        );

        let view = build_view(&registry, &cfg());
        assert_eq!(view.len(), 1);
        let link = &view[0];
        assert_eq!(link.source_node, "node-1");
        assert_eq!(link.target_node, "node-2");
        assert_eq!(link.source_lat, Some(37.7749));
        assert_eq!(link.target_lat, Some(40.7128));
        assert_eq!(link.latency_ms, 10.5);
    }

    #[test]
    fn test_unknown_target_keeps_null_coordinates() {
        let mut registry = Registry::new();
        ingest(
            &mut registry,
            "node-1",
            Some((37.7749, -122.4194)),
            vec![sample("never-seen", 22.0)],
        );

        let view = build_view(&registry, &cfg());
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].target_lat, None);
        assert_eq!(view[0].target_lon, None);
    }

    #[test]
    fn test_dedup_keeps_lower_latency_regardless_of_order() {
        for flipped in [false, true] {
            let mut registry = Registry::new();
            let (fast, slow) = (sample("node-b", 10.0), sample("node-a", 15.0));
            if flipped {
                ingest(&mut registry, "node-b", None, vec![slow.clone()]);
                ingest(&mut registry, "node-a", None, vec![fast.clone()]);
            } else {
                ingest(&mut registry, "node-a", None, vec![fast.clone()]);
                ingest(&mut registry, "node-b", None, vec![slow.clone()]);
            }

            let view = build_view(&registry, &cfg());
            assert_eq!(view.len(), 1, "flipped={flipped}");
            assert_eq!(view[0].latency_ms, 10.0, "flipped={flipped}");
        }
    }

    #[test]
    fn test_dedup_can_be_disabled() {
        let mut registry = Registry::new();
        ingest(&mut registry, "node-a", None, vec![sample("node-b", 10.0)]);
        ingest(&mut registry, "node-b", None, vec![sample("node-a", 15.0)]);

        let mut cfg = cfg();
        cfg.dedup_connections = false;
        assert_eq!(build_view(&registry, &cfg).len(), 2);
    }

    #[test]
    fn test_cap_truncates_to_fastest_links() {
        let mut registry = Registry::new();
        let samples: Vec<LinkSample> = (0..10)
            .map(|i| sample(&format!("target-{i}"), (10 - i) as f64))
            .collect();
        ingest(&mut registry, "source", None, samples);

        let mut cfg = cfg();
        cfg.max_connections = 3;
        let view = build_view(&registry, &cfg);
        assert_eq!(view.len(), 3);
        // Tri croissant par latence : seuls les chemins les plus rapides restent
        assert!(view.iter().all(|l| l.latency_ms <= 3.0));
    }
}
