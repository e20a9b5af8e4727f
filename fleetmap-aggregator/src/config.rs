/**
 * CONFIGURATION - Paramètres de l'agrégateur via variables d'environnement
 *
 * RÔLE : Centraliser fenêtres de vivacité, bornes de la vue connexions,
 * TTL du cache citations et identifiants du provider de génération.
 *
 * Une valeur invalide est signalée une fois puis remplacée par son défaut :
 * le service démarre toujours, un réglage optionnel cassé ne le bloque pas.
 */

use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// FLEETMAP_PORT (défaut 8000)
    pub port: u16,
    /// FLEETMAP_ONLINE_WINDOW : âge max en secondes pour le statut online (défaut 60)
    pub online_window_secs: i64,
    /// FLEETMAP_NODE_TIMEOUT : âge en secondes au-delà duquel un nœud est offline (défaut 120)
    pub node_timeout_secs: i64,
    /// FLEETMAP_CLEANUP_GRACE : délai de grâce avant éviction, après timeout (défaut 86400)
    pub cleanup_grace_secs: i64,
    /// FLEETMAP_MAX_CONNECTIONS : borne de la vue connexions (défaut 500)
    pub max_connections: usize,
    /// FLEETMAP_DEDUP_CONNECTIONS : fusion des liens A→B / B→A (défaut true)
    pub dedup_connections: bool,
    /// FLEETMAP_QUOTE_TTL : durée de vie d'une citation en cache (défaut 86400)
    pub quote_ttl_secs: i64,
    /// FLEETMAP_QUOTE_SECRET : secret partagé exigé sur POST /api/quote/{name}
    pub quote_secret: Option<String>,
    /// FLEETMAP_QUOTE_API_KEY : clé du provider de génération (absent = feature coupée)
    pub quote_api_key: Option<String>,
    /// FLEETMAP_QUOTE_API_URL (défaut : endpoint chat completions OpenAI)
    pub quote_api_url: String,
    /// FLEETMAP_QUOTE_MODEL (défaut gpt-4o-mini)
    pub quote_model: String,
    /// FLEETMAP_QUOTE_TIMEOUT : timeout en secondes de l'appel provider (défaut 10)
    pub quote_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            online_window_secs: 60,
            node_timeout_secs: 120,
            cleanup_grace_secs: 86_400,
            max_connections: 500,
            dedup_connections: true,
            quote_ttl_secs: 86_400,
            quote_secret: None,
            quote_api_key: None,
            quote_api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            quote_model: "gpt-4o-mini".to_string(),
            quote_timeout_secs: 10,
        }
    }
}

pub fn from_env() -> AggregatorConfig {
    let d = AggregatorConfig::default();
    AggregatorConfig {
        port: env_or("FLEETMAP_PORT", d.port),
        online_window_secs: env_or("FLEETMAP_ONLINE_WINDOW", d.online_window_secs),
        node_timeout_secs: env_or("FLEETMAP_NODE_TIMEOUT", d.node_timeout_secs),
        cleanup_grace_secs: env_or("FLEETMAP_CLEANUP_GRACE", d.cleanup_grace_secs),
        max_connections: env_or("FLEETMAP_MAX_CONNECTIONS", d.max_connections),
        dedup_connections: env_or("FLEETMAP_DEDUP_CONNECTIONS", d.dedup_connections),
        quote_ttl_secs: env_or("FLEETMAP_QUOTE_TTL", d.quote_ttl_secs),
        quote_secret: env_opt("FLEETMAP_QUOTE_SECRET"),
        quote_api_key: env_opt("FLEETMAP_QUOTE_API_KEY"),
        quote_api_url: env_opt("FLEETMAP_QUOTE_API_URL").unwrap_or(d.quote_api_url),
        quote_model: env_opt("FLEETMAP_QUOTE_MODEL").unwrap_or(d.quote_model),
        quote_timeout_secs: env_or("FLEETMAP_QUOTE_TIMEOUT", d.quote_timeout_secs),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr + Display>(key: &str, default: T) -> T {
    parse_or(key, std::env::var(key).ok(), default)
}

/// Parse la valeur brute, retombe sur le défaut (avec warning) si invalide.
fn parse_or<T: FromStr + Display>(key: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else { return default };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!("[config] invalid value for {key}: {raw:?}, using default {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_accepts_valid_values() {
        assert_eq!(parse_or("K", Some("42".to_string()), 7i64), 42);
        assert_eq!(parse_or("K", Some(" 42 ".to_string()), 7i64), 42);
        assert!(parse_or("K", Some("false".to_string()), true) == false);
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        assert_eq!(parse_or("K", Some("abc".to_string()), 120i64), 120);
        assert_eq!(parse_or("K", Some("".to_string()), 500usize), 500);
        assert_eq!(parse_or("K", None, 60i64), 60);
    }

    #[test]
    fn test_defaults_match_documented_windows() {
        let cfg = AggregatorConfig::default();
        assert_eq!(cfg.online_window_secs, 60);
        assert_eq!(cfg.node_timeout_secs, 120);
        assert_eq!(cfg.cleanup_grace_secs, 86_400);
        assert_eq!(cfg.max_connections, 500);
        assert!(cfg.dedup_connections);
        assert_eq!(cfg.quote_ttl_secs, 86_400);
    }
}
