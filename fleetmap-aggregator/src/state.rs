/**
 * ÉTAT PARTAGÉ - Propriétaire logique unique des maps mutables
 *
 * RÔLE : Fournir le type `Shared<T>` (Arc + Mutex parking_lot) utilisé pour
 * le registre et le cache citations, et coordonner la passe d'éviction qui
 * traverse les deux stores.
 *
 * DISCIPLINE DE VERROUS : un verrou par store, pris l'un après l'autre,
 * jamais imbriqués, jamais tenus à travers un await. Les handlers lisent
 * sous verrou court et clonent ce dont ils ont besoin.
 */

use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

use crate::config::AggregatorConfig;
use crate::quotes::QuoteCache;
use crate::registry::Registry;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Passe d'éviction synchrone, appelée en tête de toute lecture couvrant le
/// registre entier. L'éviction d'un nœud retire aussi son entrée du cache
/// citations (cascade), d'où la coordination ici plutôt que dans le registre.
pub fn sweep_expired(
    registry: &Shared<Registry>,
    quotes: &Shared<QuoteCache>,
    cfg: &AggregatorConfig,
    now: OffsetDateTime,
) {
    let evicted = registry.lock().evict_expired(now, cfg);
    if evicted.is_empty() {
        return;
    }
    let mut cache = quotes.lock();
    for name in &evicted {
        cache.remove(name);
    }
    info!(
        "[registry] evicted {} stale node(s): {}",
        evicted.len(),
        evicted.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeReport;
    use time::Duration;

    fn report(name: &str) -> NodeReport {
        NodeReport {
            name: name.to_string(),
            ..NodeReport::default()
        }
    }

    #[test]
    fn test_sweep_cascades_into_quote_cache() {
        let cfg = AggregatorConfig::default();
        let now = OffsetDateTime::now_utc();
        let registry = new_state(Registry::new());
        let quotes = new_state(QuoteCache::new());

        let expired_at = now - Duration::seconds(cfg.node_timeout_secs + cfg.cleanup_grace_secs + 1);
        registry.lock().ingest(report("ghost"), expired_at).unwrap();
        registry.lock().ingest(report("alive"), now).unwrap();
        quotes
            .lock()
            .store("ghost", "old quote".to_string(), "fp".to_string(), expired_at);

        sweep_expired(&registry, &quotes, &cfg, now);

        assert!(registry.lock().get("ghost").is_none());
        assert!(registry.lock().get("alive").is_some());
        assert!(quotes.lock().lookup("ghost", "fp", now, i64::MAX).is_none());
    }
}
