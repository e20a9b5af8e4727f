/**
 * API REST FLEETMAP - Surface HTTP de l'agrégateur
 *
 * RÔLE :
 * Traduire les opérations registre / vue connexions / cache citations en
 * paires requête-réponse. Les codes de statut sont le contrat :
 * - validation → 4xx, jamais stocké
 * - nom inconnu → 404, pas journalisé comme erreur
 * - panne collaborateur → repli local, jamais propagée au client
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, sérialisation JSON automatique
 * - Les lectures couvrant le registre entier (liste, connexions, stats)
 *   déclenchent d'abord la passe d'éviction : pas de sweeper en fond
 * - POST /api/quote/{name} : gate par secret partagé, 503 si la feature
 *   n'est pas configurée
 */

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::config::AggregatorConfig;
use crate::connections;
use crate::models::{DerivedLink, FleetStats, NodeRecord, NodeReport, NodeStatusView};
use crate::quotes::{self, QuoteCache, QuoteProvider};
use crate::registry::Registry;
use crate::state::{sweep_expired, Shared};

#[derive(Clone)]
pub struct AppState {
    pub registry: Shared<Registry>,
    pub quotes: Shared<QuoteCache>,
    pub cfg: Arc<AggregatorConfig>,
    pub quote_provider: Option<Arc<dyn QuoteProvider>>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/nodes", get(list_nodes).post(ingest_node))
        .route("/api/nodes/{name}", get(get_node).delete(delete_node))
        .route("/api/connections", get(list_connections))
        .route("/api/stats", get(fleet_stats))
        .route("/api/quote/{name}", post(node_quote))
        .with_state(app_state)
}

// GET / (bannière de service, health check)
async fn root(State(app): State<AppState>) -> Json<serde_json::Value> {
    let now = OffsetDateTime::now_utc();
    Json(serde_json::json!({
        "service": "fleetmap-aggregator",
        "status": "running",
        "nodes_count": app.registry.lock().node_count(),
        "timestamp": now.format(&Rfc3339).unwrap_or_default(),
    }))
}

// POST /api/nodes (ingestion d'un rapport agent)
async fn ingest_node(
    State(app): State<AppState>,
    Json(report): Json<NodeReport>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let now = OffsetDateTime::now_utc();
    let name = report.name.clone();
    app.registry
        .lock()
        .ingest(report, now)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    info!("[http] received report from {name}");
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("Data received from {name}"),
        "timestamp": now.format(&Rfc3339).unwrap_or_default(),
    })))
}

// GET /api/nodes (liste des statuts, éviction préalable)
async fn list_nodes(State(app): State<AppState>) -> Json<Vec<NodeStatusView>> {
    let now = OffsetDateTime::now_utc();
    sweep_expired(&app.registry, &app.quotes, &app.cfg, now);
    Json(app.registry.lock().status_views(now, &app.cfg))
}

// GET /api/nodes/{name} (rapport brut stocké, avec received_at)
async fn get_node(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<NodeRecord>, StatusCode> {
    let registry = app.registry.lock();
    match registry.get(&name) {
        Some(record) => Ok(Json(record.clone())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// DELETE /api/nodes/{name} (retrait forcé, cascade complète)
async fn delete_node(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !app.registry.lock().remove(&name) {
        return Err(StatusCode::NOT_FOUND);
    }
    app.quotes.lock().remove(&name);
    info!("[http] removed node {name}");
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("Node {name} removed"),
    })))
}

// GET /api/connections (vue dédupliquée et bornée, éviction préalable)
async fn list_connections(State(app): State<AppState>) -> Json<Vec<DerivedLink>> {
    let now = OffsetDateTime::now_utc();
    sweep_expired(&app.registry, &app.quotes, &app.cfg, now);
    let registry = app.registry.lock();
    Json(connections::build_view(&registry, &app.cfg))
}

// GET /api/stats (agrégats parc, éviction préalable)
async fn fleet_stats(State(app): State<AppState>) -> Json<FleetStats> {
    let now = OffsetDateTime::now_utc();
    sweep_expired(&app.registry, &app.quotes, &app.cfg, now);
    Json(app.registry.lock().stats(now, &app.cfg))
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub secret: String,
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub name: String,
    pub quote: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_seconds: Option<i64>,
}

// POST /api/quote/{name}
// 503 feature non configurée, 401 secret invalide, 404 nœud inconnu.
async fn node_quote(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, StatusCode> {
    let Some(expected) = app.cfg.quote_secret.as_deref() else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    if request.secret != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let Some(provider) = app.quote_provider.clone() else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    // Clone du rapport sous verrou court : l'appel provider (lent, borné par
    // son propre timeout) s'exécute sans verrou tenu sur le registre
    let report = {
        let registry = app.registry.lock();
        match registry.get(&name) {
            Some(record) => record.report.clone(),
            None => return Err(StatusCode::NOT_FOUND),
        }
    };

    let now = OffsetDateTime::now_utc();
    let outcome = quotes::get_or_generate(
        &app.quotes,
        provider.as_ref(),
        &report,
        request.force_new,
        app.cfg.quote_ttl_secs,
        now,
    )
    .await;

    Ok(Json(QuoteResponse {
        name,
        quote: outcome.text,
        cached: outcome.cached,
        cache_age_seconds: outcome.cache_age_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::QuoteError;
    use crate::state::new_state;
    use async_trait::async_trait;

    struct CannedProvider;

    #[async_trait]
    impl QuoteProvider for CannedProvider {
        async fn generate(&self, _digest: &str) -> Result<String, QuoteError> {
            Ok("I am definitely a computer.".to_string())
        }
    }

    fn app(secret: Option<&str>, with_provider: bool) -> AppState {
        let cfg = AggregatorConfig {
            quote_secret: secret.map(str::to_string),
            ..AggregatorConfig::default()
        };
        AppState {
            registry: new_state(Registry::new()),
            quotes: new_state(QuoteCache::new()),
            cfg: Arc::new(cfg),
            quote_provider: if with_provider {
                Some(Arc::new(CannedProvider))
            } else {
                None
            },
        }
    }

    fn ingest(app: &AppState, name: &str) {
        let report = NodeReport {
            name: name.to_string(),
            ..NodeReport::default()
        };
        app.registry
            .lock()
            .ingest(report, OffsetDateTime::now_utc())
            .unwrap();
    }

    #[tokio::test]
    async fn test_quote_requires_configuration() {
        let state = app(None, true);
        ingest(&state, "node-1");
        let result = node_quote(
            State(state),
            Path("node-1".to_string()),
            Json(QuoteRequest { secret: "x".to_string(), force_new: false }),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_quote_rejects_bad_secret() {
        let state = app(Some("hunter2"), true);
        ingest(&state, "node-1");
        let result = node_quote(
            State(state),
            Path("node-1".to_string()),
            Json(QuoteRequest { secret: "wrong".to_string(), force_new: false }),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_quote_unknown_node_is_404() {
        let state = app(Some("hunter2"), true);
        let result = node_quote(
            State(state),
            Path("nope".to_string()),
            Json(QuoteRequest { secret: "hunter2".to_string(), force_new: false }),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_quote_happy_path_returns_generated_text() {
        let state = app(Some("hunter2"), true);
        ingest(&state, "node-1");
        let result = node_quote(
            State(state),
            Path("node-1".to_string()),
            Json(QuoteRequest { secret: "hunter2".to_string(), force_new: false }),
        )
        .await
        .unwrap();
        assert_eq!(result.0.quote, "I am definitely a computer.");
        assert!(!result.0.cached);
        assert_eq!(result.0.cache_age_seconds, None);
    }

    #[tokio::test]
    async fn test_delete_node_cascades_and_404s_on_unknown() {
        let state = app(None, false);
        ingest(&state, "node-1");
        state.quotes.lock().store(
            "node-1",
            "old".to_string(),
            "fp".to_string(),
            OffsetDateTime::now_utc(),
        );

        let ok = delete_node(State(state.clone()), Path("node-1".to_string())).await;
        assert!(ok.is_ok());
        assert!(state.registry.lock().get("node-1").is_none());

        let missing = delete_node(State(state), Path("node-1".to_string())).await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));
    }
}
