/**
 * FLEETMAP AGGREGATOR - Point d'entrée du service central
 *
 * RÔLE : Bootstrap de l'agrégateur : config environnement, stores partagés,
 * provider de citations (optionnel), serveur HTTP Axum.
 *
 * ARCHITECTURE : Un seul process, état en mémoire uniquement. Les agents
 * poussent leurs rapports sur POST /api/nodes, le frontend lit les vues
 * dérivées. Pas de persistance : un redémarrage repart d'un registre vide
 * et les agents le repeuplent au rythme de leurs rapports.
 */

mod config;
mod connections;
mod http;
mod models;
mod quotes;
mod registry;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::http::AppState;
use crate::quotes::{OpenAiQuoteProvider, QuoteCache, QuoteProvider};
use crate::registry::Registry;
use crate::state::new_state;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas
    tracing_subscriber::fmt::init();

    let cfg = Arc::new(config::from_env());

    let quote_provider: Option<Arc<dyn QuoteProvider>> = match cfg.quote_api_key.clone() {
        Some(api_key) => match OpenAiQuoteProvider::new(
            api_key,
            cfg.quote_api_url.clone(),
            cfg.quote_model.clone(),
            cfg.quote_timeout_secs,
        ) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                warn!("[kernel] failed to build quote provider: {e}");
                None
            }
        },
        None => {
            info!("[kernel] quote generation disabled (FLEETMAP_QUOTE_API_KEY not set)");
            None
        }
    };

    let app_state = AppState {
        registry: new_state(Registry::new()),
        quotes: new_state(QuoteCache::new()),
        cfg: cfg.clone(),
        quote_provider,
    };

    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
