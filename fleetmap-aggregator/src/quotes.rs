/**
 * CACHE CITATIONS - Artefact texte généré par nœud, invalidation par empreinte
 *
 * RÔLE :
 * Chaque nœud peut se voir générer une courte citation de statut via un
 * provider externe. Les appels sont coûteux : le cache ne régénère que si
 * l'empreinte des métriques change réellement ou si l'entrée expire.
 *
 * FONCTIONNEMENT :
 * - Empreinte : métriques volatiles arrondies par paliers (cpu/mem au 10,
 *   température au 5, uptime au jour, charge au 0.5) pour que la gigue de
 *   mesure ordinaire ne déclenche jamais de régénération
 * - Hit : entrée non expirée ET empreinte inchangée, sauf force_new
 * - Panne provider : citation de secours par catégorie, mise en cache quand
 *   même (c'est un miss, pas une erreur visible du client)
 *
 * VERROUS : l'appel provider s'exécute hors de tout verrou, le commit
 * reprend le verrou du cache juste pour écrire le résultat.
 */

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::models::NodeReport;
use crate::state::Shared;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("quote provider returned no usable content")]
    EmptyCompletion,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn generate(&self, digest: &str) -> Result<String, QuoteError>;
}

fn bucket(value: f64, width: f64) -> f64 {
    (value / width).floor() * width
}

/// Empreinte des métriques volatiles. Un champ absent compte pour zéro :
/// l'empreinte ne doit jamais échouer sur un rapport incomplet.
pub fn fingerprint(report: &NodeReport) -> String {
    let cpu = bucket(report.cpu_percent.unwrap_or(0.0), 10.0);
    let mem = bucket(report.memory_percent.unwrap_or(0.0), 10.0);
    let temp = bucket(report.temperature_celsius.unwrap_or(0.0), 5.0);
    let days = report.uptime_seconds.unwrap_or(0) / 86_400;
    let load = bucket(report.load_1.unwrap_or(0.0), 0.5);
    format!("cpu{cpu:.0}-mem{mem:.0}-temp{temp:.0}-up{days}d-load{load:.1}")
}

/// Résumé compact en langage naturel des métriques courantes, passé tel quel
/// au provider de génération.
pub fn metrics_digest(report: &NodeReport) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(v) = report.cpu_percent {
        parts.push(format!("cpu {v:.0}%"));
    }
    if let Some(v) = report.memory_percent {
        parts.push(format!("memory {v:.0}%"));
    }
    if let Some(v) = report.disk_percent {
        parts.push(format!("disk {v:.0}%"));
    }
    if let Some(v) = report.temperature_celsius {
        parts.push(format!("temperature {v:.0}C"));
    }
    if let Some(v) = report.uptime_seconds {
        parts.push(format!("uptime {} day(s)", v / 86_400));
    }
    if let Some(v) = report.load_1 {
        parts.push(format!("load {v:.2}"));
    }
    let metrics = if parts.is_empty() {
        "no telemetry reported".to_string()
    } else {
        parts.join(", ")
    };
    let provider = report.provider.as_deref().unwrap_or("unknown provider");
    match report.location.as_deref() {
        Some(location) => format!("node {} ({provider}) in {location}: {metrics}", report.name),
        None => format!("node {} ({provider}): {metrics}", report.name),
    }
}

/// Citation de secours quand le provider est en panne, par catégorie de
/// provider d'hébergement. Servie et mise en cache comme un miss normal.
pub fn fallback_quote(provider: Option<&str>) -> &'static str {
    match provider.unwrap_or("") {
        "raspberry-pi" => "I may be small, but I hold this whole homelab together.",
        "oracle" | "gcp" | "aws" | "azure" | "do" => {
            "Running smoothly in someone else's computer."
        }
        _ => "All systems nominal. Probably.",
    }
}

#[derive(Debug, Clone)]
pub struct QuoteEntry {
    pub text: String,
    pub fingerprint: String,
    pub generated_at: OffsetDateTime,
}

#[derive(Default)]
pub struct QuoteCache {
    entries: HashMap<String, QuoteEntry>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hit si l'entrée existe, n'a pas dépassé le TTL et que l'empreinte
    /// courante est identique à celle stockée.
    pub fn lookup(
        &self,
        name: &str,
        fingerprint: &str,
        now: OffsetDateTime,
        ttl_secs: i64,
    ) -> Option<&QuoteEntry> {
        let entry = self.entries.get(name)?;
        if now - entry.generated_at >= Duration::seconds(ttl_secs) {
            return None;
        }
        if entry.fingerprint != fingerprint {
            return None;
        }
        Some(entry)
    }

    pub fn store(&mut self, name: &str, text: String, fingerprint: String, now: OffsetDateTime) {
        self.entries.insert(
            name.to_string(),
            QuoteEntry {
                text,
                fingerprint,
                generated_at: now,
            },
        );
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

pub struct QuoteOutcome {
    pub text: String,
    pub cached: bool,
    pub cache_age_seconds: Option<i64>,
}

/// Orchestration complète : lecture du cache sous verrou court, génération
/// hors verrou (l'appel externe porte son propre timeout), commit sous
/// verrou. Ne propage jamais d'erreur : une panne provider devient une
/// citation de secours.
pub async fn get_or_generate(
    cache: &Shared<QuoteCache>,
    provider: &dyn QuoteProvider,
    report: &NodeReport,
    force_new: bool,
    ttl_secs: i64,
    now: OffsetDateTime,
) -> QuoteOutcome {
    let current_fingerprint = fingerprint(report);

    if !force_new {
        let guard = cache.lock();
        if let Some(entry) = guard.lookup(&report.name, &current_fingerprint, now, ttl_secs) {
            return QuoteOutcome {
                text: entry.text.clone(),
                cached: true,
                cache_age_seconds: Some((now - entry.generated_at).whole_seconds()),
            };
        }
    }

    let digest = metrics_digest(report);
    let text = match provider.generate(&digest).await {
        Ok(text) => text,
        Err(e) => {
            warn!("[quotes] generation failed for {}: {e}", report.name);
            fallback_quote(report.provider.as_deref()).to_string()
        }
    };

    cache
        .lock()
        .store(&report.name, text.clone(), current_fingerprint, now);

    QuoteOutcome {
        text,
        cached: false,
        cache_age_seconds: None,
    }
}

/// Provider de génération HTTP (API chat completions compatible OpenAI).
/// Le timeout est porté par le client reqwest : un provider lent ne peut
/// pas retenir l'ingestion ni les requêtes de lecture.
pub struct OpenAiQuoteProvider {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl OpenAiQuoteProvider {
    pub fn new(
        api_key: String,
        api_url: String,
        model: String,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_url,
            model,
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl QuoteProvider for OpenAiQuoteProvider {
    async fn generate(&self, digest: &str) -> Result<String, QuoteError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 120,
            "messages": [
                {
                    "role": "system",
                    "content": "You write a single short, witty status line for a homelab machine, \
                                spoken in the first person by the machine itself. One sentence, \
                                no surrounding quotes.",
                },
                { "role": "user", "content": digest },
            ],
        });
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let completion: ChatCompletion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(QuoteError::EmptyCompletion)
    }
}
