#![warn(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Heavy-tier extraction via an OpenAI-compatible chat endpoint.
//!
//! The provider asks the model for strict JSON and maps the reply onto a
//! [`FallbackOutcome`]. It is deliberately dumb about transport failures:
//! one quick retry, then the error propagates to the router, which owns
//! the timeout and the degradation decision.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sigil_core::{Direction, FallbackCandidate, FallbackExtractor, FallbackOutcome};
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a trading signal parser. Extract data and return ONLY valid JSON.\n\
\n\
Output format (no explanations, no markdown, just JSON):\n\
{\"symbol\": \"BTCUSDT\", \"side\": \"LONG\", \"entry\": [50000], \"tp\": [52000], \"sl\": 48000, \"leverage\": 1, \"confidence\": 0.9}\n\
\n\
If no valid signal: {\"signal\": false}\n\
\n\
Rules:\n\
- Symbol: uppercase, append USDT if missing\n\
- Side: LONG or SHORT only\n\
- Numbers: convert commas to dots\n\
- Output ONLY the JSON object";

/// Candidate schema as emitted by the model.
#[derive(Debug, Default, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    entry: Vec<f64>,
    #[serde(default)]
    tp: Vec<f64>,
    #[serde(default)]
    sl: Option<f64>,
    #[serde(default)]
    leverage: Option<u32>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Extraction provider for any OpenAI-compatible `/chat/completions` API.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatProvider {
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        info!("Creating OpenAiCompatProvider for model {model}");
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Send one request and parse the reply.
    async fn try_send(&self, text: &str) -> anyhow::Result<FallbackOutcome> {
        let request = json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": text },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing content"))?;

        parse_content(content)
    }
}

/// Parse model output into an outcome, tolerating markdown fences.
pub fn parse_content(content: &str) -> anyhow::Result<FallbackOutcome> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map_or(trimmed, |rest| rest.strip_suffix("```").unwrap_or(rest))
        .trim();

    let value: serde_json::Value = serde_json::from_str(stripped)?;
    if value.get("signal").and_then(serde_json::Value::as_bool) == Some(false) {
        return Ok(FallbackOutcome::NoSignal);
    }

    let raw: RawCandidate = serde_json::from_value(value)?;
    let direction = raw
        .side
        .as_deref()
        .map_or(Direction::Unknown, Direction::from_str_lowercase);

    Ok(FallbackOutcome::Signal(FallbackCandidate {
        symbol: raw.symbol.map(|s| s.to_uppercase()),
        direction,
        entries: raw.entry,
        take_profits: raw.tp,
        stop_loss: raw.sl,
        leverage: raw.leverage,
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
    }))
}

#[async_trait]
impl FallbackExtractor for OpenAiCompatProvider {
    async fn extract(&self, text: &str) -> anyhow::Result<FallbackOutcome> {
        match self.try_send(text).await {
            Ok(outcome) => Ok(outcome),
            Err(first) => {
                // The router holds the deadline; one quick retry is all the
                // transport-level resilience this tier gets.
                warn!("fallback extraction failed ({first}), retrying once");
                self.try_send(text).await
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}
