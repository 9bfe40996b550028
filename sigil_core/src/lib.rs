#![deny(
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

//! Core types and trait seams shared across the sigil workspace.
//!
//! Everything downstream of the parsing pipeline speaks in terms of these
//! types: a [`RawMessage`] comes in, a [`ParsedSignal`] goes out. The two
//! traits ([`FallbackExtractor`], [`SymbolValidator`]) are the seams where
//! external collaborators plug in.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod util;

pub use util::structural_hash;

/// A raw inbound message as delivered by the ingestion collaborator.
///
/// The pipeline never mutates this; ownership stays with the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub text: String,
    pub source_id: String,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    #[must_use]
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            received_at: Utc::now(),
        }
    }
}

/// Trade direction stated by the signal author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    #[default]
    Unknown,
}

impl Direction {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a direction keyword as emitted by external extractors
    /// (`"LONG"`, `"Buy"`, `"short"`, ...).
    #[must_use]
    pub fn from_str_lowercase(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Self::Long,
            "short" | "sell" => Self::Short,
            _ => Self::Unknown,
        }
    }
}

/// Which tier of the pipeline produced a [`ParsedSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionPath {
    Fast,
    Symbolic,
    Fallback,
}

impl ExtractionPath {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::Fast => "fast",
            Self::Symbolic => "symbolic",
            Self::Fallback => "fallback",
        }
    }
}

/// Policy for signals whose targets/stop sit on the wrong side of the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Keep the fields, lower confidence and append a note.
    #[default]
    Penalize,
    /// Drop the offending fields before scoring.
    Reject,
}

/// Structured extraction result for one message.
///
/// Created fresh per [`RawMessage`] and never mutated after it leaves the
/// router. Missing fields lower `confidence` rather than making the parse
/// an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub id: Uuid,
    pub symbol: Option<String>,
    pub direction: Direction,
    pub entries: Vec<f64>,
    pub take_profits: Vec<f64>,
    pub stop_loss: Option<f64>,
    pub leverage: Option<u32>,
    pub confidence: f64,
    pub path: ExtractionPath,
    pub notes: Vec<String>,
}

impl ParsedSignal {
    /// An empty signal (no fields, zero confidence) for the given tier.
    #[must_use]
    pub fn empty(path: ExtractionPath) -> Self {
        Self {
            id: Uuid::now_v7(),
            symbol: None,
            direction: Direction::Unknown,
            entries: Vec::new(),
            take_profits: Vec::new(),
            stop_loss: None,
            leverage: None,
            confidence: 0.0,
            path,
            notes: Vec::new(),
        }
    }

    /// Whether downstream consumers should act on this signal.
    #[must_use]
    pub fn is_actionable(&self, min_confidence: f64) -> bool {
        self.symbol.is_some() && self.confidence >= min_confidence
    }
}

/// Candidate produced by the heavy extraction tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackCandidate {
    pub symbol: Option<String>,
    pub direction: Direction,
    pub entries: Vec<f64>,
    pub take_profits: Vec<f64>,
    pub stop_loss: Option<f64>,
    pub leverage: Option<u32>,
    pub confidence: f64,
}

/// Outcome of a heavy-tier extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FallbackOutcome {
    Signal(FallbackCandidate),
    NoSignal,
}

/// The heavy extraction tier, treated as an opaque external service.
///
/// Implementations may be slow; the router bounds every call with a
/// timeout, so `extract` must be cancellation-safe.
#[async_trait]
pub trait FallbackExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> anyhow::Result<FallbackOutcome>;

    /// Human-readable provider name for notes and logs.
    fn name(&self) -> &str;
}

/// Instrument validation against an external venue's listing.
///
/// Consulted on the symbolic and fallback paths only; the fast path trusts
/// the cache. An `Err` means the collaborator is unreachable, which callers
/// treat as a degradation, not a rejection.
#[async_trait]
pub trait SymbolValidator: Send + Sync {
    async fn is_valid_instrument(&self, base_symbol: &str) -> anyhow::Result<bool>;
}

/// Validator backed by a fixed instrument set, for tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticSymbolValidator {
    instruments: HashSet<String>,
}

impl StaticSymbolValidator {
    #[must_use]
    pub fn new<I, S>(instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instruments: instruments
                .into_iter()
                .map(|s| s.into().to_uppercase())
                .collect(),
        }
    }
}

#[async_trait]
impl SymbolValidator for StaticSymbolValidator {
    async fn is_valid_instrument(&self, base_symbol: &str) -> anyhow::Result<bool> {
        Ok(self.instruments.contains(&base_symbol.to_uppercase()))
    }
}
