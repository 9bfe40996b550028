//! Tier orchestration for one message at a time.
//!
//! The router runs the three-tier flow: structural cache lookup, rule
//! extraction, optional heavy fallback. Terminal states always emit exactly
//! one [`ParsedSignal`]; external failures degrade to the next-best tier
//! and are never fatal. Learning (cache `record`) happens as a side effect
//! of sufficiently confident rule/fallback results, while fast-path reuse
//! refreshes recency via `touch`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use sigil_cache::{CacheEntry, FieldTemplate, PatternCache};
use sigil_core::{
    ExtractionPath, FallbackCandidate, FallbackExtractor, FallbackOutcome, ParsedSignal,
    RawMessage,
};
use sigil_extract::{
    BuildError, FingerprintExtractor, Language, RawFields, SymbolicExtractor, numeric_literals,
};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Router thresholds and the fallback deadline.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub fast_path_threshold: f64,
    pub learn_threshold: f64,
    pub fallback_threshold: f64,
    pub fallback_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fast_path_threshold: 0.7,
            learn_threshold: 0.6,
            fallback_threshold: 0.85,
            fallback_timeout: Duration::from_millis(4000),
        }
    }
}

/// Per-router tier counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub fast_hits: u64,
    pub symbolic_runs: u64,
    pub fallback_runs: u64,
}

/// The three-tier parsing pipeline.
///
/// The cache is injected, not owned as a global: worker tasks share one
/// instance through an [`Arc`] while tests spin up isolated ones.
pub struct Router {
    cache: Arc<PatternCache>,
    fingerprinter: FingerprintExtractor,
    extractor: SymbolicExtractor,
    fallback: Option<Arc<dyn FallbackExtractor>>,
    config: RouterConfig,
    fast_hits: AtomicU64,
    symbolic_runs: AtomicU64,
    fallback_runs: AtomicU64,
}

impl Router {
    #[must_use]
    pub fn new(
        cache: Arc<PatternCache>,
        fingerprinter: FingerprintExtractor,
        extractor: SymbolicExtractor,
        config: RouterConfig,
    ) -> Self {
        Self {
            cache,
            fingerprinter,
            extractor,
            fallback: None,
            config,
            fast_hits: AtomicU64::new(0),
            symbolic_runs: AtomicU64::new(0),
            fallback_runs: AtomicU64::new(0),
        }
    }

    /// Build a router over the default vocabularies.
    ///
    /// # Errors
    /// Returns an error if the built-in keyword fragments fail to compile.
    pub fn with_defaults(cache: Arc<PatternCache>, config: RouterConfig) -> Result<Self, BuildError> {
        Ok(Self::new(
            cache,
            FingerprintExtractor::with_defaults()?,
            SymbolicExtractor::with_defaults()?,
            config,
        ))
    }

    /// Attach the heavy extraction tier.
    #[must_use]
    pub fn with_fallback(mut self, provider: Arc<dyn FallbackExtractor>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Swap the symbolic extractor (e.g. to wire a validator or policy).
    #[must_use]
    pub fn with_extractor(mut self, extractor: SymbolicExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            symbolic_runs: self.symbolic_runs.load(Ordering::Relaxed),
            fallback_runs: self.fallback_runs.load(Ordering::Relaxed),
        }
    }

    /// Parse one message through the tiers. Always returns a signal.
    pub async fn process(&self, message: &RawMessage) -> ParsedSignal {
        let (fingerprint, hash) = self.fingerprinter.fingerprint(&message.text);

        let mut symbol_hint = None;
        if let Some(entry) = self.cache.lookup(&hash) {
            if entry.confidence >= self.config.fast_path_threshold {
                if let Some(signal) = self.replay(&message.text, &entry) {
                    self.fast_hits.fetch_add(1, Ordering::Relaxed);
                    self.cache.touch(&hash, Utc::now());
                    debug!(
                        source = %message.source_id,
                        symbol = %entry.symbol,
                        "fast path hit"
                    );
                    return signal;
                }
                warn!("cached template no longer fits message shape, reparsing");
            }
            // Below the fast-path bar the entry still carries a useful hint.
            symbol_hint = Some(entry.symbol);
        }

        self.symbolic_runs.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .extractor
            .extract_with_hint(&message.text, symbol_hint.as_deref())
            .await;

        let confident = outcome.signal.confidence >= self.config.fallback_threshold;
        if confident || self.fallback.is_none() {
            self.learn(&hash, &outcome.signal, &outcome.raw, fingerprint.language, &message.text);
            return outcome.signal;
        }

        self.run_fallback(
            &message.text,
            outcome.signal,
            &outcome.raw,
            fingerprint.language,
            &hash,
        )
        .await
    }

    /// Heavy tier with a hard deadline; any failure degrades to the
    /// symbolic result.
    async fn run_fallback(
        &self,
        text: &str,
        mut symbolic: ParsedSignal,
        symbolic_raw: &RawFields,
        language: Language,
        hash: &str,
    ) -> ParsedSignal {
        let Some(provider) = &self.fallback else {
            return symbolic;
        };
        self.fallback_runs.fetch_add(1, Ordering::Relaxed);

        let note = match timeout(self.config.fallback_timeout, provider.extract(text)).await {
            Ok(Ok(FallbackOutcome::Signal(candidate))) => {
                let signal = Self::candidate_to_signal(candidate, provider.name());
                let raw = RawFields {
                    entries: signal.entries.clone(),
                    targets: signal.take_profits.clone(),
                    stop: signal.stop_loss,
                    leverage: signal.leverage,
                };
                self.learn(hash, &signal, &raw, language, text);
                return signal;
            }
            Ok(Ok(FallbackOutcome::NoSignal)) => {
                format!("fallback provider {} reported no signal", provider.name())
            }
            Ok(Err(e)) => {
                warn!("fallback provider failed: {e}");
                format!("fallback provider {} unavailable", provider.name())
            }
            Err(_) => {
                warn!(
                    "fallback provider timed out after {:?}",
                    self.config.fallback_timeout
                );
                format!("fallback provider {} timed out", provider.name())
            }
        };

        symbolic.notes.push(note);
        self.learn(hash, &symbolic, symbolic_raw, language, text);
        symbolic
    }

    /// Re-extract this message's literals and assign them through the
    /// cached field template. Cached values are shape references only;
    /// nothing is replayed verbatim.
    fn replay(&self, text: &str, entry: &CacheEntry) -> Option<ParsedSignal> {
        let literals = numeric_literals(text);
        if entry
            .template
            .max_position()
            .is_some_and(|max| max >= literals.len())
        {
            return None;
        }

        let template = &entry.template;
        let mut entries: Vec<f64> = template
            .entry_positions
            .iter()
            .map(|&i| literals[i])
            .collect();
        if entries.len() == 2 {
            entries = vec![(entries[0] + entries[1]) / 2.0];
        }

        let mut signal = ParsedSignal::empty(ExtractionPath::Fast);
        signal.symbol = Some(entry.symbol.clone());
        signal.direction = self.extractor.direction_of(text);
        signal.entries = entries;
        signal.take_profits = template
            .target_positions
            .iter()
            .map(|&i| literals[i])
            .collect();
        signal.stop_loss = template.stop_position.map(|i| literals[i]);
        signal.leverage = template
            .leverage_position
            .map(|i| literals[i].round() as u32)
            .or_else(|| SymbolicExtractor::leverage_of(text));
        signal.confidence = entry.confidence.min(1.0);
        signal.notes.push(format!(
            "fast path: shape seen {} time(s), cache confidence {:.2}",
            entry.success_count, entry.confidence
        ));
        Some(signal)
    }

    fn candidate_to_signal(candidate: FallbackCandidate, provider: &str) -> ParsedSignal {
        let mut signal = ParsedSignal::empty(ExtractionPath::Fallback);
        signal.symbol = candidate.symbol;
        signal.direction = candidate.direction;
        signal.entries = candidate.entries;
        signal.take_profits = candidate.take_profits;
        signal.stop_loss = candidate.stop_loss;
        signal.leverage = candidate.leverage;
        signal.confidence = candidate.confidence.clamp(0.0, 1.0);
        signal.notes.push(format!("extracted by {provider}"));
        signal
    }

    /// Cache-learning side effect for rule/fallback results.
    fn learn(
        &self,
        hash: &str,
        signal: &ParsedSignal,
        raw: &RawFields,
        language: Language,
        text: &str,
    ) {
        if signal.confidence < self.config.learn_threshold {
            return;
        }
        let Some(symbol) = &signal.symbol else {
            return;
        };

        let literals = numeric_literals(text);
        let template = build_template(raw, &literals);
        self.cache
            .record(hash, symbol, template, language.as_str(), Utc::now());
    }
}

/// Map extracted field values onto positions in the literal sequence.
///
/// Values that do not appear literally (e.g. percent-derived targets) are
/// simply not templated; the fast path then reproduces only the positional
/// fields.
fn build_template(raw: &RawFields, literals: &[f64]) -> FieldTemplate {
    let mut used = vec![false; literals.len()];

    let mut claim = |value: f64, used: &mut [bool]| -> Option<usize> {
        for (i, lit) in literals.iter().enumerate() {
            if !used[i] && approx_eq(*lit, value) {
                used[i] = true;
                return Some(i);
            }
        }
        None
    };

    let entry_positions = raw
        .entries
        .iter()
        .filter_map(|v| claim(*v, &mut used))
        .collect();
    let target_positions = raw
        .targets
        .iter()
        .filter_map(|v| claim(*v, &mut used))
        .collect();
    let stop_position = raw.stop.and_then(|v| claim(v, &mut used));
    let leverage_position = raw
        .leverage
        .and_then(|v| claim(f64::from(v), &mut used));

    FieldTemplate {
        entry_positions,
        target_positions,
        stop_position,
        leverage_position,
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_maps_values_to_literal_positions() {
        let raw = RawFields {
            entries: vec![0.18869, 0.18925],
            targets: vec![0.19076],
            stop: Some(0.17926),
            leverage: None,
        };
        // Literal "1" is the target label index in the message.
        let literals = vec![0.18869, 0.18925, 1.0, 0.19076, 0.17926];

        let template = build_template(&raw, &literals);
        assert_eq!(template.entry_positions, vec![0, 1]);
        assert_eq!(template.target_positions, vec![3]);
        assert_eq!(template.stop_position, Some(4));
        assert_eq!(template.leverage_position, None);
    }

    #[test]
    fn duplicate_values_claim_distinct_positions() {
        let raw = RawFields {
            entries: vec![100.0],
            targets: vec![100.0],
            stop: None,
            leverage: None,
        };
        let literals = vec![100.0, 100.0];

        let template = build_template(&raw, &literals);
        assert_eq!(template.entry_positions, vec![0]);
        assert_eq!(template.target_positions, vec![1]);
    }

    #[test]
    fn derived_values_are_left_untemplated() {
        // Percent-expanded targets do not appear among the literals.
        let raw = RawFields {
            entries: vec![3500.0],
            targets: vec![3535.0, 3570.0, 3605.0],
            stop: Some(3400.0),
            leverage: Some(20),
        };
        let literals = vec![3500.0, 1.0, 2.0, 3.0, 3400.0, 20.0];

        let template = build_template(&raw, &literals);
        assert_eq!(template.entry_positions, vec![0]);
        assert!(template.target_positions.is_empty());
        assert_eq!(template.stop_position, Some(4));
        assert_eq!(template.leverage_position, Some(5));
    }
}
