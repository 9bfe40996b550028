//! Rule-based signal extraction.
//!
//! The symbolic tier turns message text into a [`ParsedSignal`] using
//! vocabulary-anchored field windows with positional fallbacks. It is
//! deterministic; the only external call is the optional instrument
//! validation hook, which is skipped entirely on the fast path.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sigil_core::{Direction, ExtractionPath, ParsedSignal, SymbolValidator, ValidationPolicy};
use tracing::warn;

use crate::numbers::{self, clean_text};
use crate::vocabulary::{BuildError, MarkerCategory, VocabularyTable};

const MAX_LEVERAGE: u32 = 125;
const MIN_TOKEN_LEN: usize = 3;
const MAX_BASE_LEN: usize = 10;

/// Quote suffixes recognized when normalizing a pair symbol.
/// Longest first so `USDT` wins over `USD`.
const QUOTE_SUFFIXES: [&str; 6] = ["USDT", "USDC", "BUSD", "TUSD", "USD", "DAI"];

/// Tokens that look like symbols but never are: trading vocabulary,
/// quote currencies, asset full names (usually misspellings of the ticker
/// author's intent), exchange brands and channel marketing noise.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // quote currencies
        "usdt", "usd", "busd", "usdc", "tusd", "dai",
        // trading keywords, both vocabularies
        "entry", "entries", "long", "short", "buy", "sell", "stop", "loss",
        "take", "profit", "target", "targets", "lev", "leverage", "cross",
        "isolated", "giris", "giriş", "alim", "alım", "sat", "satis",
        "satış", "kisa", "kısa", "hedef", "hedefler", "zarar", "durdur",
        "kaldirac", "kaldıraç",
        // major asset full names
        "bitcoin", "ethereum", "solana", "cardano", "ripple", "polkadot",
        "dogecoin", "shiba", "avalanche", "binancecoin",
        // exchange brands
        "binance", "mexc", "kucoin", "bybit", "okx", "kraken", "coinbase",
        "huobi", "gateio", "bitget",
        // marketing noise
        "signal", "signals", "sinyal", "pump", "moon", "rocket", "gem",
        "gems", "group", "channel", "vip", "free", "join",
        // market terms
        "market", "markets", "trading", "trader", "trade", "trend", "order",
        "orders", "limit", "swing", "spot", "futures", "coin",
        // common words
        "the", "and", "for", "with", "this", "that", "from", "have", "what",
        "when", "new", "next", "top", "hot", "going", "coming", "our", "you",
        "are", "all", "now", "get", "will", "can", "more", "here", "today",
    ]
    .into_iter()
    .collect()
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static LEVERAGE_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:lev|leverage|kaldıraç|kaldirac)\s*:?\s*(\d{1,3})\b")
        .expect("leverage keyword pattern should compile")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static LEVERAGE_X_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})\s*x\b").expect("leverage multiplier pattern should compile")
});

/// Field values before output shaping (entry ranges unaveraged).
///
/// The router matches these against the message's numeric literals when
/// building a cache template.
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    pub entries: Vec<f64>,
    pub targets: Vec<f64>,
    pub stop: Option<f64>,
    pub leverage: Option<u32>,
}

/// A symbolic extraction result: the outgoing signal plus raw fields.
#[derive(Debug, Clone)]
pub struct SymbolicOutcome {
    pub signal: ParsedSignal,
    pub raw: RawFields,
}

/// The deterministic rule tier.
pub struct SymbolicExtractor {
    vocab: VocabularyTable,
    validator: Option<Arc<dyn SymbolValidator>>,
    policy: ValidationPolicy,
}

impl SymbolicExtractor {
    #[must_use]
    pub const fn new(vocab: VocabularyTable, policy: ValidationPolicy) -> Self {
        Self {
            vocab,
            validator: None,
            policy,
        }
    }

    /// Build an extractor over the default vocabularies.
    ///
    /// # Errors
    /// Returns an error if the built-in keyword fragments fail to compile.
    pub fn with_defaults() -> Result<Self, BuildError> {
        Ok(Self::new(
            VocabularyTable::with_defaults()?,
            ValidationPolicy::default(),
        ))
    }

    /// Attach an instrument validation collaborator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SymbolValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub async fn extract(&self, text: &str) -> SymbolicOutcome {
        self.extract_with_hint(text, None).await
    }

    /// Extract with an optional symbol hint from a sub-threshold cache hit.
    pub async fn extract_with_hint(
        &self,
        text: &str,
        symbol_hint: Option<&str>,
    ) -> SymbolicOutcome {
        let cleaned = clean_text(text);
        let mut signal = ParsedSignal::empty(ExtractionPath::Symbolic);

        signal.direction = self.detect_direction(&cleaned);
        signal.symbol = self.extract_symbol(&cleaned, &mut signal.notes).await;
        if signal.symbol.is_none() {
            if let Some(hint) = symbol_hint {
                signal.notes.push(format!("symbol {hint} taken from cache hint"));
                signal.symbol = Some(hint.to_string());
            }
        }

        let leverage = Self::extract_leverage(&cleaned);
        let raw_entries = self.extract_entries(&cleaned, signal.direction);
        let mut entries = raw_entries.clone();
        if entries.len() == 2 {
            // A two-value entry is a range; average it.
            entries = vec![(entries[0] + entries[1]) / 2.0];
        }

        let mut targets = self.extract_targets(&cleaned, entries.first().copied());
        let mut stop = self.extract_stop(&cleaned);

        let penalty = self.apply_validation(
            signal.direction,
            entries.first().copied(),
            &mut targets,
            &mut stop,
            &mut signal.notes,
        );

        if signal.symbol.is_none() {
            signal.notes.push("no instrument symbol detected".to_string());
        }
        if entries.is_empty() {
            signal.notes.push("no entry price detected".to_string());
        }

        let mut confidence = Self::additive_confidence(
            signal.symbol.is_some(),
            signal.direction != Direction::Unknown,
            !entries.is_empty(),
            !targets.is_empty(),
            stop.is_some(),
        ) - penalty;

        // Without an instrument there is nothing to trade; with neither
        // instrument nor direction this is not a signal at all.
        if signal.symbol.is_none() {
            confidence = if signal.direction == Direction::Unknown {
                0.0
            } else {
                confidence.min(0.2)
            };
        }

        signal.entries = entries;
        signal.take_profits = targets.clone();
        signal.stop_loss = stop;
        signal.leverage = leverage;
        signal.confidence = confidence.clamp(0.0, 1.0);

        SymbolicOutcome {
            signal,
            raw: RawFields {
                entries: raw_entries,
                targets,
                stop,
                leverage,
            },
        }
    }

    /// Direction keyword check against raw text. Cheap enough for the fast
    /// path, which re-reads direction instead of trusting the cache.
    #[must_use]
    pub fn direction_of(&self, text: &str) -> Direction {
        self.detect_direction(&clean_text(text))
    }

    /// Leverage token check against raw text, for the same fast-path use.
    #[must_use]
    pub fn leverage_of(text: &str) -> Option<u32> {
        Self::extract_leverage(&clean_text(text))
    }

    fn detect_direction(&self, cleaned: &str) -> Direction {
        if self.vocab.has_marker(MarkerCategory::Long, cleaned) {
            Direction::Long
        } else if self.vocab.has_marker(MarkerCategory::Short, cleaned) {
            Direction::Short
        } else {
            Direction::Unknown
        }
    }

    async fn extract_symbol(&self, cleaned: &str, notes: &mut Vec<String>) -> Option<String> {
        let candidate = cleaned
            .split(|c: char| c.is_whitespace() || c == '/' || c == '-' || c == '|')
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|token| token.len() >= MIN_TOKEN_LEN)
            .filter(|token| token.chars().all(|c| c.is_ascii_alphabetic()))
            .find_map(|token| {
                let upper = token.to_uppercase();
                let base = strip_quote_suffix(&upper).to_string();
                if base.is_empty()
                    || base.len() > MAX_BASE_LEN
                    || STOP_WORDS.contains(base.to_lowercase().as_str())
                {
                    return None;
                }
                Some((upper, base))
            })?;

        let (upper, base) = candidate;
        if let Some(validator) = &self.validator {
            match validator.is_valid_instrument(&base).await {
                Ok(true) => {}
                Ok(false) => {
                    notes.push(format!("instrument not recognized by venue: {base}"));
                    return None;
                }
                Err(e) => {
                    warn!("symbol validation unavailable: {e}");
                    notes.push(format!("symbol accepted without validation: {base}"));
                }
            }
        }

        let pair = if QUOTE_SUFFIXES.iter().any(|s| upper.ends_with(s)) {
            upper
        } else {
            format!("{base}USDT")
        };
        Some(pair)
    }

    fn extract_leverage(cleaned: &str) -> Option<u32> {
        let raw = LEVERAGE_KEYWORD_RE
            .captures(cleaned)
            .or_else(|| LEVERAGE_X_RE.captures(cleaned))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())?;

        (1..=MAX_LEVERAGE).contains(&raw).then_some(raw)
    }

    fn extract_entries(&self, cleaned: &str, direction: Direction) -> Vec<f64> {
        if let Some(window) = self.field_window(
            cleaned,
            MarkerCategory::Entry,
            &[
                MarkerCategory::Target,
                MarkerCategory::Stop,
                MarkerCategory::Leverage,
            ],
        ) {
            let found = numbers::extract_numbers(window);
            if !found.is_empty() {
                return found;
            }
        }

        // Positional fallback: a price directly after the direction keyword.
        let side = match direction {
            Direction::Long => MarkerCategory::Long,
            Direction::Short => MarkerCategory::Short,
            Direction::Unknown => return Vec::new(),
        };
        self.vocab
            .find_marker(side, cleaned)
            .and_then(|(_, end)| {
                let rest = cleaned[end..].trim_start_matches([' ', '\t', ':', '@']);
                numbers::leading_number(rest)
            })
            .map_or_else(Vec::new, |value| vec![value])
    }

    fn extract_targets(&self, cleaned: &str, entry: Option<f64>) -> Vec<f64> {
        self.spanning_window(
            cleaned,
            MarkerCategory::Target,
            &[
                MarkerCategory::Stop,
                MarkerCategory::Entry,
                MarkerCategory::Leverage,
            ],
        )
        .map_or_else(Vec::new, |window| {
            numbers::parse_target_sequence(window, entry)
        })
    }

    fn extract_stop(&self, cleaned: &str) -> Option<f64> {
        let window = self.field_window(
            cleaned,
            MarkerCategory::Stop,
            &[
                MarkerCategory::Target,
                MarkerCategory::Entry,
                MarkerCategory::Leverage,
            ],
        )?;
        numbers::extract_numbers(window).first().copied()
    }

    /// Text window after a field anchor, ending at the next newline or the
    /// next marker of a different category, whichever comes first.
    fn field_window<'a>(
        &self,
        cleaned: &'a str,
        category: MarkerCategory,
        boundaries: &[MarkerCategory],
    ) -> Option<&'a str> {
        let rest = self.anchor_rest(cleaned, category)?;
        let newline = rest.find('\n');
        let marker = self.vocab.earliest_marker(boundaries, rest);
        let cut = match (newline, marker) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => rest.len(),
        };
        Some(&rest[..cut])
    }

    /// Window variant for target lists, which often span lines: cut at the
    /// next boundary marker wherever it is, else keep at most two lines.
    fn spanning_window<'a>(
        &self,
        cleaned: &'a str,
        category: MarkerCategory,
        boundaries: &[MarkerCategory],
    ) -> Option<&'a str> {
        let rest = self.anchor_rest(cleaned, category)?;
        let cut = self.vocab.earliest_marker(boundaries, rest).unwrap_or_else(|| {
            rest.match_indices('\n')
                .nth(1)
                .map_or(rest.len(), |(idx, _)| idx)
        });
        Some(&rest[..cut])
    }

    fn anchor_rest<'a>(&self, cleaned: &'a str, category: MarkerCategory) -> Option<&'a str> {
        let (_, end) = self.vocab.find_marker(category, cleaned)?;
        Some(cleaned[end..].trim_start_matches([' ', '\t', ':', '.', '-', '=']))
    }

    fn apply_validation(
        &self,
        direction: Direction,
        entry: Option<f64>,
        targets: &mut Vec<f64>,
        stop: &mut Option<f64>,
        notes: &mut Vec<String>,
    ) -> f64 {
        let (Some(entry), true) = (entry, direction != Direction::Unknown) else {
            return 0.0;
        };

        let stop_inverted = stop.is_some_and(|s| match direction {
            Direction::Long => s >= entry,
            Direction::Short => s <= entry,
            Direction::Unknown => false,
        });
        let target_inverted = |t: f64| match direction {
            Direction::Long => t <= entry,
            Direction::Short => t >= entry,
            Direction::Unknown => false,
        };
        let bad_targets = targets.iter().filter(|t| target_inverted(**t)).count();

        match self.policy {
            ValidationPolicy::Penalize => {
                let mut violations = 0u32;
                if stop_inverted {
                    notes.push(format!(
                        "stop-loss on the wrong side of entry for {}",
                        direction.as_str()
                    ));
                    violations += 1;
                }
                if bad_targets > 0 {
                    notes.push(format!(
                        "{bad_targets} target(s) on the wrong side of entry for {}",
                        direction.as_str()
                    ));
                    violations += u32::try_from(bad_targets).unwrap_or(u32::MAX);
                }
                f64::from(violations) * 0.1
            }
            ValidationPolicy::Reject => {
                if stop_inverted {
                    notes.push("stop-loss dropped: wrong side of entry".to_string());
                    *stop = None;
                }
                if bad_targets > 0 {
                    notes.push(format!("{bad_targets} target(s) dropped: wrong side of entry"));
                    targets.retain(|t| !target_inverted(*t));
                }
                0.0
            }
        }
    }

    fn additive_confidence(
        symbol: bool,
        direction: bool,
        entry: bool,
        target: bool,
        stop: bool,
    ) -> f64 {
        let found = [symbol, direction, entry, target, stop]
            .iter()
            .filter(|f| **f)
            .count();
        (found as f64 * 0.2).min(1.0)
    }
}

fn strip_quote_suffix(upper: &str) -> &str {
    for suffix in QUOTE_SUFFIXES {
        if let Some(base) = upper.strip_suffix(suffix) {
            return base;
        }
    }
    upper
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::StaticSymbolValidator;

    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn extractor() -> SymbolicExtractor {
        SymbolicExtractor::with_defaults().expect("default extractor should build")
    }

    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn extractor_with_policy(policy: ValidationPolicy) -> SymbolicExtractor {
        let vocab = VocabularyTable::with_defaults().expect("default vocabularies should compile");
        SymbolicExtractor::new(vocab, policy)
    }

    #[tokio::test]
    async fn full_signal_scores_high() {
        let outcome = extractor()
            .extract("BTCUSDT LONG entry 50000 tp 52000 sl 48000")
            .await;
        let signal = outcome.signal;
        assert_eq!(signal.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entries, vec![50000.0]);
        assert_eq!(signal.take_profits, vec![52000.0]);
        assert_eq!(signal.stop_loss, Some(48000.0));
        assert!(signal.confidence >= 0.99);
        assert_eq!(signal.path, ExtractionPath::Symbolic);
    }

    #[tokio::test]
    async fn emoji_labeled_signal_with_entry_range() {
        let text = "🟢 LONG 💲 DOGEUSDT 📈 Entry: 0.18869 - 0.18925 \
                    🎯 Target 1 - 0.19076 🛑 Stop Loss: 0.17926";
        let outcome = extractor().extract(text).await;
        let signal = outcome.signal;
        assert_eq!(signal.symbol.as_deref(), Some("DOGEUSDT"));
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entries.len(), 1);
        assert!((signal.entries[0] - 0.18897).abs() < 1e-9);
        assert_eq!(signal.take_profits, vec![0.19076]);
        assert_eq!(signal.stop_loss, Some(0.17926));
        assert!(signal.confidence >= 0.8);
        // Raw fields keep the unaveraged range for template building.
        assert_eq!(outcome.raw.entries, vec![0.18869, 0.18925]);
    }

    #[tokio::test]
    async fn blacklisted_base_token_is_rejected() {
        let outcome = extractor().extract("TARGETSUSDT LONG entry 100").await;
        let signal = outcome.signal;
        assert_eq!(signal.symbol, None);
        assert!(signal.confidence <= 0.2);
    }

    #[tokio::test]
    async fn marketing_noise_is_no_signal() {
        let outcome = extractor().extract("join our vip group for signals").await;
        let signal = outcome.signal;
        assert_eq!(signal.symbol, None);
        assert_eq!(signal.direction, Direction::Unknown);
        assert!(signal.confidence < f64::EPSILON);
    }

    #[tokio::test]
    async fn turkish_signal_parses() {
        let outcome = extractor()
            .extract("#sol al giriş 100 hedef 105 zarar durdur 95 kaldıraç 10")
            .await;
        let signal = outcome.signal;
        assert_eq!(signal.symbol.as_deref(), Some("SOLUSDT"));
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entries, vec![100.0]);
        assert_eq!(signal.take_profits, vec![105.0]);
        assert_eq!(signal.stop_loss, Some(95.0));
        assert_eq!(signal.leverage, Some(10));
    }

    #[tokio::test]
    async fn multiline_signal_with_numbered_targets() {
        let text = "ETHUSDT SHORT\nEntry 3000\nTP1: 2900\nTP2: 2800\nSL 3100\nlev 5";
        let outcome = extractor().extract(text).await;
        let signal = outcome.signal;
        assert_eq!(signal.symbol.as_deref(), Some("ETHUSDT"));
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.entries, vec![3000.0]);
        assert_eq!(signal.take_profits, vec![2900.0, 2800.0]);
        assert_eq!(signal.stop_loss, Some(3100.0));
        assert_eq!(signal.leverage, Some(5));
    }

    #[tokio::test]
    async fn relative_targets_expand_from_entry() {
        let outcome = extractor()
            .extract("eth long 3500 tp: 1-2-3 sl 3400 leverage 20x")
            .await;
        let signal = outcome.signal;
        assert_eq!(signal.entries, vec![3500.0]);
        assert_eq!(signal.take_profits.len(), 3);
        assert!((signal.take_profits[0] - 3535.0).abs() < 1e-9);
        assert!((signal.take_profits[2] - 3605.0).abs() < 1e-9);
        assert_eq!(signal.leverage, Some(20));
    }

    #[tokio::test]
    async fn leverage_out_of_range_is_dropped() {
        let outcome = extractor().extract("BTCUSDT LONG entry 100 lev 500").await;
        assert_eq!(outcome.signal.leverage, None);
    }

    #[tokio::test]
    async fn inverted_stop_is_penalized_with_note() {
        let outcome = extractor_with_policy(ValidationPolicy::Penalize)
            .extract("BTCUSDT LONG entry 50000 tp 52000 sl 51000")
            .await;
        let signal = outcome.signal;
        assert_eq!(signal.stop_loss, Some(51000.0));
        assert!(signal.confidence < 1.0 - f64::EPSILON);
        assert!(signal.notes.iter().any(|n| n.contains("wrong side")));
    }

    #[tokio::test]
    async fn inverted_stop_is_dropped_under_reject_policy() {
        let outcome = extractor_with_policy(ValidationPolicy::Reject)
            .extract("BTCUSDT LONG entry 50000 tp 52000 sl 51000")
            .await;
        let signal = outcome.signal;
        assert_eq!(signal.stop_loss, None);
        assert!(signal.notes.iter().any(|n| n.contains("dropped")));
    }

    #[tokio::test]
    async fn validator_rejection_clears_symbol() {
        let validator = Arc::new(StaticSymbolValidator::new(["BTC", "ETH"]));
        let outcome = extractor()
            .with_validator(validator)
            .extract("FAKECOIN LONG entry 100 tp 110 sl 90")
            .await;
        assert_eq!(outcome.signal.symbol, None);
        assert!(outcome.signal.confidence <= 0.2);
    }

    #[tokio::test]
    async fn validator_accepts_known_instrument() {
        let validator = Arc::new(StaticSymbolValidator::new(["BTC"]));
        let outcome = extractor()
            .with_validator(validator)
            .extract("BTCUSDT LONG entry 50000 tp 52000 sl 48000")
            .await;
        assert_eq!(outcome.signal.symbol.as_deref(), Some("BTCUSDT"));
    }

    #[tokio::test]
    async fn cache_hint_fills_missing_symbol() {
        let outcome = extractor()
            .extract_with_hint("long entry 100 tp 110 sl 90", Some("BTCUSDT"))
            .await;
        assert_eq!(outcome.signal.symbol.as_deref(), Some("BTCUSDT"));
        assert!(outcome
            .signal
            .notes
            .iter()
            .any(|n| n.contains("cache hint")));
    }

    #[tokio::test]
    async fn direction_defaults_to_unknown() {
        let outcome = extractor().extract("BTCUSDT entry 50000 tp 52000").await;
        assert_eq!(outcome.signal.direction, Direction::Unknown);
    }
}
