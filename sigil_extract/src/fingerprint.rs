//! Structural fingerprinting of raw signal text.
//!
//! A fingerprint captures the *shape* of a message — which field markers
//! it carries, how many numbers it contains and where, its format and
//! language — while masking every literal numeric value. Two messages that
//! differ only in their numbers produce the same structural hash, which is
//! what makes the pattern cache work.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sigil_core::structural_hash;

use crate::vocabulary::{BuildError, Language, MarkerCategory, VocabularyTable};

/// Placeholder substituted for every numeric literal before hashing.
/// Uppercase on purpose: the text is lowercased first, so the token
/// cannot collide with message content.
const NUMBER_PLACEHOLDER: &str = "NUM";

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+(?:[.,]\d+)*").expect("number pattern should compile")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static LEVERAGE_X_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}\s*x\b").expect("leverage pattern should compile")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static NUMBERED_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:tp|hedef|target)\s*\d+\s*[:.\-]")
        .expect("numbered label pattern should compile")
});

/// Where the entry marker sits within the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryPosition {
    Start,
    Middle,
    End,
    #[default]
    Absent,
}

impl EntryPosition {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Middle => "middle",
            Self::End => "end",
            Self::Absent => "absent",
        }
    }
}

/// Overall message layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    SingleLine,
    MultiLine,
    Labeled,
}

impl MessageFormat {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::SingleLine => "single_line",
            Self::MultiLine => "multi_line",
            Self::Labeled => "labeled",
        }
    }
}

/// Where the instrument symbol appears relative to surrounding tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SymbolContext {
    FirstToken,
    AfterHash,
    AfterColon,
    #[default]
    Unknown,
}

impl SymbolContext {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::FirstToken => "first_token",
            Self::AfterHash => "after_hash",
            Self::AfterColon => "after_colon",
            Self::Unknown => "unknown",
        }
    }
}

/// Structural characteristics of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub has_entry_marker: bool,
    pub has_target_marker: bool,
    pub has_stop_marker: bool,
    pub has_leverage_marker: bool,
    pub numeric_token_count: usize,
    pub entry_position: EntryPosition,
    pub format: MessageFormat,
    pub language: Language,
    pub symbol_context: SymbolContext,
}

/// Derives fingerprints and structural hashes from raw text.
#[derive(Debug, Clone)]
pub struct FingerprintExtractor {
    vocab: VocabularyTable,
}

impl FingerprintExtractor {
    #[must_use]
    pub const fn new(vocab: VocabularyTable) -> Self {
        Self { vocab }
    }

    /// Build an extractor over the default vocabularies.
    ///
    /// # Errors
    /// Returns an error if the built-in keyword fragments fail to compile.
    pub fn with_defaults() -> Result<Self, BuildError> {
        Ok(Self::new(VocabularyTable::with_defaults()?))
    }

    /// Compute the fingerprint and structural hash for a message.
    ///
    /// Pure and infallible: malformed or empty text yields a valid empty
    /// fingerprint rather than an error.
    #[must_use]
    pub fn fingerprint(&self, text: &str) -> (Fingerprint, String) {
        let lower = text.to_lowercase();

        let has_entry_marker = self.vocab.has_marker(MarkerCategory::Entry, &lower);
        let has_target_marker = self.vocab.has_marker(MarkerCategory::Target, &lower);
        let has_stop_marker = self.vocab.has_marker(MarkerCategory::Stop, &lower);
        let has_leverage_marker = self.vocab.has_marker(MarkerCategory::Leverage, &lower)
            || LEVERAGE_X_RE.is_match(&lower);

        let numeric_token_count = NUMBER_RE.find_iter(&lower).count();
        let entry_position = Self::entry_position(&self.vocab, &lower);
        let format = Self::format(&lower);
        let language = self.vocab.classify_language(&lower);
        let symbol_context = Self::symbol_context(&lower);

        let fingerprint = Fingerprint {
            has_entry_marker,
            has_target_marker,
            has_stop_marker,
            has_leverage_marker,
            numeric_token_count,
            entry_position,
            format,
            language,
            symbol_context,
        };

        let hash = Self::hash(&fingerprint, &lower);
        (fingerprint, hash)
    }

    fn entry_position(vocab: &VocabularyTable, lower: &str) -> EntryPosition {
        let Some((start, _)) = vocab.find_marker(MarkerCategory::Entry, lower) else {
            return EntryPosition::Absent;
        };
        let relative = start as f64 / lower.len().max(1) as f64;
        if relative < 0.3 {
            EntryPosition::Start
        } else if relative < 0.7 {
            EntryPosition::Middle
        } else {
            EntryPosition::End
        }
    }

    fn format(lower: &str) -> MessageFormat {
        if NUMBERED_LABEL_RE.is_match(lower) {
            MessageFormat::Labeled
        } else if lower.contains('\n') {
            MessageFormat::MultiLine
        } else {
            MessageFormat::SingleLine
        }
    }

    fn symbol_context(lower: &str) -> SymbolContext {
        let trimmed = lower.trim_start();
        if trimmed.starts_with('#') {
            return SymbolContext::AfterHash;
        }
        if trimmed
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic())
        {
            return SymbolContext::FirstToken;
        }
        let after_colon = trimmed
            .split(':')
            .skip(1)
            .any(|rest| rest.trim_start().starts_with(|c: char| c.is_alphabetic()));
        if after_colon {
            return SymbolContext::AfterColon;
        }
        SymbolContext::Unknown
    }

    /// Hash the categorical fields plus the number-masked token stream.
    /// Literal numeric values never reach the hasher.
    fn hash(fingerprint: &Fingerprint, lower: &str) -> String {
        let shape = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            fingerprint.has_entry_marker,
            fingerprint.has_target_marker,
            fingerprint.has_stop_marker,
            fingerprint.has_leverage_marker,
            fingerprint.numeric_token_count,
            fingerprint.entry_position.as_str(),
            fingerprint.format.as_str(),
            fingerprint.language.as_str(),
            fingerprint.symbol_context.as_str(),
        );

        let masked = NUMBER_RE.replace_all(lower, NUMBER_PLACEHOLDER);
        let tokens: Vec<&str> = masked
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        structural_hash(&shape, &tokens.join(" "))
    }
}
