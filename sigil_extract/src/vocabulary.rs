//! Keyword vocabularies for signal field markers.
//!
//! Marker matching is table-driven: each supported language contributes a
//! [`VocabularyDef`] mapping field categories to regex fragments, and the
//! whole set compiles once at startup into a [`VocabularyTable`]. Keeping
//! the table explicit and serializable lets deployments extend the keyword
//! sets from configuration instead of editing extraction code.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signal author language detected from keyword membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Tr,
    Mixed,
    #[default]
    Unknown,
}

impl Language {
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::En => "en",
            Self::Tr => "tr",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

/// The categories of marker keywords a signal can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerCategory {
    Entry,
    Target,
    Stop,
    Leverage,
    Long,
    Short,
}

/// Error type for vocabulary compilation.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid keyword pattern for {category:?}: {source}")]
    Pattern {
        category: MarkerCategory,
        #[source]
        source: regex::Error,
    },
    #[error("invalid language pattern for {language:?}: {source}")]
    LanguagePattern {
        language: Language,
        #[source]
        source: regex::Error,
    },
}

/// Keyword table for one language.
///
/// Entries are regex fragments, not literals, so label forms like `tp1`
/// can be expressed as `tp\d*` and matched as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyDef {
    pub language: Language,
    pub entry: Vec<String>,
    pub target: Vec<String>,
    pub stop: Vec<String>,
    pub leverage: Vec<String>,
    pub long: Vec<String>,
    pub short: Vec<String>,
}

impl VocabularyDef {
    #[must_use]
    pub fn fragments(&self, category: MarkerCategory) -> &[String] {
        match category {
            MarkerCategory::Entry => &self.entry,
            MarkerCategory::Target => &self.target,
            MarkerCategory::Stop => &self.stop,
            MarkerCategory::Leverage => &self.leverage,
            MarkerCategory::Long => &self.long,
            MarkerCategory::Short => &self.short,
        }
    }

    fn all_fragments(&self) -> impl Iterator<Item = &String> {
        self.entry
            .iter()
            .chain(&self.target)
            .chain(&self.stop)
            .chain(&self.leverage)
            .chain(&self.long)
            .chain(&self.short)
    }
}

/// Default vocabulary set: English and Turkish.
#[must_use]
pub fn default_vocabularies() -> Vec<VocabularyDef> {
    vec![english_vocabulary(), turkish_vocabulary()]
}

fn english_vocabulary() -> VocabularyDef {
    VocabularyDef {
        language: Language::En,
        entry: strings(&["entry", "entries", "buy"]),
        target: strings(&[r"tp\d*", r"take\s*profit", r"targets?\s*\d*", "sell"]),
        stop: strings(&[r"stop\s*loss", "stoploss", "sl", "stop"]),
        leverage: strings(&["leverage", "lev"]),
        long: strings(&["long", "buy"]),
        short: strings(&["short", "sell"]),
    }
}

fn turkish_vocabulary() -> VocabularyDef {
    VocabularyDef {
        language: Language::Tr,
        entry: strings(&["giriş", "giris", "alım", "alim"]),
        target: strings(&[r"hedef\d*", "hedefler"]),
        stop: strings(&[r"zarar\s*durdur", "zarar", "durdur"]),
        leverage: strings(&["kaldıraç", "kaldirac"]),
        long: strings(&["al", "alım", "alim", "giriş", "giris"]),
        short: strings(&["sat", "satış", "satis", "kısa", "kisa"]),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Compiled vocabulary set.
///
/// One matcher per category (all languages combined, since authors mix
/// languages within a single message) plus one matcher per language for
/// classification.
#[derive(Debug, Clone)]
pub struct VocabularyTable {
    defs: Vec<VocabularyDef>,
    category_matchers: Vec<(MarkerCategory, Regex)>,
    language_matchers: Vec<(Language, Regex)>,
}

const ALL_CATEGORIES: [MarkerCategory; 6] = [
    MarkerCategory::Entry,
    MarkerCategory::Target,
    MarkerCategory::Stop,
    MarkerCategory::Leverage,
    MarkerCategory::Long,
    MarkerCategory::Short,
];

impl VocabularyTable {
    /// Compile a vocabulary set into matchers.
    ///
    /// # Errors
    /// Returns an error if any keyword fragment is not a valid regex.
    pub fn new(defs: Vec<VocabularyDef>) -> Result<Self, BuildError> {
        let mut category_matchers = Vec::with_capacity(ALL_CATEGORIES.len());
        for category in ALL_CATEGORIES {
            let fragments: Vec<&str> = defs
                .iter()
                .flat_map(|d| d.fragments(category))
                .map(String::as_str)
                .collect();
            if fragments.is_empty() {
                continue;
            }
            let re = compile_alternation(&fragments)
                .map_err(|source| BuildError::Pattern { category, source })?;
            category_matchers.push((category, re));
        }

        let mut language_matchers = Vec::with_capacity(defs.len());
        for def in &defs {
            let fragments: Vec<&str> = def.all_fragments().map(String::as_str).collect();
            let re = compile_alternation(&fragments).map_err(|source| {
                BuildError::LanguagePattern {
                    language: def.language,
                    source,
                }
            })?;
            language_matchers.push((def.language, re));
        }

        Ok(Self {
            defs,
            category_matchers,
            language_matchers,
        })
    }

    /// Compile the default English + Turkish tables.
    ///
    /// # Errors
    /// Returns an error if the built-in fragments fail to compile.
    pub fn with_defaults() -> Result<Self, BuildError> {
        Self::new(default_vocabularies())
    }

    #[must_use]
    pub fn defs(&self) -> &[VocabularyDef] {
        &self.defs
    }

    fn matcher(&self, category: MarkerCategory) -> Option<&Regex> {
        self.category_matchers
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, re)| re)
    }

    /// Whether any keyword of the category occurs in the text.
    #[must_use]
    pub fn has_marker(&self, category: MarkerCategory, text: &str) -> bool {
        self.matcher(category).is_some_and(|re| re.is_match(text))
    }

    /// Byte range of the first keyword match for the category.
    #[must_use]
    pub fn find_marker(&self, category: MarkerCategory, text: &str) -> Option<(usize, usize)> {
        self.matcher(category)
            .and_then(|re| re.find(text))
            .map(|m| (m.start(), m.end()))
    }

    /// Start offset of the earliest keyword match among the given categories.
    #[must_use]
    pub fn earliest_marker(&self, categories: &[MarkerCategory], text: &str) -> Option<usize> {
        categories
            .iter()
            .filter_map(|c| self.find_marker(*c, text).map(|(start, _)| start))
            .min()
    }

    /// Classify the message language by keyword membership.
    #[must_use]
    pub fn classify_language(&self, text: &str) -> Language {
        let mut matched: Vec<Language> = self
            .language_matchers
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(lang, _)| *lang)
            .collect();
        matched.dedup();

        match matched.as_slice() {
            [] => Language::Unknown,
            [single] => *single,
            _ => Language::Mixed,
        }
    }
}

fn compile_alternation(fragments: &[&str]) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?i)\b(?:{})\b", fragments.join("|")))
}
