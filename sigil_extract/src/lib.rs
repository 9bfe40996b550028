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
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

pub mod fingerprint;
pub mod numbers;
pub mod symbolic;
pub mod vocabulary;

pub use fingerprint::{
    EntryPosition, Fingerprint, FingerprintExtractor, MessageFormat, SymbolContext,
};
pub use numbers::{
    clean_text, extract_numbers, leading_number, normalize_number, numeric_literals,
    parse_target_sequence,
};
pub use symbolic::{RawFields, SymbolicExtractor, SymbolicOutcome};
pub use vocabulary::{
    BuildError, Language, MarkerCategory, VocabularyDef, VocabularyTable, default_vocabularies,
};
