//! Number normalization for mixed-locale signal text.
//!
//! Signal authors write prices as `112.191`, `50,5`, `113,500`, `52k` or
//! `112 bin` interchangeably. Normalization resolves the separator
//! ambiguity with one rule: a comma followed by exactly 1-2 digits at the
//! end of a token is a decimal separator, 3 or more digits a thousands
//! separator. Magnitude suffixes (`k`, `kilo`, Turkish `bin`) multiply by
//! 1000.

use once_cell::sync::Lazy;
use regex::Regex;

/// Numeric token with optional magnitude suffix.
#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+(?:[.,]\d+)*(?:\s*(?:k|kilo|bin))?\b")
        .expect("number pattern should compile")
});

/// Field label immediately followed by an index digit (`tp1`, `Hedef 2`).
#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static LABEL_DIGIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:tp|target|targets|hedef|sl|stop)\s*(\d{1,2})\b")
        .expect("label pattern should compile")
});

/// Relative target sequence of small percent offsets (`1-2-3`).
#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static RELATIVE_SEQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([1-9]|10)\s*[-,/]\s*([1-9]|10)\s*[-,/]\s*([1-9]|10)\b")
        .expect("relative sequence pattern should compile")
});

/// Percent-annotated target sequence (`%5-%10-%15`, `5% - 10% - 15%`).
#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static PERCENT_SEQ_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"%?\s*(\d{1,2})\s*%?\s*[-,/]\s*%?\s*(\d{1,2})\s*%?\s*[-,/]\s*%?\s*(\d{1,2})\s*%?")
        .expect("percent sequence pattern should compile")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("url pattern should compile"));

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x{1F300}-\x{1FAFF}\x{2600}-\x{27BF}\x{2190}-\x{21FF}\x{1F1E6}-\x{1F1FF}\x{FE0F}]+",
    )
    .expect("emoji pattern should compile")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#(\w+)").expect("hashtag pattern should compile"));

#[expect(clippy::expect_used, reason = "pattern is a compile-time literal")]
static SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("space pattern should compile"));

/// Normalize one numeric token to a float.
///
/// Returns `None` when the token does not parse as a number.
#[must_use]
pub fn normalize_number(raw: &str) -> Option<f64> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
        .collect();
    if compact.is_empty() {
        return None;
    }

    let lower = compact.to_lowercase();
    let (digits, multiplier) = if let Some(stripped) = lower.strip_suffix("kilo") {
        (stripped, 1000.0)
    } else if let Some(stripped) = lower.strip_suffix("bin") {
        (stripped, 1000.0)
    } else if let Some(stripped) = lower.strip_suffix('k') {
        (stripped, 1000.0)
    } else {
        (lower.as_str(), 1.0)
    };
    if digits.is_empty() {
        return None;
    }

    let normalized = normalize_separators(digits);
    normalized.parse::<f64>().ok().map(|v| v * multiplier)
}

/// Resolve comma/dot ambiguity into a plain dot-decimal string.
fn normalize_separators(token: &str) -> String {
    let has_comma = token.contains(',');
    let has_dot = token.contains('.');

    if has_comma && has_dot {
        // Whichever separator comes last is the decimal separator.
        let last_comma = token.rfind(',').unwrap_or(0);
        let last_dot = token.rfind('.').unwrap_or(0);
        if last_comma > last_dot {
            // European style: 1.234,56
            token.replace('.', "").replace(',', ".")
        } else {
            // US style: 1,234.56
            token.replace(',', "")
        }
    } else if has_comma {
        let comma_count = token.matches(',').count();
        let tail_len = token.rsplit(',').next().map_or(0, str::len);
        if comma_count == 1 && (1..=2).contains(&tail_len) {
            // Decimal: 50,5
            token.replace(',', ".")
        } else {
            // Thousands: 50,000 or 1,234,567
            token.replace(',', "")
        }
    } else {
        token.to_string()
    }
}

/// Extract and normalize all field numbers from a text window.
///
/// Label index digits (`tp1`, `Hedef 2`) are skipped, and near-zero values
/// are dropped.
#[must_use]
pub fn extract_numbers(text: &str) -> Vec<f64> {
    let label_ranges: Vec<(usize, usize)> = LABEL_DIGIT_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.end())))
        .collect();

    NUMBER_RE
        .find_iter(text)
        .filter(|m| {
            !label_ranges
                .iter()
                .any(|(start, end)| m.start() >= *start && m.start() < *end)
        })
        .filter_map(|m| normalize_number(m.as_str()))
        .filter(|v| *v >= 1e-6)
        .collect()
}

/// All numeric literals of a message, in order, without any filtering.
///
/// Used to align cached field templates with a new message's literals;
/// the list must be position-stable across messages of identical shape,
/// so nothing is skipped here.
#[must_use]
pub fn numeric_literals(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| normalize_number(m.as_str()))
        .collect()
}

/// Normalize the number at the very start of a window, if any.
///
/// Positional fallback for label-free signals (`"eth long 3500 ..."`):
/// only a number directly following the anchor counts.
#[must_use]
pub fn leading_number(text: &str) -> Option<f64> {
    let m = NUMBER_RE.find(text)?;
    if m.start() != 0 {
        return None;
    }
    normalize_number(m.as_str())
}

/// Parse a take-profit window into absolute prices.
///
/// Three formats: percent-annotated offsets (`%5-%10-%15`), bare relative
/// sequences of small integers (`1-2-3`, both need an entry price), and
/// absolute price lists.
#[must_use]
pub fn parse_target_sequence(text: &str, entry_price: Option<f64>) -> Vec<f64> {
    if let Some(entry) = entry_price {
        if text.contains('%') {
            if let Some(caps) = PERCENT_SEQ_RE.captures(text) {
                return offsets_to_prices(&caps, entry);
            }
        }
        if let Some(caps) = RELATIVE_SEQ_RE.captures(text) {
            return offsets_to_prices(&caps, entry);
        }
    }

    extract_numbers(text)
}

fn offsets_to_prices(caps: &regex::Captures, entry: f64) -> Vec<f64> {
    (1..=3)
        .filter_map(|i| caps.get(i))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .map(|offset| entry * (1.0 + offset / 100.0))
        .collect()
}

/// Strip noise (URLs, emoji, hashtag markers) and collapse spacing.
///
/// Newlines are preserved: line boundaries delimit field windows in
/// multi-line signals.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let without_urls = URL_RE.replace_all(text, "");
    let without_emoji = EMOJI_RE.replace_all(&without_urls, " ");
    let without_hashtags = HASHTAG_RE.replace_all(&without_emoji, "$1");
    let collapsed = SPACE_RE.replace_all(&without_hashtags, " ");

    collapsed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn comma_rule_disambiguation() {
        // 3+ digits after the comma: thousands separator.
        assert_close(normalize_number("50,000").unwrap_or(0.0), 50000.0);
        // 1-2 digits after the comma: decimal separator.
        assert_close(normalize_number("50,5").unwrap_or(0.0), 50.5);
        assert_close(normalize_number("0,18").unwrap_or(0.0), 0.18);
        assert_close(normalize_number("1,234,567").unwrap_or(0.0), 1_234_567.0);
    }

    #[test]
    fn magnitude_suffixes() {
        assert_close(normalize_number("52k").unwrap_or(0.0), 52000.0);
        assert_close(normalize_number("52 K").unwrap_or(0.0), 52000.0);
        assert_close(normalize_number("112bin").unwrap_or(0.0), 112_000.0);
        assert_close(normalize_number("112 bin").unwrap_or(0.0), 112_000.0);
        assert_close(normalize_number("112kilo").unwrap_or(0.0), 112_000.0);
        assert_close(normalize_number("112,5k").unwrap_or(0.0), 112_500.0);
    }

    #[test]
    fn mixed_separator_styles() {
        assert_close(normalize_number("1,234.56").unwrap_or(0.0), 1234.56);
        assert_close(normalize_number("1.234,56").unwrap_or(0.0), 1234.56);
        assert_close(normalize_number("112.191").unwrap_or(0.0), 112.191);
    }

    #[test]
    fn garbage_tokens_rejected() {
        assert_eq!(normalize_number(""), None);
        assert_eq!(normalize_number("k"), None);
        assert_eq!(normalize_number("abc"), None);
    }

    #[test]
    fn list_extraction_with_suffixes() {
        let numbers = extract_numbers("113k-114k-115k");
        assert_eq!(numbers, vec![113_000.0, 114_000.0, 115_000.0]);
    }

    #[test]
    fn list_extraction_skips_label_digits() {
        let numbers = extract_numbers("tp1: 114k tp2: 116k");
        assert_eq!(numbers, vec![114_000.0, 116_000.0]);

        let numbers = extract_numbers("Target 1 - 0.19076");
        assert_eq!(numbers, vec![0.19076]);
    }

    #[test]
    fn list_extraction_comma_thousands() {
        let numbers = extract_numbers("113,500 - 114,000 - 115,000");
        assert_eq!(numbers, vec![113_500.0, 114_000.0, 115_000.0]);
    }

    #[test]
    fn numeric_literals_keep_everything() {
        // Label digits stay in place so template positions line up.
        let literals = numeric_literals("Target 1 - 0.19076 Stop 0.17926");
        assert_eq!(literals, vec![1.0, 0.19076, 0.17926]);
    }

    #[test]
    fn leading_number_must_start_the_window() {
        assert_eq!(leading_number("3500 tp 3600"), Some(3500.0));
        assert_eq!(leading_number("112k sl 100k"), Some(112_000.0));
        assert_eq!(leading_number("tp 3600"), None);
    }

    #[test]
    fn relative_target_sequence() {
        let targets = parse_target_sequence("1-2-3", Some(112_000.0));
        assert_eq!(targets.len(), 3);
        assert_close(targets[0], 113_120.0);
        assert_close(targets[1], 114_240.0);
        assert_close(targets[2], 115_360.0);
    }

    #[test]
    fn percent_target_sequence() {
        let targets = parse_target_sequence("%5 - %10 - %15", Some(1000.0));
        assert_eq!(targets.len(), 3);
        assert_close(targets[0], 1050.0);
        assert_close(targets[1], 1100.0);
        assert_close(targets[2], 1150.0);
    }

    #[test]
    fn absolute_targets_pass_through() {
        let targets = parse_target_sequence("113k-114k-115k", None);
        assert_eq!(targets, vec![113_000.0, 114_000.0, 115_000.0]);
    }

    #[test]
    fn clean_text_strips_noise() {
        let cleaned = clean_text("🟢 LONG #btc https://t.me/x  entry 100");
        assert_eq!(cleaned, "LONG btc entry 100");
    }

    #[test]
    fn clean_text_preserves_newlines() {
        let cleaned = clean_text("BTCUSDT LONG\n  Entry: 100\n\nSL: 90");
        assert_eq!(cleaned, "BTCUSDT LONG\nEntry: 100\nSL: 90");
    }
}
