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
    clippy::cast_precision_loss
)]

//! Learned pattern cache for the fast parsing path.
//!
//! Every successful rule/fallback extraction teaches the cache a message
//! shape: structural hash, instrument, and where in the numeric-literal
//! sequence each field lives. A later message with the same shape can then
//! be parsed by position without re-running the rule tier.
//!
//! Confidence dynamics: first record 0.6, +0.05 per repeat (capped at 1.0),
//! +0.01 per fast-path reuse, multiplicative decay for entries unseen
//! beyond the staleness window. Eviction is purely recency-based.

mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use store::{CacheStore, StoreStats};

const INITIAL_CONFIDENCE: f64 = 0.6;
const REPEAT_BOOST: f64 = 0.05;
const TOUCH_BOOST: f64 = 0.01;
const WEEKLY_DECAY: f64 = 0.95;

/// Positions of each extracted field within a message's ordered
/// numeric-literal sequence.
///
/// A template is a shape reference: the fast path re-extracts the *current*
/// message's literals and assigns them by these positions. Cached values
/// are never replayed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTemplate {
    #[serde(default)]
    pub entry_positions: Vec<usize>,
    #[serde(default)]
    pub target_positions: Vec<usize>,
    #[serde(default)]
    pub stop_position: Option<usize>,
    #[serde(default)]
    pub leverage_position: Option<usize>,
}

impl FieldTemplate {
    /// Highest literal index the template refers to, if any.
    #[must_use]
    pub fn max_position(&self) -> Option<usize> {
        self.entry_positions
            .iter()
            .chain(&self.target_positions)
            .chain(&self.stop_position)
            .chain(&self.leverage_position)
            .max()
            .copied()
    }
}

/// One learned message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub structural_hash: String,
    pub symbol: String,
    pub confidence: f64,
    #[serde(default)]
    pub success_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub template: FieldTemplate,
}

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub staleness_days: i64,
    pub save_every_learns: u64,
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            staleness_days: 30,
            save_every_learns: 10,
            path: None,
        }
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub avg_confidence: f64,
}

/// Shared, learn-as-you-go pattern store.
///
/// Reads take the read lock; `record`/`touch`/eviction serialize on the
/// write lock. Hit/miss counters are atomics so `lookup` never mutates
/// entry state. The cache is an injected dependency, not a singleton, so
/// tests can run isolated instances.
pub struct PatternCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    learns: AtomicU64,
    config: CacheConfig,
}

impl PatternCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            learns: AtomicU64::new(0),
            config,
        }
    }

    /// Load the cache from its configured store, applying staleness decay.
    ///
    /// A missing or corrupt store is never fatal: the cache starts cold.
    #[must_use]
    pub fn load(config: CacheConfig) -> Self {
        let cache = Self::new(config);
        let Some(path) = cache.config.path.clone() else {
            return cache;
        };
        if !path.exists() {
            info!("no pattern store at {}, starting cold", path.display());
            return cache;
        }

        match CacheStore::read(&path) {
            Ok(mut stored) => {
                let now = Utc::now();
                decay_entries(&mut stored.entries, now, cache.config.staleness_days);
                let count = stored.entries.len();
                cache.hits.store(stored.stats.hit_count, Ordering::Relaxed);
                cache
                    .misses
                    .store(stored.stats.miss_count, Ordering::Relaxed);
                if let Ok(mut map) = cache.entries.write() {
                    *map = stored
                        .entries
                        .into_iter()
                        .map(|e| (e.structural_hash.clone(), e))
                        .collect();
                }
                info!("pattern store loaded: {count} entries");
            }
            Err(e) => {
                warn!(
                    "pattern store at {} unreadable ({e}), starting cold",
                    path.display()
                );
            }
        }
        cache
    }

    /// Pure read: the entry for a structural hash, if learned.
    ///
    /// Does not update recency or confidence; only the hit/miss counters
    /// move. Callers decide whether the entry clears their threshold.
    #[must_use]
    pub fn lookup(&self, hash: &str) -> Option<CacheEntry> {
        let found = self
            .entries
            .read()
            .ok()
            .and_then(|map| map.get(hash).cloned());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Learn from a successful rule/fallback extraction.
    ///
    /// First record for a hash starts at confidence 0.6; repeats add 0.05
    /// up to 1.0. Triggers recency eviction when over capacity and a
    /// periodic save every `save_every_learns` records.
    pub fn record(
        &self,
        hash: &str,
        symbol: &str,
        template: FieldTemplate,
        language: &str,
        now: DateTime<Utc>,
    ) {
        if let Ok(mut map) = self.entries.write() {
            map.entry(hash.to_string())
                .and_modify(|entry| {
                    entry.confidence = (entry.confidence + REPEAT_BOOST).min(1.0);
                    entry.success_count += 1;
                    entry.last_seen = now;
                })
                .or_insert_with(|| CacheEntry {
                    structural_hash: hash.to_string(),
                    symbol: symbol.to_string(),
                    confidence: INITIAL_CONFIDENCE,
                    success_count: 1,
                    first_seen: now,
                    last_seen: now,
                    language: language.to_string(),
                    template,
                });

            if map.len() > self.config.max_entries {
                evict_least_recent(&mut map, self.config.max_entries);
            }
        }

        let learned = self.learns.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.save_every_learns > 0 && learned % self.config.save_every_learns == 0 {
            if let Err(e) = self.save() {
                warn!("periodic pattern store save failed: {e}");
            }
        }
    }

    /// Refresh an entry after a fast-path reuse.
    ///
    /// Lighter than [`record`](Self::record): a small confidence boost and
    /// a recency update, keeping hot shapes away from the eviction floor.
    pub fn touch(&self, hash: &str, now: DateTime<Utc>) {
        if let Ok(mut map) = self.entries.write() {
            if let Some(entry) = map.get_mut(hash) {
                entry.confidence = (entry.confidence + TOUCH_BOOST).min(1.0);
                entry.success_count += 1;
                entry.last_seen = now;
            }
        }
    }

    /// Persist the full entry set and aggregate statistics.
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.config.path else {
            return Ok(());
        };
        let entries: Vec<CacheEntry> = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("pattern cache lock poisoned"))?
            .values()
            .cloned()
            .collect();
        let stats = self.stats();
        let store = CacheStore {
            entries,
            stats: StoreStats {
                total_entries: stats.total_entries,
                hit_count: stats.hit_count,
                miss_count: stats.miss_count,
                hit_rate: stats.hit_rate,
            },
            last_updated: Some(Utc::now()),
        };
        store.write(path)?;
        debug!(
            "pattern store saved: {} entries to {}",
            store.entries.len(),
            path.display()
        );
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (total_entries, avg_confidence) = self.entries.read().map_or((0, 0.0), |map| {
            let total = map.len();
            let avg = if total == 0 {
                0.0
            } else {
                map.values().map(|e| e.confidence).sum::<f64>() / total as f64
            };
            (total, avg)
        });

        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let lookups = hit_count + miss_count;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hit_count as f64 / lookups as f64
        };

        CacheStats {
            total_entries,
            hit_count,
            miss_count,
            hit_rate,
            avg_confidence,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |map| map.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop the least-recently-seen 10% when over capacity.
///
/// Recency, not confidence: channel formats drift, and a shape seen
/// yesterday predicts tomorrow better than one that was popular last month.
fn evict_least_recent(map: &mut HashMap<String, CacheEntry>, max_entries: usize) {
    let remove_count = (max_entries / 10).max(1);
    let mut by_age: Vec<(String, DateTime<Utc>)> = map
        .iter()
        .map(|(hash, entry)| (hash.clone(), entry.last_seen))
        .collect();
    by_age.sort_by_key(|(_, last_seen)| *last_seen);

    for (hash, _) in by_age.into_iter().take(remove_count) {
        map.remove(&hash);
    }
    debug!("evicted {remove_count} least-recent pattern entries");
}

/// Multiplicative confidence decay for entries unseen beyond the window.
///
/// 5% per week past `staleness_days`. Decayed entries stay in the map;
/// whether they are still usable is the caller's threshold decision.
pub fn decay_entries(entries: &mut [CacheEntry], now: DateTime<Utc>, staleness_days: i64) {
    for entry in entries {
        let days_stale = (now - entry.last_seen).num_days() - staleness_days;
        if days_stale > 0 {
            let weeks = days_stale as f64 / 7.0;
            entry.confidence *= WEEKLY_DECAY.powf(weeks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry_template() -> FieldTemplate {
        FieldTemplate {
            entry_positions: vec![0],
            target_positions: vec![1],
            stop_position: Some(2),
            leverage_position: None,
        }
    }

    #[test]
    fn first_record_starts_at_learn_threshold() {
        let cache = PatternCache::new(CacheConfig::default());
        cache.record("h1", "BTCUSDT", entry_template(), "en", Utc::now());

        let entry = cache.lookup("h1");
        assert!(entry.is_some_and(|e| (e.confidence - 0.6).abs() < 1e-9));
    }

    #[test]
    fn repeat_records_never_decrease_confidence() {
        let cache = PatternCache::new(CacheConfig::default());
        let mut previous = 0.0;
        for _ in 0..20 {
            cache.record("h1", "BTCUSDT", entry_template(), "en", Utc::now());
            let confidence = cache.lookup("h1").map_or(0.0, |e| e.confidence);
            assert!(confidence >= previous);
            assert!(confidence <= 1.0 + 1e-9);
            previous = confidence;
        }
        // 0.6 + 19 * 0.05 caps at 1.0.
        assert!((previous - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_is_a_pure_read() {
        let cache = PatternCache::new(CacheConfig::default());
        let now = Utc::now();
        cache.record("h1", "BTCUSDT", entry_template(), "en", now);

        let before = cache.lookup("h1");
        let after = cache.lookup("h1");
        let (Some(before), Some(after)) = (before, after) else {
            panic!("entry should be present");
        };
        assert!((before.confidence - after.confidence).abs() < f64::EPSILON);
        assert_eq!(before.success_count, after.success_count);
        assert_eq!(before.last_seen, after.last_seen);
    }

    #[test]
    fn touch_updates_recency_and_nudges_confidence() {
        let cache = PatternCache::new(CacheConfig::default());
        let start = Utc::now();
        cache.record("h1", "BTCUSDT", entry_template(), "en", start);

        let later = start + Duration::minutes(5);
        cache.touch("h1", later);

        let Some(entry) = cache.lookup("h1") else {
            panic!("entry should be present");
        };
        assert_eq!(entry.last_seen, later);
        assert_eq!(entry.success_count, 2);
        assert!((entry.confidence - 0.61).abs() < 1e-9);
    }

    #[test]
    fn eviction_removes_exactly_the_least_recent() {
        let config = CacheConfig {
            max_entries: 10,
            save_every_learns: 0,
            ..CacheConfig::default()
        };
        let cache = PatternCache::new(config);
        let start = Utc::now();

        for i in 0..13 {
            let now = start + Duration::minutes(i);
            cache.record(&format!("h{i}"), "BTCUSDT", FieldTemplate::default(), "en", now);
        }

        assert!(cache.len() <= 10);
        // h0 was the least recent when capacity first overflowed.
        assert!(cache.lookup("h0").is_none());
        // The most recent entries survive.
        assert!(cache.lookup("h12").is_some());
        assert!(cache.lookup("h11").is_some());
    }

    #[test]
    fn decay_follows_weekly_factor() {
        let now = Utc::now();
        let mut entries = vec![CacheEntry {
            structural_hash: "h1".to_string(),
            symbol: "BTCUSDT".to_string(),
            confidence: 0.8,
            success_count: 4,
            first_seen: now - Duration::days(100),
            last_seen: now - Duration::days(30 + 14),
            language: "en".to_string(),
            template: FieldTemplate::default(),
        }];

        decay_entries(&mut entries, now, 30);

        // Two weeks past the window: 0.8 * 0.95^2.
        let expected = 0.8 * 0.95 * 0.95;
        assert!((entries[0].confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn fresh_entries_do_not_decay() {
        let now = Utc::now();
        let mut entries = vec![CacheEntry {
            structural_hash: "h1".to_string(),
            symbol: "BTCUSDT".to_string(),
            confidence: 0.8,
            success_count: 1,
            first_seen: now,
            last_seen: now - Duration::days(10),
            language: "en".to_string(),
            template: FieldTemplate::default(),
        }];

        decay_entries(&mut entries, now, 30);
        assert!((entries[0].confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_track_hit_rate() {
        let cache = PatternCache::new(CacheConfig::default());
        cache.record("h1", "BTCUSDT", FieldTemplate::default(), "en", Utc::now());

        let _ = cache.lookup("h1");
        let _ = cache.lookup("h1");
        let _ = cache.lookup("missing");

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn save_and_load_round_trip_with_stats() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("patterns.json");
        let config = CacheConfig {
            path: Some(path.clone()),
            ..CacheConfig::default()
        };

        let cache = PatternCache::new(config.clone());
        cache.record("h1", "BTCUSDT", entry_template(), "en", Utc::now());
        let _ = cache.lookup("h1");
        cache.save().expect("save should succeed");

        let reloaded = PatternCache::load(config);
        let entry = reloaded.lookup("h1").expect("entry should survive reload");
        assert_eq!(entry.symbol, "BTCUSDT");
        assert_eq!(entry.template, entry_template());
        assert!((entry.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn corrupt_store_starts_cold() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, "{not json").expect("write should succeed");

        let cache = PatternCache::load(CacheConfig {
            path: Some(path),
            ..CacheConfig::default()
        });
        assert!(cache.is_empty());
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn unknown_store_fields_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("patterns.json");
        let doc = serde_json::json!({
            "entries": [{
                "structural_hash": "h1",
                "symbol": "BTCUSDT",
                "confidence": 0.75,
                "success_count": 3,
                "first_seen": "2026-01-01T00:00:00Z",
                "last_seen": "2026-08-01T00:00:00Z",
                "language": "en",
                "template": { "entry_positions": [0] },
                "some_future_field": true
            }],
            "stats": { "hit_count": 5, "miss_count": 5, "hit_rate": 0.5 },
            "schema_rev": 9
        });
        std::fs::write(&path, doc.to_string()).expect("write should succeed");

        let cache = PatternCache::load(CacheConfig {
            path: Some(path),
            ..CacheConfig::default()
        });
        let entry = cache.lookup("h1").expect("entry should load");
        assert_eq!(entry.template.entry_positions, vec![0]);
    }
}
