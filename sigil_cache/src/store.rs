//! On-disk document format for the pattern store.
//!
//! A single JSON file holding the entry set plus aggregate statistics.
//! Every field is defaulted so older stores keep loading as the schema
//! grows, and unknown fields are ignored for the same reason in reverse.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CacheEntry;

/// Aggregate counters persisted alongside the entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    #[serde(default)]
    pub total_entries: usize,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub miss_count: u64,
    #[serde(default)]
    pub hit_rate: f64,
}

/// The persisted cache document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStore {
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
    #[serde(default)]
    pub stats: StoreStats,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CacheStore {
    /// Read and parse a store document.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content)?;
        Ok(store)
    }

    /// Write the document, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldTemplate;

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn document_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("nested/dir/patterns.json");

        let store = CacheStore {
            entries: vec![CacheEntry {
                structural_hash: "abc".to_string(),
                symbol: "ETHUSDT".to_string(),
                confidence: 0.7,
                success_count: 2,
                first_seen: Utc::now(),
                last_seen: Utc::now(),
                language: "en".to_string(),
                template: FieldTemplate::default(),
            }],
            stats: StoreStats {
                total_entries: 1,
                hit_count: 3,
                miss_count: 1,
                hit_rate: 0.75,
            },
            last_updated: Some(Utc::now()),
        };

        store.write(&path).expect("write should succeed");
        let back = CacheStore::read(&path).expect("read should succeed");
        assert_eq!(back.entries.len(), 1);
        assert_eq!(back.entries[0].symbol, "ETHUSDT");
        assert_eq!(back.stats.hit_count, 3);
    }

    #[test]
    fn empty_document_parses() {
        let store: CacheStore = serde_json::from_str("{}").unwrap_or_default();
        assert!(store.entries.is_empty());
        assert_eq!(store.stats.hit_count, 0);
    }
}
