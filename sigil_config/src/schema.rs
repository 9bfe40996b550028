use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

// Import ValidationPolicy from sigil_core to avoid duplication
use sigil_core::ValidationPolicy;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackConfig>,
    /// Known-valid instrument base symbols; enables offline validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_instruments: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_fast_path_threshold")]
    pub fast_path_threshold: f64,
    #[serde(default = "PipelineConfig::default_learn_threshold")]
    pub learn_threshold: f64,
    #[serde(default = "PipelineConfig::default_fallback_threshold")]
    pub fallback_threshold: f64,
    #[serde(default = "PipelineConfig::default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
    #[serde(default)]
    pub validation_policy: ValidationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fast_path_threshold: Self::default_fast_path_threshold(),
            learn_threshold: Self::default_learn_threshold(),
            fallback_threshold: Self::default_fallback_threshold(),
            fallback_timeout_ms: Self::default_fallback_timeout_ms(),
            validation_policy: ValidationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    const fn default_fast_path_threshold() -> f64 {
        0.7
    }

    const fn default_learn_threshold() -> f64 {
        0.6
    }

    const fn default_fallback_threshold() -> f64 {
        0.85
    }

    const fn default_fallback_timeout_ms() -> u64 {
        4000
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "CacheSettings::default_staleness_days")]
    pub staleness_days: i64,
    #[serde(default = "CacheSettings::default_save_every_learns")]
    pub save_every_learns: u64,
    /// Store path; defaults to `~/sigil/patterns.json` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: Self::default_max_entries(),
            staleness_days: Self::default_staleness_days(),
            save_every_learns: Self::default_save_every_learns(),
            path: None,
        }
    }
}

impl CacheSettings {
    const fn default_max_entries() -> usize {
        1000
    }

    const fn default_staleness_days() -> i64 {
        30
    }

    const fn default_save_every_learns() -> u64 {
        10
    }

    /// The store path to use, resolving the home-directory default.
    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join("sigil").join("patterns.json")))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FallbackConfig {
    pub api_key: String,
    #[serde(default = "FallbackConfig::default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl FallbackConfig {
    fn default_model() -> String {
        "deepseek/deepseek-r1-0528:free".to_string()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("sigil");

        let config_path = config_dir.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'sigil init' to create config.",
                config_path.display()
            );
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = serde_json::from_str(&content)?;

        Ok(config)
    }

    /// Load the config, falling back to defaults when none exists.
    #[must_use]
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            warn!("using default configuration: {e}");
            Self::default()
        })
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("sigil");

        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        let config_template = r#"{
  "pipeline": {
    "fast_path_threshold": 0.7,
    "learn_threshold": 0.6,
    "fallback_threshold": 0.85,
    "fallback_timeout_ms": 4000,
    "validation_policy": "penalize"
  },
  "cache": {
    "max_entries": 1000,
    "staleness_days": 30,
    "save_every_learns": 10
  },
  "fallback": {
    "api_key": "your-api-key-here",
    "model": "deepseek/deepseek-r1-0528:free",
    "base_url": "https://openrouter.ai/api/v1"
  }
}"#;

        std::fs::write(&config_path, config_template)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Add an API key to enable the heavy fallback tier (or delete the");
        println!("      'fallback' section to run rule-only)");
        println!("   2. Run 'sigil parse -m \"<signal text>\"' to parse a message");
        println!();
        println!("🔧 Configuration options:");
        println!("   - fast_path_threshold: minimum cache confidence for the fast path");
        println!("   - fallback_threshold: below this, the heavy tier is consulted");
        println!("   - validation_policy: 'penalize' or 'reject' inconsistent TP/SL");
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!((config.pipeline.fast_path_threshold - 0.7).abs() < f64::EPSILON);
        assert!((config.pipeline.learn_threshold - 0.6).abs() < f64::EPSILON);
        assert!((config.pipeline.fallback_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.pipeline.fallback_timeout_ms, 4000);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.staleness_days, 30);
        assert!(config.fallback.is_none());
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"pipeline": {"fallback_threshold": 0.9}}"#)
            .expect("partial config should parse");
        assert!((config.pipeline.fallback_threshold - 0.9).abs() < f64::EPSILON);
        assert!((config.pipeline.fast_path_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn validation_policy_parses_from_string() {
        let config: Config =
            serde_json::from_str(r#"{"pipeline": {"validation_policy": "reject"}}"#)
                .expect("config should parse");
        assert_eq!(config.pipeline.validation_policy, ValidationPolicy::Reject);
    }
}
