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

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sigil_cache::{CacheConfig, PatternCache};
use sigil_config::Config;
use sigil_core::{RawMessage, StaticSymbolValidator};
use sigil_extract::{FingerprintExtractor, SymbolicExtractor, VocabularyTable};
use sigil_fallback::OpenAiCompatProvider;
use sigil_pipeline::{Router, RouterConfig};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sigil")]
#[command(about = "Adaptive trading-signal parser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse one signal message
    Parse {
        /// Message text (reads stdin when omitted)
        #[arg(short = 'm', long)]
        message: Option<String>,

        /// Source identifier recorded with the message
        #[arg(short = 's', long, default_value = "cli")]
        source: String,
    },
    /// Show pattern cache statistics
    Stats,
    /// Initialize configuration
    Init,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { message, source } => {
            let text = match message {
                Some(text) => text,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };

            let config = Config::load_or_default();
            let cache = Arc::new(PatternCache::load(cache_config(&config)));
            let router = build_router(&config, cache.clone())?;

            let signal = router.process(&RawMessage::new(text, source)).await;
            println!("{}", serde_json::to_string_pretty(&signal)?);

            if let Err(e) = cache.save() {
                warn!("pattern store save failed: {e}");
            }
        }
        Commands::Stats => {
            let config = Config::load_or_default();
            let cache = PatternCache::load(cache_config(&config));
            let stats = cache.stats();
            println!("patterns:        {}", stats.total_entries);
            println!("lookup hits:     {}", stats.hit_count);
            println!("lookup misses:   {}", stats.miss_count);
            println!("hit rate:        {:.1}%", stats.hit_rate * 100.0);
            println!("avg confidence:  {:.2}", stats.avg_confidence);
        }
        Commands::Init => {
            Config::create_config()?;
        }
        Commands::Version => {
            println!("sigil {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn cache_config(config: &Config) -> CacheConfig {
    CacheConfig {
        max_entries: config.cache.max_entries,
        staleness_days: config.cache.staleness_days,
        save_every_learns: config.cache.save_every_learns,
        path: config.cache.store_path(),
    }
}

fn build_router(config: &Config, cache: Arc<PatternCache>) -> anyhow::Result<Router> {
    let vocab = VocabularyTable::with_defaults()?;
    let mut extractor = SymbolicExtractor::new(vocab.clone(), config.pipeline.validation_policy);
    if let Some(instruments) = &config.known_instruments {
        extractor =
            extractor.with_validator(Arc::new(StaticSymbolValidator::new(instruments.clone())));
    }

    let router_config = RouterConfig {
        fast_path_threshold: config.pipeline.fast_path_threshold,
        learn_threshold: config.pipeline.learn_threshold,
        fallback_threshold: config.pipeline.fallback_threshold,
        fallback_timeout: Duration::from_millis(config.pipeline.fallback_timeout_ms),
    };

    let mut router = Router::new(
        cache,
        FingerprintExtractor::new(vocab),
        extractor,
        router_config,
    );

    if let Some(fallback) = &config.fallback {
        let mut provider =
            OpenAiCompatProvider::new(fallback.api_key.clone(), fallback.model.clone());
        if let Some(base_url) = &fallback.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        info!("fallback tier enabled: {}", fallback.model);
        router = router.with_fallback(Arc::new(provider));
    }

    Ok(router)
}
