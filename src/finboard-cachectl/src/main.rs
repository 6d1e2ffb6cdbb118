//! finboard-cachectl: operator tool for the dashboard cache.
//!
//! Builds the cache store from configuration and runs one maintenance
//! command against it: health reports, data-change invalidation, full
//! purges, key inspection, or the periodic local sweep.

use anyhow::Context;
use clap::{Parser, Subcommand};
use finboard_cache::{CacheStore, DurableStore, RedisStore};
use finboard_core::config::AppConfig;
use finboard_core::{CacheKey, FilterSet, FilterValue, Namespace, SystemClock};
use finboard_invalidation::InvalidationRegistry;
use serde::Serialize;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "finboard-cachectl")]
#[command(about = "Inspect and invalidate the Finboard dashboard cache")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, env = "FINBOARD_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "FINBOARD__NODE_ID")]
    node_id: Option<String>,

    /// Redis URL (overrides config)
    #[arg(long, env = "FINBOARD__REDIS__URL")]
    redis_url: Option<String>,

    /// Run against the process-local tier only
    #[arg(long, default_value_t = false)]
    no_redis: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print store reachability, key counts and recent invalidations
    Health,
    /// Record a data change and purge the namespaces that depend on it
    Invalidate {
        /// Operation name, e.g. invoice_created or payment_registered
        operation: String,
        /// Identifiers of the affected records
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Purge every declared namespace
    PurgeAll,
    /// Show the key and stored metadata for one namespace and filter set
    Inspect {
        namespace: String,
        /// Filter as name=value; numbers and booleans are typed
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,
    },
    /// Sweep expired local entries and log health periodically
    Maintain {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
}

#[derive(Serialize)]
struct Inspection {
    cache_key: String,
    locked: bool,
    meta: Option<finboard_cache::EntryMeta>,
    /// Keys under the namespace; absent when the durable tier cannot be scanned.
    namespace_keys: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "finboard_cachectl=info,finboard_cache=info,finboard_invalidation=info".into()
            }),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(url) = cli.redis_url {
        config.redis.urls = vec![url];
    }
    if cli.no_redis {
        config.redis.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        redis_enabled = config.redis.enabled,
        namespaces = config.cache.namespaces.len(),
        "Configuration loaded"
    );

    let durable: Option<Arc<dyn DurableStore>> = if config.redis.enabled {
        match RedisStore::connect(&config.redis).await {
            Ok(store) => Some(Arc::new(store) as Arc<dyn DurableStore>),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, continuing with the local tier only");
                None
            }
        }
    } else {
        None
    };

    let store = Arc::new(CacheStore::new(
        durable,
        Arc::new(SystemClock),
        config.cache.local_max_entries,
    ));
    let registry = InvalidationRegistry::new(store.clone(), &config.invalidation);

    match cli.command {
        Command::Health => {
            let report = registry.health_reporter().health_report().await;
            print_json(&report)?;
        }
        Command::Invalidate { operation, ids } => {
            let result = registry
                .register_data_change(&operation, &ids, Map::new())
                .await;
            print_json(&result)?;
        }
        Command::PurgeAll => {
            let result = registry.force_invalidate_all().await;
            print_json(&result)?;
        }
        Command::Inspect { namespace, filters } => {
            let namespace = Namespace::parse(&namespace)?;
            let filters = parse_filters(&filters)?;
            let key = CacheKey::derive(&namespace, &filters);
            let namespace_keys = match store.count_pattern(&namespace.pattern()).await {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Key count unavailable");
                    None
                }
            };
            let inspection = Inspection {
                cache_key: key.to_string(),
                locked: store.is_locked(&key).await,
                meta: store.inspect(&key).await,
                namespace_keys,
            };
            print_json(&inspection)?;
        }
        Command::Maintain { interval_secs } => {
            let reporter = registry.health_reporter();
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            info!(interval_secs = interval_secs, "Cache maintenance loop started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = store.maintenance();
                        let report = reporter.health_report().await;
                        info!(
                            evicted = evicted,
                            store_available = report.store_available,
                            local_entries = report.local_entries,
                            recent_events = report.recent_event_count,
                            "Maintenance tick"
                        );
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down maintenance loop");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_filters(raw: &[String]) -> anyhow::Result<FilterSet> {
    raw.iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("filter must be name=value, got {pair:?}"))?;
            Ok::<_, anyhow::Error>((name.to_string(), parse_filter_value(value)))
        })
        .collect()
}

fn parse_filter_value(value: &str) -> FilterValue {
    if let Ok(int) = value.parse::<i64>() {
        FilterValue::Int(int)
    } else if let Ok(float) = value.parse::<f64>() {
        FilterValue::Float(float)
    } else if let Ok(flag) = value.parse::<bool>() {
        FilterValue::Bool(flag)
    } else {
        FilterValue::Text(value.to_string())
    }
}
