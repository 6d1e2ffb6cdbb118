use crate::types::Namespace;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `FINBOARD__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    #[serde(default = "default_delete_batch")]
    pub delete_batch: usize,
}

/// Per-namespace TTL override.
#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceTtl {
    pub ttl_secs: u64,
}

/// Every TTL the cache layer uses, in one place.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_namespace_ttls")]
    pub namespaces: HashMap<String, NamespaceTtl>,
    #[serde(default = "default_error_ttl_secs")]
    pub error_ttl_secs: u64,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_stale_fallback_ttl_secs")]
    pub stale_fallback_ttl_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,
    #[serde(default)]
    pub immediate_partial: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default = "default_event_retention_secs")]
    pub event_retention_secs: u64,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_redis_enabled() -> bool {
    true
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_connect_timeout_ms() -> u64 {
    2000
}
fn default_op_timeout_ms() -> u64 {
    250
}
fn default_delete_batch() -> usize {
    500
}
fn default_ttl_secs() -> u64 {
    600
}
fn default_namespace_ttls() -> HashMap<String, NamespaceTtl> {
    [
        (Namespace::DASHBOARD, 300),
        (Namespace::KPIS, 600),
        (Namespace::AGING, 900),
        (Namespace::FORECAST, 3600),
        (Namespace::CASHFLOW, 900),
        (Namespace::CLIENTS, 1800),
        (Namespace::EXPENSES, 900),
    ]
    .into_iter()
    .map(|(ns, ttl_secs)| (ns.to_string(), NamespaceTtl { ttl_secs }))
    .collect()
}
fn default_error_ttl_secs() -> u64 {
    300
}
fn default_lock_ttl_secs() -> u64 {
    300
}
fn default_stale_fallback_ttl_secs() -> u64 {
    86_400
}
fn default_stale_after_secs() -> u64 {
    60
}
fn default_local_max_entries() -> usize {
    10_000
}
fn default_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_jitter() -> bool {
    true
}
fn default_event_retention_secs() -> u64 {
    3600
}
fn default_max_events() -> usize {
    1000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            urls: default_redis_urls(),
            connect_timeout_ms: default_connect_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            delete_batch: default_delete_batch(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            namespaces: default_namespace_ttls(),
            error_ttl_secs: default_error_ttl_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            stale_fallback_ttl_secs: default_stale_fallback_ttl_secs(),
            stale_after_secs: default_stale_after_secs(),
            local_max_entries: default_local_max_entries(),
            immediate_partial: false,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter: default_jitter(),
        }
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            event_retention_secs: default_event_retention_secs(),
            max_events: default_max_events(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            jobs: JobsConfig::default(),
            invalidation: InvalidationConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Result TTL for a namespace, falling back to the default.
    pub fn ttl_for(&self, namespace: &Namespace) -> Duration {
        let secs = self
            .namespaces
            .get(namespace.as_str())
            .map(|t| t.ttl_secs)
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn error_ttl(&self) -> Duration {
        Duration::from_secs(self.error_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn stale_fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_fallback_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl InvalidationConfig {
    pub fn event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("FINBOARD")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("redis.urls"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
