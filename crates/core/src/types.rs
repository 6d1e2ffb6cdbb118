use crate::error::{CacheError, CacheResult};
use crate::filters::canonicalize;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A single dashboard filter parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    /// Values that do not participate in the cache key.
    pub fn is_absent(&self) -> bool {
        match self {
            FilterValue::Null => true,
            FilterValue::Float(f) => !f.is_finite(),
            _ => false,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Int(i64::from(value))
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        FilterValue::Int(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

/// Named filter parameters as received from a dashboard request, in the
/// order the caller supplied them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    params: Vec<(String, FilterValue)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FilterValue>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<K: Into<String>, V: Into<FilterValue>> FromIterator<(K, V)> for FilterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FilterSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// Logical group of cache keys sharing a purge pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Cow<'static, str>);

impl Namespace {
    pub const DASHBOARD: Namespace = Namespace::from_static("dashboard");
    pub const KPIS: Namespace = Namespace::from_static("kpis");
    pub const AGING: Namespace = Namespace::from_static("aging");
    pub const FORECAST: Namespace = Namespace::from_static("forecast");
    pub const CASHFLOW: Namespace = Namespace::from_static("cashflow");
    pub const CLIENTS: Namespace = Namespace::from_static("clients");
    pub const EXPENSES: Namespace = Namespace::from_static("expenses");

    /// Every namespace the application declares, in purge order.
    pub const ALL: [Namespace; 7] = [
        Namespace::DASHBOARD,
        Namespace::KPIS,
        Namespace::AGING,
        Namespace::FORECAST,
        Namespace::CASHFLOW,
        Namespace::CLIENTS,
        Namespace::EXPENSES,
    ];

    pub const fn from_static(name: &'static str) -> Self {
        Namespace(Cow::Borrowed(name))
    }

    /// Parse a runtime namespace name. Names must be non-empty and free of
    /// the key separator and glob characters so prefixes never overlap.
    pub fn parse(name: &str) -> CacheResult<Self> {
        if name.is_empty() || name.contains([':', '*', '?', '[', ']']) {
            return Err(CacheError::Config(format!("invalid namespace name: {name:?}")));
        }
        Ok(Namespace(Cow::Owned(name.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Glob matching every key stored under this namespace.
    pub fn pattern(&self) -> String {
        format!("{}:*", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const META_SUFFIX: &str = ":meta";
const PROCESSING_SUFFIX: &str = ":processing";
const STALE_SUFFIX: &str = ":stale";

/// `<namespace>:<canonical filter hash>`. Immutable once derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    hash: String,
    value_key: String,
}

impl CacheKey {
    pub fn derive(namespace: &Namespace, filters: &FilterSet) -> Self {
        Self::from_parts(namespace.clone(), canonicalize(filters))
    }

    pub fn from_parts(namespace: Namespace, hash: String) -> Self {
        let value_key = format!("{namespace}:{hash}");
        Self {
            namespace,
            hash,
            value_key,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn as_str(&self) -> &str {
        &self.value_key
    }

    pub fn meta_key(&self) -> String {
        format!("{}{META_SUFFIX}", self.value_key)
    }

    pub fn processing_key(&self) -> String {
        format!("{}{PROCESSING_SUFFIX}", self.value_key)
    }

    pub fn stale_key(&self) -> String {
        format!("{}{STALE_SUFFIX}", self.value_key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value_key)
    }
}

/// Role of a raw store key within the persisted key layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Value,
    Meta,
    Processing,
    Stale,
}

impl KeyKind {
    pub fn of(raw: &str) -> KeyKind {
        if raw.ends_with(META_SUFFIX) {
            KeyKind::Meta
        } else if raw.ends_with(PROCESSING_SUFFIX) {
            KeyKind::Processing
        } else if raw.ends_with(STALE_SUFFIX) {
            KeyKind::Stale
        } else {
            KeyKind::Value
        }
    }
}
