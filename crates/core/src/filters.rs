//! Filter canonicalization: arbitrary dashboard filter parameters become a
//! deterministic, fixed-width cache-key fragment.
//!
//! Absent values are dropped, the remaining names sorted, the pairs written
//! as compact JSON and the result digested with SHA-256. Only the first
//! [`CANONICAL_HASH_LEN`] hex characters are kept to bound key length.

use crate::types::{FilterSet, FilterValue};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const CANONICAL_HASH_LEN: usize = 12;

/// Canonical compact JSON form of a filter set (before hashing).
pub fn canonical_form(filters: &FilterSet) -> String {
    // Later duplicates win, the same as building a map from the request.
    let sorted: BTreeMap<&str, Value> = filters
        .iter()
        .filter(|(_, v)| !v.is_absent())
        .map(|(k, v)| (k, to_json(v)))
        .collect();

    let mut out = String::from("{");
    for (i, (name, value)) in sorted.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String((*name).to_string()).to_string());
        out.push(':');
        out.push_str(&value.to_string());
    }
    out.push('}');
    out
}

/// Deterministic, bounded-length identifier for a filter set.
pub fn canonicalize(filters: &FilterSet) -> String {
    let digest = Sha256::digest(canonical_form(filters).as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(CANONICAL_HASH_LEN);
    hash
}

fn to_json(value: &FilterValue) -> Value {
    match value {
        FilterValue::Null => Value::Null,
        FilterValue::Bool(b) => Value::Bool(*b),
        FilterValue::Int(i) => Value::from(*i),
        FilterValue::Float(f) => Value::from(*f),
        FilterValue::Text(s) => Value::String(s.clone()),
    }
}
