//! Annotations - typed values with declarative merge semantics.
//!
//! An annotation value is any JSON-shaped value (string, number, bool, null,
//! array, object). v1beta1 domains may attach a merge strategy per annotation
//! and a per-domain default; earlier schema versions always merge with
//! `replace`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How two occurrences of the same annotation key compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Last write wins.
    #[default]
    Replace,
    /// Concatenate; the incoming value lands after the existing one.
    Append,
    /// Concatenate; the incoming value lands before the existing one.
    Prepend,
    /// Recursive map merge; scalars at the same path replace.
    Deep,
    /// Set union of array values, order-stable on first occurrence.
    Union,
}

/// A single named annotation as declared on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: Value,
    /// Strategy declared on this occurrence; `None` falls back to the owning
    /// domain's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeStrategy>,
}

/// Merge `incoming` into `existing` under the given strategy, returning the
/// composed value.
pub fn merge_values(strategy: MergeStrategy, existing: Value, incoming: Value) -> Value {
    match strategy {
        MergeStrategy::Replace => incoming,
        MergeStrategy::Append => {
            let mut out = to_array(existing);
            out.extend(to_array(incoming));
            Value::Array(out)
        }
        MergeStrategy::Prepend => {
            let mut out = to_array(incoming);
            out.extend(to_array(existing));
            Value::Array(out)
        }
        MergeStrategy::Union => {
            let mut out = to_array(existing);
            for item in to_array(incoming) {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Value::Array(out)
        }
        MergeStrategy::Deep => deep_merge(existing, incoming),
    }
}

/// Coerce a value to an array, wrapping non-arrays as singletons.
fn to_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn deep_merge(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.remove(&key) {
                    Some(prior) => {
                        base.insert(key, deep_merge(prior, value));
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        // Scalars (and mismatched shapes) at the same path replace.
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_takes_incoming() {
        let v = merge_values(MergeStrategy::Replace, json!("a"), json!("b"));
        assert_eq!(v, json!("b"));
    }

    #[test]
    fn append_concatenates_and_coerces_singletons() {
        let v = merge_values(MergeStrategy::Append, json!(["a"]), json!("b"));
        assert_eq!(v, json!(["a", "b"]));
        let v = merge_values(MergeStrategy::Append, json!("a"), json!(["b", "c"]));
        assert_eq!(v, json!(["a", "b", "c"]));
    }

    #[test]
    fn prepend_puts_incoming_first() {
        let v = merge_values(MergeStrategy::Prepend, json!(["a"]), json!(["b"]));
        assert_eq!(v, json!(["b", "a"]));
    }

    #[test]
    fn union_dedups_preserving_first_seen_order() {
        let v = merge_values(
            MergeStrategy::Union,
            json!(["a", "b"]),
            json!(["b", "c", "a"]),
        );
        assert_eq!(v, json!(["a", "b", "c"]));
    }

    #[test]
    fn deep_merges_maps_recursively() {
        let v = merge_values(
            MergeStrategy::Deep,
            json!({"a": {"x": 1, "y": 2}, "b": 1}),
            json!({"a": {"y": 3, "z": 4}, "c": 2}),
        );
        assert_eq!(v, json!({"a": {"x": 1, "y": 3, "z": 4}, "b": 1, "c": 2}));
    }

    #[test]
    fn deep_merge_scalar_conflict_replaces() {
        let v = merge_values(MergeStrategy::Deep, json!({"a": 1}), json!({"a": "s"}));
        assert_eq!(v, json!({"a": "s"}));
    }

    #[test]
    fn strategy_parses_from_lowercase() {
        let s: MergeStrategy = serde_json::from_str("\"union\"").unwrap();
        assert_eq!(s, MergeStrategy::Union);
    }
}
