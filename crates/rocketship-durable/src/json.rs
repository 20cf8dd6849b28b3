//! Deterministic JSON encoding
//!
//! Snapshots and journal payloads must serialize identically across runs
//! and replays, so objects are always emitted with sorted keys and no
//! redundant whitespace.

use serde_json::Value;
use std::collections::BTreeMap;

/// Serialize a value to canonical JSON: sorted object keys, compact
///
/// ```
/// use serde_json::json;
/// use rocketship_durable::deterministic_json;
///
/// let value = json!({ "b": 2, "a": 1 });
/// assert_eq!(deterministic_json(&value), r#"{"a":1,"b":2}"#);
/// ```
pub fn deterministic_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).expect("string encodes"),
        Value::Array(items) => {
            let encoded: Vec<String> = items.iter().map(deterministic_json).collect();
            format!("[{}]", encoded.join(","))
        }
        Value::Object(map) => {
            let mut sorted = BTreeMap::new();
            for (key, nested) in map {
                sorted.insert(key, deterministic_json(nested));
            }
            let encoded: Vec<String> = sorted
                .into_iter()
                .map(|(key, nested)| {
                    format!("{}:{}", serde_json::to_string(key).expect("key encodes"), nested)
                })
                .collect();
            format!("{{{}}}", encoded.join(","))
        }
    }
}

/// Keys of a JSON object in sorted order
///
/// Every iteration over a map inside workflow code goes through this (or a
/// BTreeMap) so replayed executions visit entries identically.
pub fn deterministic_keys(map: &serde_json::Map<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}
