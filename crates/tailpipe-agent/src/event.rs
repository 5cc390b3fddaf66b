//! The structured event flowing through the pipeline.
//!
//! An [`Event`] is created by a parser, transformed by the mutator chain,
//! and consumed by the sender. Attribute values are dynamically typed; the
//! tagged union is `serde_json::Value`, which covers the string / integer /
//! float / boolean / nested-map shapes the dialects produce.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute map of an event. Keyed by canonical per-dialect names;
/// keys are unique and never empty.
pub type Data = BTreeMap<String, Value>;

/// A structured record with a timestamp and an attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Best-effort event time, UTC. Falls back to the wall clock when the
    /// source line carries no parseable timestamp.
    pub timestamp: DateTime<Utc>,
    pub data: Data,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, data: Data) -> Self {
        Event { timestamp, data }
    }

    /// Wire shape: the transformed data fields at the top level plus a
    /// top-level RFC 3339 `timestamp`.
    pub fn to_wire_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        for (key, value) in &self.data {
            obj.insert(key.clone(), value.clone());
        }
        Value::Object(obj)
    }
}

/// Canonical string rendering of a value, used when hashing scrubbed
/// fields: decimal for integers, the shortest round-trip form for floats,
/// `true`/`false` for booleans, and nested maps rendered recursively in
/// key order.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", k, render_value(v)))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", entries.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_event() -> Event {
        let mut data = Data::new();
        data.insert("user".to_string(), json!("postgres"));
        data.insert("duration".to_string(), json!(0.681));
        data.insert("pid".to_string(), json!(3053));
        Event::new(Utc.with_ymd_and_hms(2017, 11, 7, 0, 5, 16).unwrap(), data)
    }

    #[test]
    fn test_wire_json_has_top_level_timestamp() {
        let wire = sample_event().to_wire_json();
        assert_eq!(wire["timestamp"], json!("2017-11-07T00:05:16Z"));
        assert_eq!(wire["user"], json!("postgres"));
        assert_eq!(wire["duration"], json!(0.681));
        assert_eq!(wire["pid"], json!(3053));
    }

    #[test]
    fn test_render_integer_is_decimal() {
        assert_eq!(render_value(&json!(3053)), "3053");
        assert_eq!(render_value(&json!(-7)), "-7");
    }

    #[test]
    fn test_render_float_is_canonical() {
        assert_eq!(render_value(&json!(0.681)), "0.681");
    }

    #[test]
    fn test_render_bool() {
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(false)), "false");
    }

    #[test]
    fn test_render_nested_map_ordered_by_key() {
        let value = json!({"b": 2, "a": 1});
        // serde_json maps iterate in key order, so rendering is stable.
        assert_eq!(render_value(&value), "{a:1,b:2}");
    }

    #[test]
    fn test_render_string_is_identity() {
        assert_eq!(render_value(&json!("a@b")), "a@b");
    }
}
