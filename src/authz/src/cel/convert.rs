//! Conversion from JSON values to CEL values

use cel_interpreter::objects::{Key, Map, Value as CelValue};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Convert a `serde_json::Value` into a CEL value
pub fn json_to_cel(value: &JsonValue) -> CelValue {
    match value {
        JsonValue::Null => CelValue::Null,
        JsonValue::Bool(b) => CelValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else if let Some(f) = n.as_f64() {
                CelValue::Float(f)
            } else {
                CelValue::Null
            }
        }
        JsonValue::String(s) => CelValue::String(s.clone().into()),
        JsonValue::Array(items) => {
            let list: Vec<CelValue> = items.iter().map(json_to_cel).collect();
            CelValue::List(list.into())
        }
        JsonValue::Object(obj) => {
            let map: HashMap<Key, CelValue> = obj
                .iter()
                .map(|(k, v)| (Key::from(k.clone()), json_to_cel(v)))
                .collect();
            CelValue::Map(Map { map: Arc::new(map) })
        }
    }
}
