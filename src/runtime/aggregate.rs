//! Aggregation Reducers - combine upstream outputs
//!
//! An aggregation node's input is the merge of its declared sources'
//! outputs; its output is the declared reducer applied to them in
//! declaration order. Skipped sources contribute nothing.

use serde_json::{Map, Value};

use crate::ast::Reducer;

/// Shallow merge of source outputs into the aggregation input object.
/// Object outputs merge key-by-key (later sources win); non-object
/// outputs land under their source node id.
pub fn merged_input(outputs: &[(String, Value)]) -> Value {
    let mut merged = Map::new();
    for (node_id, output) in outputs {
        match output {
            Value::Object(map) => {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
            other => {
                merged.insert(node_id.clone(), other.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Apply a reducer over source outputs in declaration order
pub fn reduce(reducer: Reducer, outputs: &[(String, Value)]) -> Value {
    match reducer {
        Reducer::Concat => {
            let mut items = Vec::new();
            for (_, output) in outputs {
                match output {
                    Value::Array(a) => items.extend(a.iter().cloned()),
                    other => items.push(other.clone()),
                }
            }
            Value::Array(items)
        }
        Reducer::Merge => merged_input(outputs),
        Reducer::Sum => {
            let sum: f64 = outputs
                .iter()
                .filter_map(|(_, v)| v.as_f64())
                .sum();
            serde_json::Number::from_f64(sum)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        Reducer::Last => outputs
            .last()
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null),
    }
}
