// src/recovery/fields.rs
//! Last-resort harvesting of individual fields when no JSON object can be parsed.

use regex::Regex;
use serde_json::{Map, Number, Value};

/// A field the caller cannot do without, with the value to assume when absent.
#[derive(Debug, Clone)]
pub struct CriticalField {
    name: String,
    default: Value,
    pattern: Regex,
}

impl CriticalField {
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        // "name": "quoted text"  or  "name": bare_token; "" never matches
        let pattern = format!(
            r#""{}"\s*:\s*(?:"((?:[^"\\]|\\.)+)"|([^\s",}}\]]+))"#,
            regex::escape(&name)
        );
        let pattern = Regex::new(&pattern).expect("escaped field regex");
        Self {
            name,
            default: default.into(),
            pattern,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// First usable match in `raw`. Quoted values stay strings, bare tokens
    /// are coerced. Blank strings count as absent.
    pub fn find_in(&self, raw: &str) -> Option<Value> {
        self.pattern.captures_iter(raw).find_map(|caps| {
            if let Some(quoted) = caps.get(1) {
                let literal = format!("\"{}\"", quoted.as_str());
                let text = serde_json::from_str::<String>(&literal)
                    .unwrap_or_else(|_| quoted.as_str().to_string());
                return (!text.trim().is_empty()).then_some(Value::String(text));
            }
            caps.get(2).map(|m| coerce_scalar(m.as_str()))
        })
    }
}

/// Outcome of a harvest over every declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    /// Matched values plus defaults for the rest.
    pub object: Map<String, Value>,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
}

pub fn harvest(raw: &str, fields: &[CriticalField]) -> Harvest {
    let mut object = Map::new();
    let mut matched = Vec::new();
    let mut missing = Vec::new();

    for field in fields {
        match field.find_in(raw) {
            Some(v) => {
                object.insert(field.name.clone(), v);
                matched.push(field.name.clone());
            }
            None => {
                object.insert(field.name.clone(), field.default.clone());
                missing.push(field.name.clone());
            }
        }
    }

    Harvest {
        object,
        matched,
        missing,
    }
}

/// Unquoted scalar: integer, float, bool, null, else the trimmed text.
fn coerce_scalar(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        other => Value::String(other.to_string()),
    }
}
