// src/recovery/mod.rs
//! Recovery of one JSON object from free text (typically generative-model output).
//!
//! Cascade of decreasing strictness, stopping at the first stage whose object
//! passes the caller's shape check:
//! 1. direct parse of the whole input
//! 2. first `{ ... }` found by brace-depth counting
//! 3. syntax repair of that candidate (see `repair`)
//! 4. regex harvest of declared critical fields, defaults for the rest
//!
//! Stages 1-2 are clean; 3-4 mark the result degraded. If nothing matches at
//! all the value is `None`. `extract` never fails.

pub mod fields;
pub mod repair;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::telemetry::{self, text_id, SharedTelemetry};

pub use fields::CriticalField;
pub use repair::RepairStep;

/// Which stage produced the value (or `Failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    Direct,
    Substring,
    Repair,
    FieldExtraction,
    Failed,
}

impl RecoveryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStage::Direct => "direct",
            RecoveryStage::Substring => "substring",
            RecoveryStage::Repair => "repair",
            RecoveryStage::FieldExtraction => "field_extraction",
            RecoveryStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ShapePredicate = Arc<dyn Fn(&Map<String, Value>) -> bool + Send + Sync>;

/// What the caller expects the top-level object to look like.
#[derive(Clone, Default)]
pub struct ParserConfig {
    required_keys: Vec<String>,
    shape: Option<ShapePredicate>,
    critical_fields: Vec<CriticalField>,
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_key(mut self, key: impl Into<String>) -> Self {
        self.required_keys.push(key.into());
        self
    }

    /// Extra check on top of `require_key`.
    pub fn with_shape(
        mut self,
        f: impl Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.shape = Some(Arc::new(f));
        self
    }

    pub fn critical_field(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.critical_fields.push(CriticalField::new(name, default));
        self
    }

    pub fn critical_fields(&self) -> &[CriticalField] {
        &self.critical_fields
    }

    pub fn matches(&self, obj: &Map<String, Value>) -> bool {
        self.required_keys.iter().all(|k| obj.contains_key(k))
            && self.shape.as_ref().map_or(true, |f| f(obj))
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("required_keys", &self.required_keys)
            .field("custom_shape", &self.shape.is_some())
            .field(
                "critical_fields",
                &self.critical_fields.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Result of `ResponseRecoveryParser::extract`.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: Option<Value>,
    pub degraded: bool,
    pub warnings: Vec<String>,
    pub stage: RecoveryStage,
}

impl Extraction {
    fn clean(obj: Map<String, Value>, stage: RecoveryStage) -> Self {
        Self {
            value: Some(Value::Object(obj)),
            degraded: false,
            warnings: Vec::new(),
            stage,
        }
    }

    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }
}

/// Location of the first JSON-looking object in a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectSpan<'a> {
    /// First `{` through its matching `}`.
    Closed(&'a str),
    /// First `{` through the last value token; the object never closed.
    /// Prose or a code fence after that token is left out.
    Open(&'a str),
}

impl<'a> ObjectSpan<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            ObjectSpan::Closed(s) | ObjectSpan::Open(s) => s,
        }
    }
}

/// Find the first `{` and its partner by brace-depth counting. Braces inside
/// string literals do not count, so prose after the object is left out.
pub fn find_object_span(text: &str) -> Option<ObjectSpan<'_>> {
    let start = text.find('{')?;
    let body = &text[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    // byte offset just past the last `}`, `]`, closing quote, digit or literal
    let mut value_end = 0usize;
    let mut word_start: Option<usize> = None;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                value_end = i + 1;
            }
            continue;
        }
        if c.is_ascii_alphabetic() {
            word_start.get_or_insert(i);
            continue;
        }
        if let Some(ws) = word_start.take() {
            if is_literal(&body[ws..i]) {
                value_end = i;
            }
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(ObjectSpan::Closed(&body[..i + 1]));
                }
                value_end = i + 1;
            }
            ']' => value_end = i + 1,
            c if c.is_ascii_digit() => value_end = i + 1,
            _ => {}
        }
    }
    if let Some(ws) = word_start {
        if is_literal(&body[ws..]) {
            value_end = body.len();
        }
    }

    // Inside a string or only structure after the last value: the repair
    // steps know how to close that off, so keep everything.
    let tail = &body[value_end..];
    let structural_only = tail
        .chars()
        .all(|c| c.is_whitespace() || matches!(c, ',' | ':' | '[' | '{'));
    if in_string || structural_only {
        return Some(ObjectSpan::Open(body));
    }
    Some(ObjectSpan::Open(&body[..value_end]))
}

fn is_literal(word: &str) -> bool {
    matches!(word, "true" | "false" | "null")
}

pub struct ResponseRecoveryParser {
    config: ParserConfig,
    telemetry: SharedTelemetry,
}

impl Default for ResponseRecoveryParser {
    fn default() -> Self {
        Self::new(ParserConfig::default(), telemetry::noop())
    }
}

impl ResponseRecoveryParser {
    pub fn new(config: ParserConfig, telemetry: SharedTelemetry) -> Self {
        Self { config, telemetry }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn extract(&self, raw: &str) -> Extraction {
        let id = text_id(raw);

        // 1) Whole input.
        let direct = self.accept(raw.trim());
        self.telemetry
            .stage_attempted(&id, RecoveryStage::Direct, direct.is_some());
        if let Some(obj) = direct {
            return Extraction::clean(obj, RecoveryStage::Direct);
        }

        // 2) First balanced object inside the prose.
        let span = find_object_span(raw);
        if let Some(ObjectSpan::Closed(s)) = span {
            let sub = self.accept(s);
            self.telemetry
                .stage_attempted(&id, RecoveryStage::Substring, sub.is_some());
            if let Some(obj) = sub {
                return Extraction::clean(obj, RecoveryStage::Substring);
            }
        }

        // 3) Repair the candidate, cheapest fix first.
        if let Some(candidate) = span.map(|s| s.as_str()) {
            let repaired = self.repair(candidate);
            self.telemetry
                .stage_attempted(&id, RecoveryStage::Repair, repaired.is_some());
            if let Some((obj, fired)) = repaired {
                let names: Vec<&str> = fired.iter().map(|s| s.name()).collect();
                return Extraction {
                    value: Some(Value::Object(obj)),
                    degraded: true,
                    warnings: vec![format!("repaired malformed JSON ({})", names.join(", "))],
                    stage: RecoveryStage::Repair,
                };
            }
        }

        // 4) Harvest critical fields straight from the raw text.
        let harvest = fields::harvest(raw, &self.config.critical_fields);
        let found = !harvest.matched.is_empty();
        self.telemetry
            .stage_attempted(&id, RecoveryStage::FieldExtraction, found);

        let mut warnings: Vec<String> = harvest
            .missing
            .iter()
            .map(|f| format!("critical field `{f}` not found; using default"))
            .collect();

        if found {
            return Extraction {
                value: Some(Value::Object(harvest.object)),
                degraded: true,
                warnings,
                stage: RecoveryStage::FieldExtraction,
            };
        }

        // 5) Nothing usable.
        warnings.push("total parse failure: no JSON object or critical field recovered".into());
        Extraction {
            value: None,
            degraded: false,
            warnings,
            stage: RecoveryStage::Failed,
        }
    }

    /// Run the repair steps cumulatively, re-parsing after every step that changed the text.
    fn repair(&self, candidate: &str) -> Option<(Map<String, Value>, Vec<RepairStep>)> {
        let mut text = candidate.to_string();
        let mut fired = Vec::new();
        for step in RepairStep::ORDER {
            let next = step.apply(&text);
            if next == text {
                continue;
            }
            fired.push(step);
            text = next;
            if let Some(obj) = self.accept(&text) {
                return Some((obj, fired));
            }
        }
        None
    }

    fn accept(&self, text: &str) -> Option<Map<String, Value>> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(obj)) if self.config.matches(&obj) => Some(obj),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> ResponseRecoveryParser {
        ResponseRecoveryParser::default()
    }

    #[test]
    fn span_ignores_braces_in_strings_and_trailing_prose() {
        let t = r#"Sure! {"a": "}{", "b": {"c": 1}} Hope this helps {x}"#;
        assert_eq!(
            find_object_span(t),
            Some(ObjectSpan::Closed(r#"{"a": "}{", "b": {"c": 1}}"#))
        );
    }

    #[test]
    fn span_open_when_truncated() {
        assert_eq!(
            find_object_span(r#"x {"a": {"b": 1}"#),
            Some(ObjectSpan::Open(r#"{"a": {"b": 1}"#))
        );
        assert_eq!(find_object_span("no braces"), None);
    }

    #[test]
    fn open_span_drops_trailing_prose() {
        assert_eq!(
            find_object_span("{\"a\": {\"b\": 1}\n```\nLet me know!"),
            Some(ObjectSpan::Open(r#"{"a": {"b": 1}"#))
        );
        assert_eq!(
            find_object_span("{\"ok\": true\nThat is all."),
            Some(ObjectSpan::Open(r#"{"ok": true"#))
        );
        // dangling structure stays for the repair steps
        assert_eq!(
            find_object_span(r#"{"a": 1, "b": ["#),
            Some(ObjectSpan::Open(r#"{"a": 1, "b": ["#))
        );
    }

    #[test]
    fn truncated_object_followed_by_fence_is_repaired() {
        let out = parser().extract("{\"a\": {\"b\": 1}\n```\nLet me know!");
        assert_eq!(out.value, Some(json!({"a": {"b": 1}})));
        assert_eq!(out.stage, RecoveryStage::Repair);
        assert!(out.degraded);
        assert_eq!(out.warnings, vec!["repaired malformed JSON (bracket balancing)"]);
    }

    #[test]
    fn direct_parse_is_clean() {
        let out = parser().extract(r#"  {"a": 1}  "#);
        assert_eq!(out.value, Some(json!({"a": 1})));
        assert_eq!(out.stage, RecoveryStage::Direct);
        assert!(!out.degraded);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn fenced_block_is_substring_stage() {
        let out = parser().extract("```json\n{\"a\": [1, 2]}\n```");
        assert_eq!(out.value, Some(json!({"a": [1, 2]})));
        assert_eq!(out.stage, RecoveryStage::Substring);
        assert!(!out.degraded);
    }

    #[test]
    fn non_object_top_level_is_not_accepted_directly() {
        let p = ResponseRecoveryParser::new(
            ParserConfig::new().critical_field("overall_score", 6),
            telemetry::noop(),
        );
        let out = p.extract("[1, 2, 3]");
        assert_eq!(out.value, None);
        assert_eq!(out.stage, RecoveryStage::Failed);
    }

    #[test]
    fn truncated_string_and_brackets() {
        let raw = r#"{"portfolio_health": {"overall_score": 7, "key_strengths": ["Diversified", "Long-ter"#;
        let out = parser().extract(raw);
        assert!(out.degraded);
        assert_eq!(out.stage, RecoveryStage::Repair);
        let v = out.value.unwrap();
        assert_eq!(v["portfolio_health"]["overall_score"], json!(7));
        assert_eq!(v["portfolio_health"]["key_strengths"], json!(["Diversified"]));
        assert!(out.warnings[0].contains("dangling-string truncation"));
        assert!(out.warnings[0].contains("bracket balancing"));
    }

    #[test]
    fn shape_mismatch_falls_through_to_fields() {
        let p = ResponseRecoveryParser::new(
            ParserConfig::new()
                .require_key("portfolio_health")
                .critical_field("overall_score", 6)
                .critical_field("overall_risk", "medium"),
            telemetry::noop(),
        );
        let out = p.extract(r#"{"overall_score": 8, "overall_risk": "low"}"#);
        assert_eq!(out.stage, RecoveryStage::FieldExtraction);
        assert!(out.degraded);
        assert_eq!(
            out.value,
            Some(json!({"overall_score": 8, "overall_risk": "low"}))
        );
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn custom_shape_predicate() {
        let p = ResponseRecoveryParser::new(
            ParserConfig::new().with_shape(|o| o.get("price").and_then(Value::as_f64).is_some()),
            telemetry::noop(),
        );
        assert!(p.extract(r#"{"price": 101000}"#).is_success());
        assert!(!p.extract(r#"{"price": "n/a"}"#).is_success());
    }

    #[test]
    fn repair_only_reports_steps_that_changed_text() {
        let out = parser().extract(r#"Result: {"a": [1, 2,], "b": 3,} done"#);
        assert_eq!(out.value, Some(json!({"a": [1, 2], "b": 3})));
        assert_eq!(out.warnings, vec!["repaired malformed JSON (trailing-comma removal)"]);
    }
}
