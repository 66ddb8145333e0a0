// src/resolver.rs
//! Ordered-fallback resolution: try sources by priority, first valid result
//! wins, terminal static default when every source has failed.
//!
//! `resolve` never fails. Per-source problems (exhausted retries, terminal
//! errors, unparseable text, values rejected by validation) become warnings
//! on the returned envelope.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cancel::CancelSignal;
use crate::envelope::ConfidenceEnvelope;
use crate::recovery::{ParserConfig, ResponseRecoveryParser};
use crate::retry::{RetryPolicy, RetryingInvoker};
use crate::source::{RawResult, Source};
use crate::telemetry::{self, SharedTelemetry};

pub const DEFAULT_DEGRADED_FACTOR: f64 = 0.4;
pub const DEFAULT_TERMINAL_CONFIDENCE: f64 = 0.1;
pub const DEFAULT_TERMINAL_NAME: &str = "static-default";

/// Confidence knobs shared by every source of one resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// Multiplier applied to `base_confidence` when the value needed repair.
    pub degraded_factor: f64,
    /// Confidence reported by the terminal default.
    pub terminal_confidence: f64,
    /// `source_name` reported by the terminal default.
    pub terminal_name: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            degraded_factor: DEFAULT_DEGRADED_FACTOR,
            terminal_confidence: DEFAULT_TERMINAL_CONFIDENCE,
            terminal_name: DEFAULT_TERMINAL_NAME.to_string(),
        }
    }
}

pub struct FallbackResolver<Req, T> {
    sources: Arc<Vec<Source<Req, T>>>,
    invoker: RetryingInvoker,
    parser: Arc<ResponseRecoveryParser>,
    default: T,
    settings: ResolverSettings,
    telemetry: SharedTelemetry,
}

impl<Req, T: Clone> Clone for FallbackResolver<Req, T> {
    fn clone(&self) -> Self {
        Self {
            sources: self.sources.clone(),
            invoker: self.invoker.clone(),
            parser: self.parser.clone(),
            default: self.default.clone(),
            settings: self.settings.clone(),
            telemetry: self.telemetry.clone(),
        }
    }
}

struct Accepted<T> {
    value: T,
    degraded: bool,
    notes: Vec<String>,
}

impl<Req, T> FallbackResolver<Req, T>
where
    Req: Sync,
    T: DeserializeOwned + Clone + Send + Sync,
{
    /// `default` is the value wrapped by the terminal envelope.
    pub fn builder(default: T) -> FallbackResolverBuilder<Req, T> {
        FallbackResolverBuilder::new(default)
    }

    /// Sources in the order they will be tried.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub async fn resolve(&self, request: &Req) -> ConfidenceEnvelope<T> {
        self.run(request, None).await
    }

    /// Like `resolve`, but stops starting new attempts once `cancel` is set.
    /// The in-flight attempt is allowed to finish; the terminal default is returned.
    pub async fn resolve_with_cancel(
        &self,
        request: &Req,
        cancel: &CancelSignal,
    ) -> ConfidenceEnvelope<T> {
        self.run(request, Some(cancel)).await
    }

    async fn run(&self, request: &Req, cancel: Option<&CancelSignal>) -> ConfidenceEnvelope<T> {
        let mut warnings = Vec::new();

        for (i, source) in self.sources.iter().enumerate() {
            if cancel.is_some_and(CancelSignal::is_cancelled) {
                warnings.push(format!(
                    "cancelled: skipped {} remaining source(s)",
                    self.sources.len() - i
                ));
                break;
            }

            match self.attempt(source, request, cancel).await {
                Ok(accepted) => {
                    let base = source.spec().base_confidence;
                    let confidence = if accepted.degraded {
                        base * self.settings.degraded_factor
                    } else {
                        base
                    };
                    warnings.extend(accepted.notes);
                    self.telemetry
                        .resolved(source.name(), confidence, accepted.degraded);
                    return ConfidenceEnvelope::resolved(
                        accepted.value,
                        source.name(),
                        confidence,
                        accepted.degraded,
                        warnings,
                    );
                }
                Err(reason) => {
                    self.telemetry.source_rejected(source.name(), &reason);
                    warnings.push(reason);
                }
            }
        }

        self.telemetry.chain_exhausted(warnings.len());
        ConfidenceEnvelope::terminal(
            self.default.clone(),
            self.settings.terminal_name.as_str(),
            self.settings.terminal_confidence,
            warnings,
        )
    }

    /// One source, start to finish. `Err` carries a warning that names the source.
    async fn attempt(
        &self,
        source: &Source<Req, T>,
        request: &Req,
        cancel: Option<&CancelSignal>,
    ) -> std::result::Result<Accepted<T>, String> {
        let name = source.name();
        let raw = self
            .invoker
            .call_with_cancel(source, request, cancel)
            .await
            .map_err(|f| f.to_string())?;

        let accepted = match raw {
            RawResult::Data(value) => Accepted {
                value,
                degraded: false,
                notes: Vec::new(),
            },
            RawResult::Text(text) => {
                let extraction = self.parser.extract(&text);
                let Some(json) = extraction.value else {
                    return Err(format!(
                        "{name}: unrecoverable response: {}",
                        extraction.warnings.join("; ")
                    ));
                };
                if is_empty_value(&json) {
                    return Err(format!("{name}: empty value"));
                }
                let value: T = serde_json::from_value(json)
                    .map_err(|e| format!("{name}: decode failed: {e}"))?;
                Accepted {
                    value,
                    degraded: extraction.degraded,
                    notes: extraction
                        .warnings
                        .into_iter()
                        .map(|w| format!("{name}: {w}"))
                        .collect(),
                }
            }
        };

        if !source.accepts(&accepted.value) {
            return Err(format!("{name}: value rejected by validation"));
        }
        Ok(accepted)
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

pub struct FallbackResolverBuilder<Req, T> {
    sources: Vec<Source<Req, T>>,
    policy: RetryPolicy,
    parser_config: ParserConfig,
    telemetry: SharedTelemetry,
    settings: ResolverSettings,
    default: T,
}

impl<Req, T> FallbackResolverBuilder<Req, T> {
    pub fn new(default: T) -> Self {
        Self {
            sources: Vec::new(),
            policy: RetryPolicy::default(),
            parser_config: ParserConfig::default(),
            telemetry: telemetry::noop(),
            settings: ResolverSettings::default(),
            default,
        }
    }

    /// Registration order breaks priority ties.
    pub fn source(mut self, source: Source<Req, T>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn parser(mut self, config: ParserConfig) -> Self {
        self.parser_config = config;
        self
    }

    pub fn telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn degraded_factor(mut self, factor: f64) -> Self {
        self.settings.degraded_factor = factor;
        self
    }

    pub fn terminal_confidence(mut self, confidence: f64) -> Self {
        self.settings.terminal_confidence = confidence;
        self
    }

    /// Sort by priority (stable) and check the confidence gradient.
    pub fn build(mut self) -> Result<FallbackResolver<Req, T>> {
        let factor = self.settings.degraded_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            bail!("degraded_factor must be in (0, 1], got {factor}");
        }
        let terminal = self.settings.terminal_confidence;
        if !(0.0..=1.0).contains(&terminal) {
            bail!("terminal_confidence must be in [0, 1], got {terminal}");
        }

        let mut seen = HashSet::new();
        for s in &self.sources {
            let spec = s.spec();
            if !seen.insert(spec.name.as_str()) {
                bail!("duplicate source name `{}`", spec.name);
            }
            if !(0.0..=1.0).contains(&spec.base_confidence) {
                bail!(
                    "source `{}`: base_confidence must be in [0, 1], got {}",
                    spec.name,
                    spec.base_confidence
                );
            }
            if spec.timeout.is_zero() {
                bail!("source `{}`: timeout must be positive", spec.name);
            }
            if spec.base_confidence * factor <= terminal {
                bail!(
                    "source `{}`: degraded confidence {:.3} is not above terminal confidence {:.3}",
                    spec.name,
                    spec.base_confidence * factor,
                    terminal
                );
            }
        }

        self.sources.sort_by_key(|s| s.spec().priority);

        for pair in self.sources.windows(2) {
            let (a, b) = (pair[0].spec(), pair[1].spec());
            let ok = if a.priority == b.priority {
                a.base_confidence >= b.base_confidence
            } else {
                a.base_confidence > b.base_confidence
            };
            if !ok {
                bail!(
                    "confidence must decrease with priority: `{}` ({}, prio {}) then `{}` ({}, prio {})",
                    a.name,
                    a.base_confidence,
                    a.priority,
                    b.name,
                    b.base_confidence,
                    b.priority
                );
            }
        }

        Ok(FallbackResolver {
            sources: Arc::new(self.sources),
            invoker: RetryingInvoker::new(self.policy, self.telemetry.clone()),
            parser: Arc::new(ResponseRecoveryParser::new(
                self.parser_config,
                self.telemetry.clone(),
            )),
            default: self.default,
            settings: self.settings,
            telemetry: self.telemetry,
        })
    }
}
