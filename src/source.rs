// src/source.rs
//! One named strategy in the fallback chain: static settings, the async
//! operation that does the real work, and the predicate that vets its output.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::rate_gate::RateGate;

/// What a source operation hands back before any validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult<T> {
    /// Already typed (e.g. a decoded JSON quote).
    Data(T),
    /// Free text expected to contain one JSON object (generative models).
    Text(String),
}

/// The fetch/call a source performs. Implementations should only fail with
/// transport-layer problems, classified as transient or terminal.
#[async_trait]
pub trait SourceOperation<Req, T>: Send + Sync {
    async fn call(&self, request: &Req) -> Result<RawResult<T>, SourceError>;
}

pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Static settings of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub name: String,
    /// Lower is tried first.
    pub priority: i32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub max_retries: u32,
    /// Ceiling confidence this source may report (0.0..=1.0).
    pub base_confidence: f64,
    /// Minimum spacing between calls, shared by all callers of this source.
    pub min_interval: Option<Duration>,
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, priority: i32, base_confidence: f64) -> Self {
        Self {
            name: name.into(),
            priority,
            timeout: Duration::from_secs(10),
            max_retries: 2,
            base_confidence,
            min_interval: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }
}

pub struct Source<Req, T> {
    spec: SourceSpec,
    gate: Option<RateGate>,
    operation: Arc<dyn SourceOperation<Req, T>>,
    validator: Validator<T>,
}

impl<Req: 'static, T: 'static> Source<Req, T> {
    /// Accepts every value until `with_validator` says otherwise.
    pub fn new(spec: SourceSpec, operation: impl SourceOperation<Req, T> + 'static) -> Self {
        Self::from_arc(spec, Arc::new(operation))
    }

    pub fn from_arc(spec: SourceSpec, operation: Arc<dyn SourceOperation<Req, T>>) -> Self {
        let gate = spec.min_interval.map(RateGate::new);
        Self {
            spec,
            gate,
            operation,
            validator: Arc::new(|_: &T| true),
        }
    }

    /// Semantic check on a structurally valid value (e.g. `price > 0`).
    pub fn with_validator(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Arc::new(f);
        self
    }

    /// Share an existing gate, e.g. two sources backed by the same rate-limited API.
    pub fn with_gate(mut self, gate: RateGate) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl<Req, T> Source<Req, T> {
    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn gate(&self) -> Option<&RateGate> {
        self.gate.as_ref()
    }

    pub fn accepts(&self, value: &T) -> bool {
        (self.validator)(value)
    }

    pub(crate) fn operation(&self) -> &Arc<dyn SourceOperation<Req, T>> {
        &self.operation
    }
}

impl<Req, T> fmt::Debug for Source<Req, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("spec", &self.spec)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}
