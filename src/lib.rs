// src/lib.rs
// Public library surface for the advisory job and integration tests.

pub mod advisory;
pub mod cancel;
pub mod config;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod rate_gate;
pub mod recovery;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod telemetry;

// Concrete source operations (HTTP quotes, Gemini, scripted/test doubles)
pub mod providers;

// ---- Re-exports for stable public API ----
pub use crate::cancel::CancelSignal;
pub use crate::envelope::ConfidenceEnvelope;
pub use crate::error::{Failure, FailureKind, SourceError};
pub use crate::recovery::{Extraction, ParserConfig, RecoveryStage, ResponseRecoveryParser};
pub use crate::resolver::{FallbackResolver, FallbackResolverBuilder, ResolverSettings};
pub use crate::retry::{RetryPolicy, RetryingInvoker};
pub use crate::source::{RawResult, Source, SourceOperation, SourceSpec};
pub use crate::telemetry::{SharedTelemetry, Telemetry};
