// src/providers/mod.rs
//! Concrete source operations.

pub mod gemini;
pub mod quote_http;
pub mod scripted;

pub use gemini::GeminiSource;
pub use quote_http::{parse_quote_body, QuoteHttpSource};
pub use scripted::{FnSource, ScriptedSource, Step};
