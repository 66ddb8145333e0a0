// src/config.rs
//! TOML configuration for retry timing, confidence knobs, the source chain and
//! the Gemini endpoint.
//!
//! Lookup: `$RESILIENCE_CONFIG_PATH`, then `config/resilience.toml`, then
//! built-in defaults. `RESILIENCE_DEGRADED_FACTOR` and
//! `RESILIENCE_TERMINAL_CONFIDENCE` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::resolver::{ResolverSettings, DEFAULT_DEGRADED_FACTOR, DEFAULT_TERMINAL_CONFIDENCE};
use crate::retry::RetryPolicy;
use crate::source::SourceSpec;

pub const DEFAULT_CONFIG_PATH: &str = "config/resilience.toml";
pub const ENV_CONFIG_PATH: &str = "RESILIENCE_CONFIG_PATH";
pub const ENV_DEGRADED_FACTOR: &str = "RESILIENCE_DEGRADED_FACTOR";
pub const ENV_TERMINAL_CONFIDENCE: &str = "RESILIENCE_TERMINAL_CONFIDENCE";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";

pub const DEFAULT_GEMINI_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

fn default_base_delay_ms() -> u64 {
    4_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_degraded_factor() -> f64 {
    DEFAULT_DEGRADED_FACTOR
}
fn default_terminal_confidence() -> f64 {
    DEFAULT_TERMINAL_CONFIDENCE
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_gemini_url() -> String {
    DEFAULT_GEMINI_URL.to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_top_k() -> u32 {
    40
}
fn default_top_p() -> f32 {
    0.95
}
fn default_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSettings {
    /// Multiplier for repaired results. The right value is a judgement call; tune per deployment.
    #[serde(default = "default_degraded_factor")]
    pub degraded_factor: f64,
    #[serde(default = "default_terminal_confidence")]
    pub terminal_confidence: f64,
}

impl Default for ConfidenceSettings {
    fn default() -> Self {
        Self {
            degraded_factor: default_degraded_factor(),
            terminal_confidence: default_terminal_confidence(),
        }
    }
}

impl ConfidenceSettings {
    pub fn to_resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            degraded_factor: self.degraded_factor,
            terminal_confidence: self.terminal_confidence,
            ..ResolverSettings::default()
        }
    }
}

/// Which built-in operation backs a configured source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// JSON quote endpoint (`endpoint` = base URL).
    QuoteHttp,
    /// Generative model estimate through the `[gemini]` section.
    Gemini,
    /// Wired up in code by the caller.
    #[default]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub name: String,
    #[serde(default)]
    pub kind: SourceKind,
    pub priority: i32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub base_confidence: f64,
    #[serde(default)]
    pub min_interval_ms: Option<u64>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl SourceSettings {
    pub fn to_spec(&self) -> SourceSpec {
        let mut spec = SourceSpec::new(self.name.clone(), self.priority, self.base_confidence)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_retries(self.max_retries);
        if let Some(ms) = self.min_interval_ms.filter(|ms| *ms > 0) {
            spec = spec.with_min_interval(Duration::from_millis(ms));
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiSettings {
    #[serde(default = "default_gemini_url")]
    pub api_url: String,
    /// "ENV" means: read from GEMINI_API_KEY.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_url: default_gemini_url(),
            api_key: default_api_key(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub confidence: ConfidenceSettings,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
    #[serde(default)]
    pub gemini: GeminiSettings,
}

impl ResilienceConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: ResilienceConfig = toml::from_str(s).context("parsing resilience config")?;
        cfg.finish()?;
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading resilience config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// `.env`, then `$RESILIENCE_CONFIG_PATH`, then `config/resilience.toml`, then defaults.
    pub fn load_default() -> Result<Self> {
        let _ = dotenvy::dotenv();

        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from_file(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from_file(&default_path);
        }
        let mut cfg = Self::default();
        cfg.finish()?;
        Ok(cfg)
    }

    pub fn source(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        self.confidence.to_resolver_settings()
    }

    fn finish(&mut self) -> Result<()> {
        self.apply_env_overrides();
        self.resolve_api_key()
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = parse_unit_env(env::var(ENV_DEGRADED_FACTOR).ok()) {
            self.confidence.degraded_factor = v;
        }
        if let Some(v) = parse_unit_env(env::var(ENV_TERMINAL_CONFIDENCE).ok()) {
            self.confidence.terminal_confidence = v;
        }
    }

    /// Only demanded when a Gemini source is actually configured.
    fn resolve_api_key(&mut self) -> Result<()> {
        if !self.gemini.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(());
        }
        let needed = self.sources.iter().any(|s| s.kind == SourceKind::Gemini);
        match env::var(ENV_GEMINI_API_KEY) {
            Ok(key) => self.gemini.api_key = key,
            Err(_) if needed => {
                return Err(anyhow!("Missing {ENV_GEMINI_API_KEY} env var"));
            }
            Err(_) => self.gemini.api_key.clear(),
        }
        Ok(())
    }
}

// parse optional float env and clamp to <0.0..=1.0>
fn parse_unit_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}
