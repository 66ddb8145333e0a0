// src/advisory.rs
//! Portfolio-advisory domain pieces: quote and advisory request types, the
//! shapes the model output must have, static defaults, and the two resolvers
//! the advisory job uses (quotes and portfolio commentary).

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::{ResilienceConfig, SourceKind, SourceSettings};
use crate::providers::{GeminiSource, QuoteHttpSource};
use crate::recovery::ParserConfig;
use crate::resolver::{FallbackResolver, FallbackResolverBuilder};
use crate::source::Source;
use crate::telemetry::SharedTelemetry;

pub const DEFAULT_EXCHANGE: &str = "HOSE";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub ticker: String,
    pub exchange: String,
}

impl QuoteRequest {
    /// Upper-cases the ticker; exchange defaults to HOSE.
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.trim().to_ascii_uppercase(),
            exchange: DEFAULT_EXCHANGE.to_string(),
        }
    }

    pub fn on(mut self, exchange: &str) -> Self {
        self.exchange = exchange.trim().to_ascii_uppercase();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    #[serde(default)]
    pub exchange: String,
    pub price: f64,
    #[serde(default)]
    pub change: f64,
    #[serde(default)]
    pub change_pct: f64,
    #[serde(default)]
    pub volume: u64,
}

impl Quote {
    /// Placeholder carried by the terminal envelope when no source could price the ticker.
    pub fn unavailable() -> Self {
        Self {
            ticker: String::new(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            price: 0.0,
            change: 0.0,
            change_pct: 0.0,
            volume: 0,
        }
    }

    /// A price must be positive and finite to be worth forwarding.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// What the advisory job sends to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryRequest {
    pub owner: String,
    /// "long_term" | "short_term"
    pub mode: String,
    /// Portfolio summary as loaded by the caller.
    pub portfolio: Value,
}

/// Prompt asking for one JSON object with the advisory keys.
pub fn portfolio_prompt(req: &AdvisoryRequest) -> String {
    let portfolio = serde_json::to_string_pretty(&req.portfolio).unwrap_or_else(|_| "{}".into());
    format!(
        "You are a portfolio advisor ({mode} horizon) for {owner}.\n\
         Analyze the portfolio below and reply with ONE JSON object only, with keys\n\
         \"portfolio_health\" {{\"overall_score\" 1-10, \"health_status\", \"key_strengths\", \"key_weaknesses\"}},\n\
         \"risk_assessment\" {{\"overall_risk\" low|medium|high}}, \"action_items\" [...].\n\n\
         Portfolio:\n{portfolio}\n",
        mode = req.mode,
        owner = req.owner,
    )
}

/// Model estimate prompt for a single quote.
pub fn quote_prompt(req: &QuoteRequest) -> String {
    format!(
        "Estimate the latest close for {} on {}. Reply with ONE JSON object: \
         {{\"ticker\": \"{}\", \"exchange\": \"{}\", \"price\": <number>}}",
        req.ticker, req.exchange, req.ticker, req.exchange
    )
}

/// Parser expectations for portfolio commentary.
pub fn advisory_parser_config() -> ParserConfig {
    ParserConfig::new()
        .with_shape(|o: &Map<String, Value>| {
            o.contains_key("portfolio_health") || o.contains_key("overall_score")
        })
        .critical_field("overall_score", 6)
        .critical_field("overall_risk", "medium")
        .critical_field("health_status", "fair")
}

/// Parser expectations for a quote estimate.
pub fn quote_parser_config() -> ParserConfig {
    ParserConfig::new()
        .require_key("price")
        .critical_field("ticker", "")
        .critical_field("price", 0.0)
}

/// Static commentary used when every advisory source failed.
pub fn fallback_advisory() -> Value {
    json!({
        "portfolio_health": {
            "overall_score": 6,
            "health_status": "fair",
            "key_strengths": ["Diversified holdings", "Long-term focus"],
            "key_weaknesses": ["Analysis temporarily unavailable"]
        },
        "diversification": {
            "score": 6,
            "concentration_risk": "medium",
            "recommendations": ["Monitor sector allocation", "Consider rebalancing"]
        },
        "action_items": [{
            "action": "monitor",
            "ticker": "all",
            "priority": "medium",
            "rationale": "AI analysis temporarily unavailable, maintain current positions",
            "timeline": "daily"
        }],
        "fallback": true,
        "error": "AI analysis temporarily unavailable"
    })
}

/// Resolver for quotes from every `quote_http`/`gemini` source in the config.
/// `extra` lets the caller add custom sources (e.g. a scrape) before building.
pub fn quote_resolver(
    cfg: &ResilienceConfig,
    telemetry: SharedTelemetry,
    extra: Vec<Source<QuoteRequest, Quote>>,
) -> Result<FallbackResolver<QuoteRequest, Quote>> {
    let mut builder = base_builder(cfg, telemetry, Quote::unavailable()).parser(quote_parser_config());
    for settings in &cfg.sources {
        let source = match settings.kind {
            SourceKind::QuoteHttp => {
                let Some(endpoint) = settings.endpoint.as_deref() else {
                    bail!("source `{}`: quote_http needs an endpoint", settings.name);
                };
                Source::new(settings.to_spec(), QuoteHttpSource::new(endpoint)?)
            }
            SourceKind::Gemini => Source::new(
                settings.to_spec(),
                GeminiSource::new(cfg.gemini.clone(), quote_prompt)?,
            ),
            SourceKind::Custom => continue,
        };
        builder = builder.source(source.with_validator(Quote::is_valid));
    }
    for source in extra {
        builder = builder.source(source);
    }
    builder.build()
}

/// Resolver for portfolio commentary from the configured `gemini` sources.
pub fn advisory_resolver(
    cfg: &ResilienceConfig,
    telemetry: SharedTelemetry,
) -> Result<FallbackResolver<AdvisoryRequest, Value>> {
    let mut builder = base_builder(cfg, telemetry, fallback_advisory()).parser(advisory_parser_config());
    for settings in cfg.sources.iter().filter(|s| s.kind == SourceKind::Gemini) {
        builder = builder.source(gemini_advisory_source(cfg, settings)?);
    }
    builder.build()
}

fn gemini_advisory_source(
    cfg: &ResilienceConfig,
    settings: &SourceSettings,
) -> Result<Source<AdvisoryRequest, Value>> {
    let op = GeminiSource::new(cfg.gemini.clone(), portfolio_prompt)?;
    Ok(Source::new(settings.to_spec(), op).with_validator(Value::is_object))
}

fn base_builder<Req, T>(
    cfg: &ResilienceConfig,
    telemetry: SharedTelemetry,
    default: T,
) -> FallbackResolverBuilder<Req, T> {
    FallbackResolverBuilder::new(default)
        .retry_policy(cfg.retry_policy())
        .settings(cfg.resolver_settings())
        .telemetry(telemetry)
}
