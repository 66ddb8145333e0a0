// src/providers/quote_http.rs
//! JSON quote endpoint: `GET {base_url}/{TICKER}?exchange=...`.
//!
//! Accepts either a plain quote object or the daily-price wrapper
//! `{"data": [{"ClosePrice": ..., "PriceChange": ..., ...}]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::advisory::{Quote, QuoteRequest};
use crate::error::SourceError;
use crate::source::{RawResult, SourceOperation};

pub struct QuoteHttpSource {
    http: reqwest::Client,
    base_url: String,
}

impl QuoteHttpSource {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("portfolio-resilience/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, req: &QuoteRequest) -> String {
        format!("{}/{}", self.base_url, req.ticker)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuotePayload {
    Wrapped { data: Vec<DailyPriceRow> },
    Plain(Quote),
}

#[derive(Debug, Deserialize)]
struct DailyPriceRow {
    #[serde(rename = "ClosePrice")]
    close_price: f64,
    #[serde(rename = "PriceChange", default)]
    price_change: f64,
    #[serde(rename = "PerPriceChange", default)]
    per_price_change: f64,
    #[serde(rename = "TotalMatchVol", default)]
    total_match_vol: u64,
}

/// Decode a response body into a quote for `req`.
pub fn parse_quote_body(req: &QuoteRequest, body: &str) -> Result<Quote, SourceError> {
    let payload: QuotePayload = serde_json::from_str(body)
        .map_err(|e| SourceError::terminal(format!("quote payload: {e}")))?;
    match payload {
        QuotePayload::Wrapped { data } => {
            let row = data
                .into_iter()
                .next()
                .ok_or_else(|| SourceError::not_found(format!("price data for {}", req.ticker)))?;
            Ok(Quote {
                ticker: req.ticker.clone(),
                exchange: req.exchange.clone(),
                price: row.close_price,
                change: row.price_change,
                change_pct: row.per_price_change,
                volume: row.total_match_vol,
            })
        }
        QuotePayload::Plain(mut q) => {
            if q.exchange.is_empty() {
                q.exchange = req.exchange.clone();
            }
            Ok(q)
        }
    }
}

#[async_trait]
impl SourceOperation<QuoteRequest, Quote> for QuoteHttpSource {
    async fn call(&self, request: &QuoteRequest) -> Result<RawResult<Quote>, SourceError> {
        let resp = self
            .http
            .get(self.url_for(request))
            .query(&[("exchange", request.exchange.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, "quote"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status.as_u16(),
                &format!("quote {}", request.ticker),
            ));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::from_reqwest(e, "quote body"))?;
        if body.trim().is_empty() {
            return Err(SourceError::not_found(format!("quote for {}", request.ticker)));
        }
        parse_quote_body(request, &body).map(RawResult::Data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_daily_price() {
        let req = QuoteRequest::new("vcb");
        let body = r#"{"data":[{"ClosePrice": 55500, "PriceChange": 500, "PerPriceChange": 0.91, "TotalMatchVol": 1200000}]}"#;
        let q = parse_quote_body(&req, body).unwrap();
        assert_eq!(q.ticker, "VCB");
        assert_eq!(q.exchange, "HOSE");
        assert_eq!(q.price, 55_500.0);
        assert_eq!(q.volume, 1_200_000);
    }

    #[test]
    fn empty_data_is_not_found() {
        let req = QuoteRequest::new("XYZ");
        let err = parse_quote_body(&req, r#"{"data": []}"#).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().starts_with("not found"));
    }

    #[test]
    fn plain_quote_gets_exchange() {
        let req = QuoteRequest::new("FPT").on("HNX");
        let q = parse_quote_body(&req, r#"{"ticker": "FPT", "price": 101000}"#).unwrap();
        assert_eq!(q.exchange, "HNX");
    }

    #[test]
    fn garbage_is_terminal() {
        let req = QuoteRequest::new("FPT");
        assert!(!parse_quote_body(&req, "<html>").unwrap_err().is_retryable());
    }

    #[test]
    fn url_has_no_double_slash() {
        let src = QuoteHttpSource::new("https://example.invalid/quote/").unwrap();
        assert_eq!(
            src.url_for(&QuoteRequest::new("vnm")),
            "https://example.invalid/quote/VNM"
        );
    }
}
