// src/providers/gemini.rs
//! Generative-model source (Gemini `generateContent`). Returns the model's
//! free text untouched; the resolver runs it through the recovery parser.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GeminiSettings;
use crate::error::SourceError;
use crate::source::{RawResult, SourceOperation};

const API_KEY_HEADER: &str = "x-goog-api-key";

pub type PromptBuilder<Req> = Arc<dyn Fn(&Req) -> String + Send + Sync>;

pub struct GeminiSource<Req> {
    http: reqwest::Client,
    settings: GeminiSettings,
    prompt: PromptBuilder<Req>,
}

impl<Req> GeminiSource<Req> {
    /// `prompt` turns a request into the text sent to the model.
    pub fn new(
        settings: GeminiSettings,
        prompt: impl Fn(&Req) -> String + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("portfolio-resilience/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self {
            http,
            settings,
            prompt: Arc::new(prompt),
        })
    }

    /// Key goes in a header so it never shows up in URLs, logs or warnings.
    fn post(&self, prompt: &str) -> reqwest::RequestBuilder {
        self.http
            .post(&self.settings.api_url)
            .header(API_KEY_HEADER, self.settings.api_key.as_str())
            .json(&self.request_body(prompt))
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                top_k: self.settings.top_k,
                top_p: self.settings.top_p,
                max_output_tokens: self.settings.max_output_tokens,
            },
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}
#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}
#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}
#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}
#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Text of the first candidate; `None` when the model returned nothing usable.
pub(crate) fn first_candidate_text(resp: &GenerateResponse) -> Option<String> {
    let parts = &resp.candidates.first()?.content.as_ref()?.parts;
    let text: String = parts.iter().map(|p| p.text.as_str()).collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl<Req, T> SourceOperation<Req, T> for GeminiSource<Req>
where
    Req: Sync,
    T: Send,
{
    async fn call(&self, request: &Req) -> Result<RawResult<T>, SourceError> {
        if self.settings.api_key.is_empty() {
            return Err(SourceError::terminal("gemini: missing API key"));
        }

        let prompt = (self.prompt)(request);
        let resp = self
            .post(&prompt)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, "gemini"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status.as_u16(), "gemini"));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::from_reqwest(e, "gemini body"))?;

        first_candidate_text(&body)
            .map(RawResult::Text)
            .ok_or_else(|| SourceError::terminal("gemini: no candidates in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_camel_case_generation_config() {
        let src: GeminiSource<()> =
            GeminiSource::new(GeminiSettings::default(), |_| "hi".to_string()).unwrap();
        let prompt = "analyze";
        let v = serde_json::to_value(src.request_body(prompt)).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "analyze");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(v["generationConfig"]["topK"], 40);
    }

    #[test]
    fn candidate_text_is_joined() {
        let resp: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":" 1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(first_candidate_text(&resp).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn empty_candidates_yield_none() {
        let resp: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(first_candidate_text(&resp), None);
        let resp: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(first_candidate_text(&resp), None);
    }

    #[test]
    fn key_travels_in_header_not_url() {
        let mut settings = GeminiSettings::default();
        settings.api_key = "SECRETKEY123".into();
        let src: GeminiSource<()> = GeminiSource::new(settings, |_| String::new()).unwrap();
        let req = src.post("hi").build().unwrap();
        assert!(req.url().query().is_none());
        assert!(!req.url().as_str().contains("SECRETKEY123"));
        assert_eq!(req.headers()[API_KEY_HEADER], "SECRETKEY123");
    }

    #[tokio::test]
    async fn transport_error_does_not_echo_the_key() {
        let settings = GeminiSettings {
            api_url: "http://127.0.0.1:1/v1/models/x:generateContent?key=SECRETKEY123".into(),
            api_key: "SECRETKEY123".into(),
            ..GeminiSettings::default()
        };
        let src: GeminiSource<()> = GeminiSource::new(settings, |_| String::new()).unwrap();
        let op: &dyn SourceOperation<(), serde_json::Value> = &src;
        let err = op.call(&()).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
        assert!(!err.to_string().contains("SECRETKEY123"), "{err}");
    }

    #[tokio::test]
    async fn missing_key_is_terminal() {
        let mut settings = GeminiSettings::default();
        settings.api_key.clear();
        let src: GeminiSource<()> = GeminiSource::new(settings, |_| String::new()).unwrap();
        let op: &dyn SourceOperation<(), serde_json::Value> = &src;
        let err = op.call(&()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
