//! # Event Classifier Provider
//! Remote event-probability model behind a small trait so the extractor can
//! run against the real chat-completions backend, a deterministic mock, or a
//! failing stub in fault tests.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::sentiment::prefix_chars;
use crate::resilience::CallError;
use crate::types::EventDistribution;

/// Remote classifier contract. Implementations map transport trouble to
/// `CallError::Transient` and contract violations to `CallError::Malformed`;
/// the extractor's fallback chain handles both.
#[async_trait]
pub trait EventClassifier: Send + Sync {
    async fn classify(&self, title: &str, content: &str) -> Result<EventDistribution, CallError>;
    fn name(&self) -> &'static str;
}

/// First JSON object in a completion; models love to wrap JSON in prose.
static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("valid JSON-object regex"));

const PROMPT_TITLE_CHARS: usize = 200;
const PROMPT_CONTENT_CHARS: usize = 800;

/// Chat-completions backed classifier. Requires an API key; endpoint and
/// model are injectable so tests and alternative backends can redirect it.
pub struct HttpEventClassifier {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpEventClassifier {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("crypto-narrative-analyzer/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build from `CLASSIFIER_API_URL` / `CLASSIFIER_API_KEY` /
    /// `CLASSIFIER_MODEL`, with the usual hosted defaults.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("CLASSIFIER_API_URL")
            .unwrap_or_else(|_| "https://api.groq.com/openai/v1/chat/completions".to_string());
        let api_key = std::env::var("CLASSIFIER_API_KEY").unwrap_or_default();
        let model =
            std::env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| "llama-3.1-8b-instant".to_string());
        Self::new(endpoint, api_key, model)
    }

    fn prompt(title: &str, content: &str) -> String {
        format!(
            "Classify this crypto article into event types. Return ONLY valid JSON.\n\n\
             Article Title: {}\n\
             Content: {}\n\n\
             Event Types:\n\
             - listing: exchange listings, new trading pairs\n\
             - partnership: business partnerships, collaborations\n\
             - hack: security breaches, exploits, stolen funds\n\
             - depeg: stablecoin losing peg, price stability issues\n\
             - regulatory: government regulations, legal news\n\
             - funding: investment rounds, fundraising\n\
             - tech: technical updates, upgrades, launches\n\
             - market-note: market analysis, price movements\n\
             - op-ed: opinion pieces, editorials\n\n\
             Return probabilities (0.0-1.0, summing to 1.0) as:\n\
             {{\"listing\": 0.0, \"partnership\": 0.0, \"hack\": 0.0, \"depeg\": 0.0, \
             \"regulatory\": 0.0, \"funding\": 0.0, \"tech\": 0.0, \"market-note\": 0.0, \
             \"op-ed\": 0.0}}",
            prefix_chars(title, PROMPT_TITLE_CHARS),
            prefix_chars(content, PROMPT_CONTENT_CHARS),
        )
    }

    fn parse_completion(text: &str) -> Result<EventDistribution, CallError> {
        if let Ok(dist) = serde_json::from_str::<EventDistribution>(text.trim()) {
            return Ok(dist);
        }
        for m in JSON_OBJECT.find_iter(text) {
            if let Ok(dist) = serde_json::from_str::<EventDistribution>(m.as_str()) {
                return Ok(dist);
            }
        }
        Err(CallError::malformed(format!(
            "no event-probability JSON in completion: {}",
            prefix_chars(text, 120)
        )))
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl EventClassifier for HttpEventClassifier {
    async fn classify(&self, title: &str, content: &str) -> Result<EventDistribution, CallError> {
        if self.api_key.is_empty() {
            return Err(CallError::transient("classifier API key not configured"));
        }

        let prompt = Self::prompt(title, content);
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.1,
            max_tokens: 300,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CallError::transient(format!("classifier request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CallError::transient(format!("classifier status {status}")));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CallError::malformed(format!("classifier body: {e}")))?;
        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| CallError::malformed("classifier returned no completion"))?;

        debug!(chars = text.len(), "classifier completion received");
        Self::parse_completion(text)
    }

    fn name(&self) -> &'static str {
        "http-chat"
    }
}

/// Deterministic classifier for tests and offline runs: serves a fixed
/// distribution, or fails every call when built with [`MockClassifier::failing`].
pub struct MockClassifier {
    fixed: Option<EventDistribution>,
}

impl MockClassifier {
    pub fn fixed(dist: EventDistribution) -> Self {
        Self { fixed: Some(dist) }
    }

    pub fn failing() -> Self {
        Self { fixed: None }
    }
}

#[async_trait]
impl EventClassifier for MockClassifier {
    async fn classify(&self, _title: &str, _content: &str) -> Result<EventDistribution, CallError> {
        match &self.fixed {
            Some(dist) => Ok(*dist),
            None => Err(CallError::transient("mock classifier down")),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    #[test]
    fn completion_parse_handles_bare_json() {
        let text = r#"{"listing": 0.8, "hack": 0.2, "partnership": 0.0, "depeg": 0.0,
            "regulatory": 0.0, "funding": 0.0, "tech": 0.0, "market-note": 0.0, "op-ed": 0.0}"#;
        let dist = HttpEventClassifier::parse_completion(text).unwrap();
        assert!((dist.get(EventKind::Listing) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn completion_parse_digs_json_out_of_prose() {
        let text = "Sure! Here is the classification:\n{\"hack\": 1.0}\nLet me know if...";
        let dist = HttpEventClassifier::parse_completion(text).unwrap();
        assert_eq!(dist.get(EventKind::Hack), 1.0);
    }

    #[test]
    fn completion_without_json_is_malformed() {
        let err = HttpEventClassifier::parse_completion("I cannot classify this.").unwrap_err();
        assert!(matches!(err, CallError::Malformed(_)));
    }

    #[test]
    fn prompt_truncates_long_inputs() {
        let p = HttpEventClassifier::prompt(&"t".repeat(500), &"c".repeat(5000));
        assert!(p.len() < 2500);
    }

    #[tokio::test]
    async fn mock_classifier_modes() {
        let ok = MockClassifier::fixed(EventDistribution::single(EventKind::Listing));
        assert!(ok.classify("a", "b").await.is_ok());

        let down = MockClassifier::failing();
        assert!(down.classify("a", "b").await.is_err());
    }
}
