//! Language-model access for fix generation.
//!
//! The fixer depends only on the [`LanguageModel`] capability; production
//! wires a chain of HTTP chat models with rate-limit fallback, tests wire
//! scripted models that return canned JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One chat message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider asked us to slow down; the fallback chain retries these.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("completion contained no content")]
    EmptyCompletion,
    #[error("no language model configured")]
    NotConfigured,
    #[error("all models exhausted by rate limits")]
    Exhausted,
}

/// Single-operation capability the fixer consumes.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Rate-limit detection over status code and response body.
pub fn is_rate_limit(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("quota") || lower.contains("too many requests")
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Blocking HTTP binding to an OpenAI-compatible chat completions endpoint.
pub struct HttpChatModel {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl HttpChatModel {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
        }
    }
}

impl LanguageModel for HttpChatModel {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream: false,
        };

        debug!(model = %self.model, "sending completion request");
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !(200..300).contains(&status) {
            if is_rate_limit(status, &body) {
                return Err(LlmError::RateLimited(format!("{} ({status})", self.model)));
            }
            return Err(LlmError::Api { status, body });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|err| LlmError::Api {
            status,
            body: format!("unparseable completion: {err}"),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

/// Ordered model chain with per-model retry on rate limits.
///
/// Per model: up to `backoff.len() + 1` attempts, sleeping through the
/// backoff schedule between rate-limited attempts. Rate-limit exhaustion
/// moves to the next model; any other error propagates immediately.
pub struct FallbackChain {
    models: Vec<Box<dyn LanguageModel>>,
    backoff: Vec<Duration>,
}

impl FallbackChain {
    pub fn new(models: Vec<Box<dyn LanguageModel>>) -> Self {
        Self {
            models,
            backoff: vec![Duration::from_secs(15), Duration::from_secs(30)],
        }
    }

    /// Override the backoff schedule (tests pass zero durations).
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }
}

impl LanguageModel for FallbackChain {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        if self.models.is_empty() {
            return Err(LlmError::NotConfigured);
        }
        for (index, model) in self.models.iter().enumerate() {
            let mut attempt = 0usize;
            loop {
                match model.complete(messages) {
                    Ok(text) => return Ok(text),
                    Err(LlmError::RateLimited(detail)) => {
                        if attempt < self.backoff.len() {
                            let delay = self.backoff[attempt];
                            warn!(model = index, attempt, delay_secs = delay.as_secs(), %detail, "rate limited, backing off");
                            std::thread::sleep(delay);
                            attempt += 1;
                        } else {
                            info!(model = index, %detail, "rate limit exhausted, moving to next model");
                            break;
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Err(LlmError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }
    }

    impl LanguageModel for Scripted {
        fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            *self.calls.lock().expect("lock") += 1;
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Err(LlmError::RateLimited("script exhausted".to_string()));
            }
            responses.remove(0)
        }
    }

    fn zero_backoff(models: Vec<Box<dyn LanguageModel>>) -> FallbackChain {
        FallbackChain::new(models).with_backoff(vec![Duration::ZERO, Duration::ZERO])
    }

    #[test]
    fn rate_limit_detection_covers_status_and_body() {
        assert!(is_rate_limit(429, ""));
        assert!(is_rate_limit(500, "monthly quota exceeded"));
        assert!(is_rate_limit(503, "Too Many Requests"));
        assert!(!is_rate_limit(500, "internal error"));
        assert!(!is_rate_limit(200, "ok"));
    }

    #[test]
    fn retries_rate_limits_then_succeeds_on_same_model() {
        let chain = zero_backoff(vec![Box::new(Scripted::new(vec![
            Err(LlmError::RateLimited("r1".to_string())),
            Err(LlmError::RateLimited("r2".to_string())),
            Ok("answer".to_string()),
        ]))]);
        assert_eq!(
            chain.complete(&[ChatMessage::user("hi")]).expect("complete"),
            "answer"
        );
    }

    #[test]
    fn falls_through_to_next_model_after_exhaustion() {
        let first = Scripted::new(vec![
            Err(LlmError::RateLimited("a".to_string())),
            Err(LlmError::RateLimited("b".to_string())),
            Err(LlmError::RateLimited("c".to_string())),
        ]);
        let second = Scripted::new(vec![Ok("fallback".to_string())]);
        let chain = zero_backoff(vec![Box::new(first), Box::new(second)]);
        assert_eq!(
            chain.complete(&[ChatMessage::user("hi")]).expect("complete"),
            "fallback"
        );
    }

    #[test]
    fn non_rate_limit_errors_propagate_immediately() {
        let first = Scripted::new(vec![Err(LlmError::Api {
            status: 500,
            body: "boom".to_string(),
        })]);
        let second = Scripted::new(vec![Ok("never".to_string())]);
        let chain = zero_backoff(vec![Box::new(first), Box::new(second)]);
        let err = chain.complete(&[ChatMessage::user("hi")]).unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
    }

    #[test]
    fn exhausting_every_model_reports_exhausted() {
        let chain = zero_backoff(vec![
            Box::new(Scripted::new(vec![])),
            Box::new(Scripted::new(vec![])),
        ]);
        let err = chain.complete(&[ChatMessage::user("hi")]).unwrap_err();
        assert!(matches!(err, LlmError::Exhausted));
    }

    #[test]
    fn empty_chain_is_not_configured() {
        let chain = FallbackChain::new(Vec::new());
        let err = chain.complete(&[ChatMessage::user("hi")]).unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
    }
}
