use serde::Serialize;

use crate::error::RelayError;
use crate::model::ProviderResponse;
use crate::tracker::RequestState;

/// Per-call, per-attempt context handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct AttemptInfo {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// 1-based.
    pub attempt: u32,
    pub max_retries: u32,
    pub streaming: bool,
}

impl AttemptInfo {
    pub fn new(provider: &str, model: &str, endpoint: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn request_state(&self) -> RequestState {
        RequestState::new(&self.provider, &self.model, &self.endpoint)
    }
}

/// A scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryInfo {
    pub attempt: u32,
    pub delay_ms: u64,
    pub error_kind: String,
    pub error_message: String,
}

impl RetryInfo {
    pub fn new(attempt: u32, delay_ms: u64, error: &RelayError) -> Self {
        Self {
            attempt,
            delay_ms,
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
        }
    }
}

/// Structured log record written by `RequestLogObserver`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionLog {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub attempt: u32,
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_input: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_output: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CompletionLog {
    pub fn for_attempt(info: &AttemptInfo, timestamp: String) -> Self {
        Self {
            provider: info.provider.clone(),
            model: info.model.clone(),
            endpoint: info.endpoint.clone(),
            attempt: info.attempt,
            timestamp,
            ..Self::default()
        }
    }
    pub fn request(mut self, v: &serde_json::Value) -> Self { self.request = Some(v.clone()); self }
    pub fn response(mut self, r: &ProviderResponse) -> Self {
        self.finish_reason = Some(r.finish_reason.as_str().to_string());
        self.tokens_input = Some(r.usage.input_tokens);
        self.tokens_output = Some(r.usage.output_tokens);
        self.tool_calls = Some(r.tool_calls.len());
        self
    }
    pub fn error(mut self, e: &RelayError) -> Self {
        self.error_kind = Some(e.kind().to_string());
        self.error_message = Some(e.to_string());
        self
    }
}
