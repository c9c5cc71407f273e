//! xAI (Grok) chat completions.
//!
//! OpenAI-compatible wire format with a narrower parameter set: no stop
//! sequences, no penalties, no reasoning effort, and reasoning models take
//! `max_completion_tokens`. A 429 whose body says the team is out of credits is
//! a quota error, not a rate limit, and is never retried.

use secrecy::{ExposeSecret, SecretString};

use crate::error::RelayError;
use crate::http_client::Headers;
use crate::model::ModelSpec;
use crate::provider::{Backend, classify_status_error};
use crate::providers::SystemPrompt;
use crate::request_builder::{ParamSupport, TokenLimitField};

pub const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

/// Body fragment xAI uses when the account has no credits left.
pub const QUOTA_EXCEEDED_PATTERN: &str = "credits or reached its monthly spending limit";

pub const XAI_SUPPORT: ParamSupport = ParamSupport {
    stop: false,
    penalties: false,
    reasoning_effort: false,
    reasoning_token_field: TokenLimitField::MaxCompletionTokens,
    ..ParamSupport::all()
};

#[derive(Debug, Clone)]
pub struct Xai {
    model: ModelSpec,
    base: String,
    api_key: SecretString,
    system_prompt: SystemPrompt,
}

impl Xai {
    pub fn new(model: ModelSpec, api_key: SecretString, base: Option<String>) -> Self {
        Self {
            model,
            base: base
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            system_prompt: SystemPrompt::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: SystemPrompt) -> Self {
        self.system_prompt = prompt;
        self
    }
}

impl Backend for Xai {
    fn name(&self) -> &str {
        "xai"
    }

    fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base)
    }

    fn headers(&self) -> Headers {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )]
    }

    fn param_support(&self) -> ParamSupport {
        XAI_SUPPORT
    }

    fn system_prompt(&self) -> Option<String> {
        self.system_prompt.resolve()
    }

    fn classify_error(&self, err: RelayError) -> RelayError {
        match classify_status_error(err) {
            RelayError::RateLimited {
                provider, message, ..
            } if message.contains(QUOTA_EXCEEDED_PATTERN) => {
                RelayError::QuotaExceeded { provider, message }
            }
            other => other,
        }
    }
}
