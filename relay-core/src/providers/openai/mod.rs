use secrecy::{ExposeSecret, SecretString};

use crate::error::RelayError;
use crate::http_client::Headers;
use crate::model::ModelSpec;
use crate::provider::{Backend, classify_status_error};
use crate::request_builder::ParamSupport;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Body fragments OpenAI sends with a 429 when billing, not load, is the cause.
/// Matched lowercased.
pub const QUOTA_EXCEEDED_PATTERNS: &[&str] = &["insufficient_quota", "exceeded your current quota"];

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_EXCEEDED_PATTERNS.iter().any(|p| lower.contains(p))
}

/// OpenAI chat completions. Accepts every generation parameter. A 429 caused by
/// an exhausted quota is reported as [`RelayError::QuotaExceeded`] and never retried.
#[derive(Debug, Clone)]
pub struct OpenAi {
    model: ModelSpec,
    base: String,
    api_key: SecretString,
    org: Option<String>,
}

impl OpenAi {
    pub fn new(model: ModelSpec, api_key: SecretString, base: Option<String>) -> Self {
        Self {
            model,
            base: base
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            org: None,
        }
    }

    pub fn with_org(mut self, org: Option<String>) -> Self {
        self.org = org;
        self
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str, model: &str) -> Self {
        OpenAi::new(
            ModelSpec::builtin(model),
            SecretString::from("test-key".to_string()),
            Some(format!("{server_base}/v1")),
        )
    }
}

impl Backend for OpenAi {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base)
    }

    fn headers(&self) -> Headers {
        let mut h = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        h
    }

    fn param_support(&self) -> ParamSupport {
        ParamSupport::all()
    }

    fn classify_error(&self, err: RelayError) -> RelayError {
        match classify_status_error(err) {
            RelayError::RateLimited {
                provider, message, ..
            } if is_quota_message(&message) => RelayError::QuotaExceeded { provider, message },
            other => other,
        }
    }
}
