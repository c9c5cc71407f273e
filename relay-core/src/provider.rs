use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreResult, RelayError};
use crate::http_client::Headers;
use crate::model::{FinishReason, Message, ModelSpec, ProviderResponse, TokenUsage, ToolDefinition};
use crate::request_builder::{self, ChatParams, ParamSupport, RequestBuilder};
use crate::stream::{BoxStreamEv, ProviderEvent};

/// The small set of hooks that make one backend different from another.
/// Everything else (retry, buffering, cancellation) lives in the shared engine.
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn model(&self) -> &ModelSpec;
    /// Full chat-completions URL.
    fn endpoint(&self) -> String;
    fn headers(&self) -> Headers;
    fn param_support(&self) -> ParamSupport;

    /// System prompt prepended to every request, if any.
    fn system_prompt(&self) -> Option<String> {
        None
    }

    fn convert_message(&self, msg: &Message) -> Vec<Value> {
        request_builder::convert_message(msg)
    }

    fn build_params(
        &self,
        builder: &RequestBuilder,
        conversation: &[Message],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> ChatParams {
        let messages = conversation
            .iter()
            .flat_map(|m| self.convert_message(m))
            .collect();
        builder.build(self.system_prompt().as_deref(), messages, tools, stream)
    }

    /// Refine a transport or in-stream error before the retry policy sees it.
    fn classify_error(&self, err: RelayError) -> RelayError {
        classify_status_error(err)
    }

    fn map_finish_reason(&self, raw: Option<&str>) -> FinishReason {
        map_finish_reason(raw)
    }
}

/// In-stream error objects carry an HTTP-like code; give them the same shape
/// as the transport would have.
pub fn classify_status_error(err: RelayError) -> RelayError {
    match err {
        RelayError::ProviderError {
            provider,
            code,
            message,
        } => match code.parse::<u16>() {
            Ok(429) => RelayError::RateLimited {
                provider,
                retry_after_ms: None,
                message,
            },
            Ok(s) if (500..600).contains(&s) => RelayError::ProviderUnavailable {
                provider,
                status: Some(s),
                retry_after_ms: None,
            },
            _ => RelayError::ProviderError {
                provider,
                code,
                message,
            },
        },
        other => other,
    }
}

pub fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::EndTurn,
        Some("length") => FinishReason::MaxTokens,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolUse,
        Some("content_filter") => FinishReason::ContentFiltered,
        _ => FinishReason::EndTurn,
    }
}

/// Caller-facing provider interface.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &ModelSpec;

    /// Stream one logical call. The stream ends with exactly one `Complete` or
    /// `Error`; cancelling `cancel` ends it with `Error(Cancelled)`.
    fn stream_response(
        &self,
        conversation: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> BoxStreamEv;

    /// Non-streaming variant with the same retry policy.
    async fn send_messages(
        &self,
        conversation: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> CoreResult<ProviderResponse>;
}

/// A dummy provider that always answers with a canned response.
/// Used as the registry fallback when no backend is configured.
pub struct NullProvider {
    model: ModelSpec,
}

impl Default for NullProvider {
    fn default() -> Self {
        Self {
            model: ModelSpec::new("null", "null", "null"),
        }
    }
}

impl NullProvider {
    pub const RESPONSE: &'static str = "[null provider response]";

    fn respond(conversation: &[Message]) -> ProviderResponse {
        ProviderResponse {
            content: Self::RESPONSE.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage {
                input_tokens: conversation.iter().map(|m| m.content.len() as u64).sum(),
                ..TokenUsage::default()
            },
            finish_reason: FinishReason::EndTurn,
        }
    }
}

#[async_trait]
impl ChatProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn stream_response(
        &self,
        conversation: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> BoxStreamEv {
        let events = if cancel.is_cancelled() {
            vec![ProviderEvent::Error(RelayError::Cancelled)]
        } else {
            let resp = Self::respond(&conversation);
            vec![
                ProviderEvent::ContentDelta(resp.content.clone()),
                ProviderEvent::Complete(resp),
            ]
        };
        futures::stream::iter(events).boxed()
    }

    async fn send_messages(
        &self,
        conversation: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> CoreResult<ProviderResponse> {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        Ok(Self::respond(&conversation))
    }
}
