//! Per-attempt buffering between the decoder and the caller.
//!
//! Text deltas are held back until the whole attempt has been judged by the
//! [`ContentErrorClassifier`]. A clean attempt releases its buffer once, in
//! arrival order, followed by `Complete`; a masked attempt releases nothing and
//! turns into a single `ContentMasked` error. Tool-call fragments are not text
//! and pass straight through.

use std::sync::Arc;

use tracing::debug;

use crate::classifier::ContentErrorClassifier;
use crate::decoder::{StreamSummary, ToolCallFragment};
use crate::error::{CoreResult, RelayError};
use crate::model::{FinishReason, ProviderResponse};
use crate::stream::ProviderEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    /// At least one text delta is held.
    Buffering,
    Flushing,
    ConvertingToError,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Masked,
}

/// Everything one attempt has accumulated. Discarded when the attempt ends.
#[derive(Debug, Default)]
pub struct AttemptState {
    pub attempt: u32,
    pub text: String,
    pub tool_fragments: Vec<ToolCallFragment>,
    buffered: Vec<String>,
    pub verdict: Option<Verdict>,
}

impl AttemptState {
    fn new(attempt: u32) -> Self {
        Self {
            attempt,
            ..Self::default()
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }
}

pub struct EventPipeline {
    provider: String,
    classifier: Arc<ContentErrorClassifier>,
    state: PipelineState,
    current: AttemptState,
}

impl EventPipeline {
    pub fn new(provider: &str, classifier: Arc<ContentErrorClassifier>) -> Self {
        Self {
            provider: provider.to_string(),
            classifier,
            state: PipelineState::Idle,
            current: AttemptState::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn current(&self) -> &AttemptState {
        &self.current
    }

    /// Start a fresh attempt with an empty buffer.
    pub fn begin(&mut self, attempt: u32) {
        self.current = AttemptState::new(attempt);
        self.state = PipelineState::Streaming;
    }

    /// Hold a text delta. Fails fast if the delta itself carries an error phrase.
    pub fn push_text(&mut self, text: String) -> CoreResult<()> {
        self.current.text.push_str(&text);
        if self.classifier.is_error_content(&text) {
            debug!(
                provider = %self.provider,
                attempt = self.current.attempt,
                phrase = self.classifier.matched_phrase(&text).unwrap_or(""),
                "masked error detected mid-stream"
            );
            return Err(self.convert_to_error());
        }
        self.current.buffered.push(text);
        self.state = PipelineState::Buffering;
        Ok(())
    }

    pub fn pass_tool_fragment(&mut self, fragment: ToolCallFragment) -> ProviderEvent {
        self.current.tool_fragments.push(fragment.clone());
        ProviderEvent::ToolCallDelta {
            attempt: self.current.attempt,
            index: fragment.index,
            id: fragment.id,
            name: fragment.name,
            arguments_delta: fragment.arguments_delta,
        }
    }

    /// Judge the full text at the terminal chunk. Clean: the buffered deltas in
    /// order plus one `Complete`. Masked: `ContentMasked` with the full text.
    pub fn finish(
        &mut self,
        summary: StreamSummary,
        finish_reason: FinishReason,
    ) -> CoreResult<Vec<ProviderEvent>> {
        if self.classifier.is_error_content(&self.current.text) {
            debug!(
                provider = %self.provider,
                attempt = self.current.attempt,
                "masked error detected in accumulated text"
            );
            return Err(self.convert_to_error());
        }

        self.state = PipelineState::Flushing;
        self.current.verdict = Some(Verdict::Clean);
        let mut events: Vec<ProviderEvent> = self
            .current
            .buffered
            .drain(..)
            .map(ProviderEvent::ContentDelta)
            .collect();

        let finish_reason = if summary.tool_calls.is_empty() {
            finish_reason
        } else {
            FinishReason::ToolUse
        };
        events.push(ProviderEvent::Complete(ProviderResponse {
            content: std::mem::take(&mut self.current.text),
            tool_calls: summary.tool_calls,
            usage: summary.usage,
            finish_reason,
        }));
        self.state = PipelineState::Terminated;
        Ok(events)
    }

    /// Abandon the attempt after a transport or decode failure.
    pub fn fail(&mut self) {
        self.current.buffered.clear();
        self.state = PipelineState::Terminated;
    }

    fn convert_to_error(&mut self) -> RelayError {
        self.state = PipelineState::ConvertingToError;
        self.current.verdict = Some(Verdict::Masked);
        self.current.buffered.clear();
        let err = RelayError::ContentMasked {
            provider: self.provider.clone(),
            content: self.current.text.clone(),
        };
        self.state = PipelineState::Terminated;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TokenUsage, ToolCall};

    fn pipeline() -> EventPipeline {
        EventPipeline::new("xai", Arc::new(ContentErrorClassifier::default()))
    }

    fn texts(events: &[ProviderEvent]) -> Vec<&str> {
        events.iter().filter_map(|e| e.as_text_delta()).collect()
    }

    #[test]
    fn clean_attempt_flushes_in_order_then_completes() {
        let mut p = pipeline();
        assert_eq!(p.state(), PipelineState::Idle);
        p.begin(1);
        assert_eq!(p.state(), PipelineState::Streaming);
        p.push_text("Hello".into()).unwrap();
        assert_eq!(p.state(), PipelineState::Buffering);
        p.push_text(" world".into()).unwrap();
        assert_eq!(p.current().buffered_len(), 2);

        let events = p
            .finish(StreamSummary::default(), FinishReason::EndTurn)
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(texts(&events), vec!["Hello", " world"]);
        match &events[2] {
            ProviderEvent::Complete(resp) => {
                assert_eq!(resp.content, "Hello world");
                assert_eq!(resp.finish_reason, FinishReason::EndTurn);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
        assert_eq!(p.state(), PipelineState::Terminated);
        assert_eq!(p.current().verdict, Some(Verdict::Clean));
    }

    #[test]
    fn flushed_deltas_concatenate_to_accumulated_text() {
        let mut p = pipeline();
        p.begin(1);
        let parts = ["fn main() {", "\n    println!(\"hi\");", "\n}"];
        for part in parts {
            p.push_text(part.to_string()).unwrap();
        }
        let accumulated = p.current().text.clone();
        let events = p
            .finish(StreamSummary::default(), FinishReason::EndTurn)
            .unwrap();
        assert_eq!(texts(&events).concat(), accumulated);
    }

    #[test]
    fn early_hit_drops_buffer_and_reports_accumulated_text() {
        let mut p = pipeline();
        p.begin(2);
        p.push_text("I think".into()).unwrap();
        p.push_text(" you have".into()).unwrap();
        let err = p
            .push_text(" hit a rate limit, try again".into())
            .unwrap_err();
        match err {
            RelayError::ContentMasked { content, provider } => {
                assert_eq!(provider, "xai");
                assert_eq!(content, "I think you have hit a rate limit, try again");
            }
            other => panic!("expected ContentMasked, got {other:?}"),
        }
        assert_eq!(p.current().buffered_len(), 0);
        assert_eq!(p.current().verdict, Some(Verdict::Masked));
        assert_eq!(p.state(), PipelineState::Terminated);
    }

    #[test]
    fn phrase_split_across_deltas_is_caught_at_finish() {
        let mut p = pipeline();
        p.begin(1);
        p.push_text("you hit a rate".into()).unwrap();
        p.push_text(" limit".into()).unwrap();
        let err = p
            .finish(StreamSummary::default(), FinishReason::EndTurn)
            .unwrap_err();
        assert!(
            matches!(err, RelayError::ContentMasked { ref content, .. } if content == "you hit a rate limit")
        );
        assert_eq!(p.current().buffered_len(), 0);
    }

    #[test]
    fn tool_calls_force_tool_use_and_fragments_pass_through() {
        let mut p = pipeline();
        p.begin(1);
        let ev = p.pass_tool_fragment(ToolCallFragment {
            index: 0,
            id: Some("call_1".into()),
            name: Some("ls".into()),
            arguments_delta: "{}".into(),
        });
        assert!(matches!(ev, ProviderEvent::ToolCallDelta { attempt: 1, index: 0, .. }));
        assert_eq!(p.current().tool_fragments.len(), 1);

        let summary = StreamSummary {
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "ls".into(),
                input: "{}".into(),
                finished: true,
            }],
            usage: TokenUsage {
                input_tokens: 3,
                ..TokenUsage::default()
            },
            finish_reason: Some("stop".into()),
        };
        let events = p.finish(summary, FinishReason::EndTurn).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProviderEvent::Complete(resp) => {
                assert_eq!(resp.finish_reason, FinishReason::ToolUse);
                assert_eq!(resp.tool_calls.len(), 1);
                assert_eq!(resp.usage.input_tokens, 3);
                assert!(resp.content.is_empty());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn new_attempt_starts_with_empty_buffer() {
        let mut p = pipeline();
        p.begin(1);
        p.push_text("partial".into()).unwrap();
        p.fail();
        assert_eq!(p.state(), PipelineState::Terminated);

        p.begin(2);
        assert_eq!(p.current().attempt, 2);
        assert!(p.current().text.is_empty());
        assert_eq!(p.current().buffered_len(), 0);
        let events = p
            .finish(StreamSummary::default(), FinishReason::EndTurn)
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
