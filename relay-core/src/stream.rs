//! Streaming primitives exposed by relay.
//!
//! Contract:
//! - A call yields 0..n `ContentDelta` / `ToolCallDelta` events followed by exactly one
//!   terminal event: `Complete` or `Error`.
//! - Content deltas are only released once the attempt that produced them is known not to
//!   be a masked backend error; a retried attempt never leaks text.
//! - After a terminal event, no further events are emitted.
//! - Tool-call fragments are forwarded as they arrive and carry the attempt that
//!   produced them. When a later attempt starts sending fragments, everything
//!   accumulated from earlier attempts is stale and must be discarded; `Complete`
//!   always holds the tool calls of the winning attempt only.
//!
//! `ProviderEvent` does not derive `Clone` / `PartialEq` because `Error` carries a
//! `RelayError`, which is neither.

use crate::error::RelayError;
use crate::model::ProviderResponse;

/// What the caller receives incrementally.
#[derive(Debug)]
pub enum ProviderEvent {
    /// Partial assistant text, already cleared by the content classifier.
    ContentDelta(String),
    /// A fragment of a tool call, keyed by the backend's call index within `attempt`.
    ToolCallDelta {
        /// 1-based attempt number; a higher value invalidates earlier fragments.
        attempt: u32,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Finalized response; terminal.
    Complete(ProviderResponse),
    /// Final error after retries were exhausted or abandoned; terminal.
    Error(RelayError),
}

impl ProviderEvent {
    /// Returns true if this event terminates the stream (`Complete` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// Convenience accessor for `ContentDelta` contents.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::ContentDelta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of provider events, as returned by `ChatProvider::stream_response`.
pub type BoxStreamEv = futures::stream::BoxStream<'static, ProviderEvent>;
