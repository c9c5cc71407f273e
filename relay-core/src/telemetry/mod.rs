//! Observability for the engine.
//!
//! The engine never writes logs or files itself; it reports attempts, retries,
//! terminal errors and completions to an injected [`EngineObserver`]. Nothing an
//! observer does can affect the event stream.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::model::ProviderResponse;

/// Implement this to receive engine events.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`).
/// - Calls happen on the engine's worker task; keep them cheap and never panic.
pub trait EngineObserver: Send + Sync {
    /// A network attempt is about to start with `request` as its body.
    fn on_attempt(&self, _info: &AttemptInfo, _request: &Value) {}
    /// An attempt failed and another one is scheduled.
    fn on_retry(&self, _info: &AttemptInfo, _retry: &RetryInfo) {}
    /// The call ended with `error`.
    fn on_error(&self, _info: &AttemptInfo, _error: &RelayError) {}
    fn on_complete(&self, _info: &AttemptInfo, _response: &ProviderResponse) {}
}

/// Fans every event out to a list of observers.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn EngineObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl EngineObserver for ObserverSet {
    fn on_attempt(&self, info: &AttemptInfo, request: &Value) {
        self.observers.iter().for_each(|o| o.on_attempt(info, request));
    }
    fn on_retry(&self, info: &AttemptInfo, retry: &RetryInfo) {
        self.observers.iter().for_each(|o| o.on_retry(info, retry));
    }
    fn on_error(&self, info: &AttemptInfo, error: &RelayError) {
        self.observers.iter().for_each(|o| o.on_error(info, error));
    }
    fn on_complete(&self, info: &AttemptInfo, response: &ProviderResponse) {
        self.observers.iter().for_each(|o| o.on_complete(info, response));
    }
}

/// Reports engine events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn on_attempt(&self, info: &AttemptInfo, _request: &Value) {
        debug!(
            llm.provider = %info.provider,
            llm.model = %info.model,
            llm.endpoint = %info.endpoint,
            retry.attempt = info.attempt,
            streaming = info.streaming,
            "starting attempt"
        );
    }

    fn on_retry(&self, info: &AttemptInfo, retry: &RetryInfo) {
        warn!(
            llm.provider = %info.provider,
            llm.model = %info.model,
            retry.attempt = retry.attempt,
            retry.max = info.max_retries,
            retry.delay_ms = retry.delay_ms,
            error.kind = %retry.error_kind,
            error.message = %retry.error_message,
            "attempt failed, retrying"
        );
    }

    fn on_error(&self, info: &AttemptInfo, error: &RelayError) {
        warn!(
            llm.provider = %info.provider,
            llm.model = %info.model,
            retry.attempt = info.attempt,
            error.kind = error.kind(),
            error.message = %error,
            "request failed"
        );
    }

    fn on_complete(&self, info: &AttemptInfo, response: &ProviderResponse) {
        info!(
            llm.provider = %info.provider,
            llm.model = %info.model,
            retry.attempt = info.attempt,
            finish.reason = response.finish_reason.as_str(),
            tokens.input = response.usage.input_tokens,
            tokens.output = response.usage.output_tokens,
            "request complete"
        );
    }
}

/// Writes one pretty JSON file per request and per terminal error under
/// `<dir>/requests/` and `<dir>/errors/`. Write failures are logged and ignored.
#[derive(Debug, Clone)]
pub struct RequestLogObserver {
    dir: PathBuf,
}

impl RequestLogObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, kind: &str, model: &str, log: &CompletionLog) {
        let sub = self.dir.join(kind);
        let file = sub.join(format!("{}_{}.json", sanitize(model), log.timestamp));
        let result = std::fs::create_dir_all(&sub)
            .map_err(anyhow::Error::from)
            .and_then(|_| serde_json::to_vec_pretty(log).map_err(anyhow::Error::from))
            .and_then(|bytes| std::fs::write(&file, bytes).map_err(anyhow::Error::from));
        if let Err(e) = result {
            debug!(path = %file.display(), error = %e, "request log write failed");
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S%.3f").to_string()
}

fn sanitize(model: &str) -> String {
    model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

impl EngineObserver for RequestLogObserver {
    fn on_attempt(&self, info: &AttemptInfo, request: &Value) {
        let log = CompletionLog::for_attempt(info, timestamp()).request(request);
        self.write("requests", &info.model, &log);
    }

    fn on_error(&self, info: &AttemptInfo, error: &RelayError) {
        let log = CompletionLog::for_attempt(info, timestamp()).error(error);
        self.write("errors", &info.model, &log);
    }
}
