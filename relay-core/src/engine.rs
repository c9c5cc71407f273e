//! The generic provider engine.
//!
//! One [`Engine`] drives any [`Backend`]: it builds the request, runs attempts
//! strictly one after another, feeds streamed deltas through an
//! [`EventPipeline`], and follows the [`RetryPolicy`] between attempts. Both
//! suspension points (waiting for a chunk, sleeping before a retry) race the
//! caller's cancellation token.
//!
//! Streaming calls run on a spawned worker that talks to the caller over a
//! bounded single-producer channel; dropping the returned stream stops it.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span};
use tracing_futures::Instrument;

use crate::classifier::ContentErrorClassifier;
use crate::decoder::{RawDelta, StreamDecoder, decode_completion};
use crate::error::{CoreResult, RelayError};
use crate::http_client::Transport;
use crate::model::{FinishReason, Message, ModelSpec, ProviderResponse, ToolDefinition};
use crate::pipeline::EventPipeline;
use crate::provider::{Backend, ChatProvider};
use crate::request_builder::{GenerationOptions, RequestBuilder};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stream::{BoxStreamEv, ProviderEvent};
use crate::telemetry::{AttemptInfo, EngineObserver, RetryInfo, TracingObserver};
use crate::tracker::{self, RequestStateTracker};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct EngineBuilder<B: Backend> {
    backend: B,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    classifier: ContentErrorClassifier,
    options: GenerationOptions,
    observer: Arc<dyn EngineObserver>,
    tracker: Option<Arc<RequestStateTracker>>,
}

impl<B: Backend> EngineBuilder<B> {
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn classifier(mut self, classifier: ContentErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Mirror in-flight state into `tracker`; `None` disables mirroring.
    pub fn tracker(mut self, tracker: Option<Arc<RequestStateTracker>>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn build(self) -> Engine<B> {
        let builder = RequestBuilder::new(
            self.backend.model().clone(),
            self.backend.param_support(),
            self.options,
        );
        Engine {
            inner: Arc::new(Inner {
                backend: self.backend,
                transport: self.transport,
                builder,
                policy: self.policy,
                classifier: Arc::new(self.classifier),
                observer: self.observer,
                tracker: self.tracker,
            }),
        }
    }
}

pub struct Engine<B: Backend> {
    inner: Arc<Inner<B>>,
}

impl<B: Backend> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<B: Backend> {
    backend: B,
    transport: Arc<dyn Transport>,
    builder: RequestBuilder,
    policy: RetryPolicy,
    classifier: Arc<ContentErrorClassifier>,
    observer: Arc<dyn EngineObserver>,
    tracker: Option<Arc<RequestStateTracker>>,
}

impl<B: Backend> Engine<B> {
    /// Defaults: default retry policy and phrase list, tracing observer, global tracker mirror.
    pub fn builder(backend: B, transport: Arc<dyn Transport>) -> EngineBuilder<B> {
        EngineBuilder {
            backend,
            transport,
            policy: RetryPolicy::default(),
            classifier: ContentErrorClassifier::default(),
            options: GenerationOptions::default(),
            observer: Arc::new(TracingObserver),
            tracker: Some(tracker::global()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }
}

impl<B: Backend> Inner<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn request_body(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> CoreResult<Value> {
        let params = self
            .backend
            .build_params(&self.builder, conversation, tools, stream);
        serde_json::to_value(&params).map_err(|e| RelayError::Other(e.into()))
    }

    fn attempt_info(&self, endpoint: &str, streaming: bool) -> AttemptInfo {
        AttemptInfo::new(self.name(), &self.builder.model().api_model, endpoint)
            .max_retries(self.policy.max_retries())
            .streaming(streaming)
    }

    /// Run `attempt_fn` until it succeeds, the policy gives up, or `cancel` fires.
    /// Returns the value together with the attempt that produced it.
    async fn retry_loop<T, F, Fut>(
        &self,
        base: AttemptInfo,
        request: &Value,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> CoreResult<(T, AttemptInfo)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let info = base.clone().attempt(attempt);
            if cancel.is_cancelled() {
                return Err(self.fail(&info, RelayError::Cancelled));
            }

            if let Some(t) = &self.tracker {
                t.set_current(info.request_state());
            }
            self.observer.on_attempt(&info, request);
            let span = info_span!(
                "provider.attempt",
                llm.provider = %info.provider,
                llm.model = %info.model,
                retry.attempt = attempt
            );
            let result = attempt_fn(attempt).instrument(span).await;
            if let Some(t) = &self.tracker {
                t.clear();
            }

            let err = match result {
                Ok(value) => return Ok((value, info)),
                Err(RelayError::Cancelled) => return Err(self.fail(&info, RelayError::Cancelled)),
                Err(err) => self.backend.classify_error(err),
            };

            let mut retry = RetryInfo::new(attempt, 0, &err);
            let delay = match self.policy.decide(self.name(), attempt, err) {
                RetryDecision::Retry { delay } => delay,
                RetryDecision::Fail(err) => return Err(self.fail(&info, err)),
            };
            retry.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.observer.on_retry(&info, &retry);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(provider = %info.provider, attempt, "cancelled during backoff");
                    return Err(self.fail(&info, RelayError::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn fail(&self, info: &AttemptInfo, err: RelayError) -> RelayError {
        if let Some(t) = &self.tracker {
            t.clear();
        }
        self.observer.on_error(info, &err);
        err
    }

    /// One streaming attempt. Tool-call fragments go straight to `tx`; text is held
    /// in a fresh pipeline and returned for release only if the attempt is clean.
    async fn stream_attempt(
        &self,
        attempt: u32,
        endpoint: &str,
        request: &Value,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<ProviderEvent>,
    ) -> CoreResult<Vec<ProviderEvent>> {
        let mut pipeline = EventPipeline::new(self.name(), self.classifier.clone());
        pipeline.begin(attempt);

        let headers = self.backend.headers();
        let lines = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            opened = self.transport.post_sse(self.name(), endpoint, request, &headers) => opened?,
        };
        let mut decoder = StreamDecoder::new(self.name(), lines);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = decoder.next_delta() => Some(next),
            };
            let delta = match next {
                None => {
                    pipeline.fail();
                    return Err(RelayError::Cancelled);
                }
                Some(None) => {
                    pipeline.fail();
                    return Err(RelayError::Decode {
                        provider: self.name().to_string(),
                        message: "stream ended without a terminal chunk".into(),
                    });
                }
                Some(Some(Err(e))) => {
                    pipeline.fail();
                    return Err(e);
                }
                Some(Some(Ok(delta))) => delta,
            };
            match delta {
                RawDelta::Text(text) => pipeline.push_text(text)?,
                RawDelta::ToolCall(fragment) => {
                    let event = pipeline.pass_tool_fragment(fragment);
                    if tx.send(event).await.is_err() {
                        pipeline.fail();
                        return Err(RelayError::Cancelled);
                    }
                }
                RawDelta::Done(summary) => {
                    let finish = self
                        .backend
                        .map_finish_reason(summary.finish_reason.as_deref());
                    return pipeline.finish(summary, finish);
                }
            }
        }
    }

    async fn run_stream(
        &self,
        conversation: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
        tx: mpsc::Sender<ProviderEvent>,
    ) {
        let endpoint = self.backend.endpoint();
        let base = self.attempt_info(&endpoint, true);
        let request = match self.request_body(&conversation, &tools, true) {
            Ok(r) => r,
            Err(e) => {
                let e = self.fail(&base, e);
                let _ = tx.send(ProviderEvent::Error(e)).await;
                return;
            }
        };

        let watch = tx.clone();
        let work = self.retry_loop(base, &request, &cancel, |attempt| {
            let tx = tx.clone();
            let endpoint = endpoint.as_str();
            let request = &request;
            let cancel = &cancel;
            async move {
                self.stream_attempt(attempt, endpoint, request, cancel, &tx)
                    .await
            }
        });
        let outcome = tokio::select! {
            outcome = work => outcome,
            _ = watch.closed() => {
                if let Some(t) = &self.tracker {
                    t.clear();
                }
                debug!(provider = %self.name(), "receiver dropped, stream abandoned");
                return;
            }
        };

        match outcome {
            Ok((events, info)) => {
                for event in events {
                    if let ProviderEvent::Complete(resp) = &event {
                        self.observer.on_complete(&info, resp);
                    }
                    if tx.send(event).await.is_err() {
                        debug!(provider = %info.provider, "receiver dropped before flush finished");
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(ProviderEvent::Error(e)).await;
            }
        }
    }

    async fn send_attempt(
        &self,
        endpoint: &str,
        request: &Value,
        cancel: &CancellationToken,
    ) -> CoreResult<ProviderResponse> {
        let headers = self.backend.headers();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            body = self.transport.post_json(self.name(), endpoint, request, &headers) => body?,
        };
        let (content, summary) = decode_completion(self.name(), body)?;
        if self.classifier.is_error_content(&content) {
            return Err(RelayError::ContentMasked {
                provider: self.name().to_string(),
                content,
            });
        }
        let finish_reason = if summary.tool_calls.is_empty() {
            self.backend
                .map_finish_reason(summary.finish_reason.as_deref())
        } else {
            FinishReason::ToolUse
        };
        Ok(ProviderResponse {
            content,
            tool_calls: summary.tool_calls,
            usage: summary.usage,
            finish_reason,
        })
    }

    async fn run_send(
        &self,
        conversation: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> CoreResult<ProviderResponse> {
        let endpoint = self.backend.endpoint();
        let base = self.attempt_info(&endpoint, false);
        let request = match self.request_body(&conversation, &tools, false) {
            Ok(r) => r,
            Err(e) => return Err(self.fail(&base, e)),
        };
        let (resp, info) = self
            .retry_loop(base, &request, &cancel, |_| {
                self.send_attempt(&endpoint, &request, &cancel)
            })
            .await?;
        self.observer.on_complete(&info, &resp);
        Ok(resp)
    }
}

#[async_trait]
impl<B: Backend> ChatProvider for Engine<B> {
    fn name(&self) -> &str {
        self.inner.backend.name()
    }

    fn model(&self) -> &ModelSpec {
        self.inner.backend.model()
    }

    fn stream_response(
        &self,
        conversation: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> BoxStreamEv {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = self.inner.clone();
        let span = info_span!(
            "provider.stream",
            llm.provider = %inner.name(),
            llm.model = %inner.builder.model().api_model
        );
        tokio::spawn(
            async move { inner.run_stream(conversation, tools, cancel, tx).await }.instrument(span),
        );
        ReceiverStream::new(rx).boxed()
    }

    async fn send_messages(
        &self,
        conversation: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> CoreResult<ProviderResponse> {
        let span = info_span!(
            "provider.send",
            llm.provider = %self.inner.name(),
            llm.model = %self.inner.builder.model().api_model
        );
        self.inner
            .run_send(conversation, tools, cancel)
            .instrument(span)
            .await
    }
}
