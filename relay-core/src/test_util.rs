//! Shared fixtures for unit tests: in-memory SSE streams and a scripted transport.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};

use crate::error::{CoreResult, RelayError};
use crate::http_client::{SseLine, SseStream, Transport};

pub fn sse_lines(lines: &[&str]) -> SseStream {
    let items: Vec<CoreResult<SseLine>> = lines
        .iter()
        .map(|l| Ok(SseLine { line: l.to_string() }))
        .collect();
    Box::pin(futures_util::stream::iter(items))
}

/// `data:` line carrying one text delta.
pub fn text_chunk(text: &str) -> String {
    format!(
        "data: {}",
        json!({"choices":[{"index":0,"delta":{"content":text}}]})
    )
}

/// `data:` line carrying a finish reason.
pub fn finish_chunk(reason: &str) -> String {
    format!(
        "data: {}",
        json!({"choices":[{"index":0,"delta":{},"finish_reason":reason}]})
    )
}

/// Full SSE body for httpmock: each text becomes a chunk, then finish and `[DONE]`.
pub fn sse_body(texts: &[&str], finish: &str) -> String {
    let mut body = String::new();
    for t in texts {
        body.push_str(&text_chunk(t));
        body.push_str("\n\n");
    }
    body.push_str(&finish_chunk(finish));
    body.push_str("\n\ndata: [DONE]\n\n");
    body
}

pub enum Scripted {
    /// A stream that yields these lines and then ends.
    Sse(Vec<String>),
    /// A stream that yields these lines and then never produces another chunk.
    SseThenHang(Vec<String>),
    /// A stream that yields these lines and then fails mid-read.
    SseThenFail(Vec<String>, RelayError),
    Json(Value),
    Fail(RelayError),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: tokio::time::Instant,
    pub url: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

/// Transport that replays a fixed script, one entry per request.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, url: &str, body: &Value, headers: &[(String, String)]) -> CoreResult<Scripted> {
        self.calls.lock().unwrap().push(RecordedCall {
            at: tokio::time::Instant::now(),
            url: url.to_string(),
            body: body.clone(),
            headers: headers.to_vec(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RelayError::Validation("script exhausted".into()))
    }
}

fn to_items(lines: Vec<String>) -> Vec<CoreResult<SseLine>> {
    lines.into_iter().map(|line| Ok(SseLine { line })).collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(
        &self,
        _provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> CoreResult<Value> {
        match self.next(url, body, headers)? {
            Scripted::Json(v) => Ok(v),
            Scripted::Fail(e) => Err(e),
            _ => Err(RelayError::Validation("expected a json script entry".into())),
        }
    }

    async fn post_sse(
        &self,
        _provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> CoreResult<SseStream> {
        match self.next(url, body, headers)? {
            Scripted::Sse(lines) => Ok(Box::pin(futures_util::stream::iter(to_items(lines)))),
            Scripted::SseThenHang(lines) => Ok(Box::pin(
                futures_util::stream::iter(to_items(lines)).chain(futures_util::stream::pending()),
            )),
            Scripted::SseThenFail(lines, err) => {
                let mut items = to_items(lines);
                items.push(Err(err));
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            Scripted::Fail(e) => Err(e),
            Scripted::Json(_) => Err(RelayError::Validation("expected an sse script entry".into())),
        }
    }
}

/// Script entry for a clean stream of text deltas.
pub fn clean_stream(texts: &[&str], finish: &str) -> Scripted {
    let mut lines: Vec<String> = texts.iter().map(|t| text_chunk(t)).collect();
    lines.push(finish_chunk(finish));
    lines.push("data: [DONE]".to_string());
    Scripted::Sse(lines)
}

pub fn rate_limited(retry_after_ms: Option<u64>) -> RelayError {
    RelayError::RateLimited {
        provider: "test".into(),
        retry_after_ms,
        message: "slow down".into(),
    }
}
