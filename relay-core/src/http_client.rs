use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::Stream;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};
use crate::retry::parse_retry_after_ms;

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = std::pin::Pin<
    Box<dyn Stream<Item = CoreResult<SseLine>> + Send>,
>;

/// Headers as owned pairs; backends build them per request.
pub type Headers = Vec<(String, String)>;

/// The network seam used by the engine. `provider` labels mapped errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST JSON and decode a JSON body. Non-2xx statuses map to `RelayError`.
    async fn post_json(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> CoreResult<Value>;

    /// POST JSON and return the response body as an SSE line stream.
    async fn post_sse(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> CoreResult<SseStream>;
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_config(&HttpCfg::default())
    }

    pub fn from_config(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("relay/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    async fn send(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
        accept: &str,
    ) -> CoreResult<reqwest::Response> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req.send().await.map_err(|e| {
            debug!(provider, error = %e, "request send failed");
            RelayError::ProviderUnavailable {
                provider: provider.to_string(),
                status: None,
                retry_after_ms: None,
            }
        })?;

        let status = resp.status();
        debug!(
            provider,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            request_id = extract_request_id(resp.headers()).as_deref().unwrap_or(""),
            "response headers received"
        );
        if !status.is_success() {
            let ra = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_ms);
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(provider, status, ra, &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn post_json(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> CoreResult<Value> {
        let resp = self
            .send(provider, url, body, headers, "application/json")
            .await?;
        let status = resp.status();
        resp.json::<Value>()
            .await
            .map_err(|e| RelayError::ProviderError {
                provider: provider.to_string(),
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })
    }

    async fn post_sse(
        &self,
        provider: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> CoreResult<SseStream> {
        let resp = self
            .send(provider, url, body, headers, "text/event-stream")
            .await?;
        // Stream body as bytes and split on '\n'
        let line_stream = LineStream::new(provider, Box::pin(resp.bytes_stream()));
        Ok(Box::pin(line_stream))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-amzn-requestid"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

/// Map a non-success status to the error taxonomy. Backends may refine the result
/// (quota detection) through their `classify_error` hook.
pub fn map_http_error(
    provider: &str,
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> RelayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms,
            message: truncate(body, 300),
        },
        s if s.is_server_error() => RelayError::ProviderUnavailable {
            provider: provider.to_string(),
            status: Some(s.as_u16()),
            retry_after_ms,
        },
        s => RelayError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

/// Truncate to at most `max` bytes on a char boundary, appending `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}

type ByteStream = std::pin::Pin<
    Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
>;

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
struct LineStream {
    provider: String,
    inner: ByteStream,
    // raw bytes so multi-byte characters split across chunks survive
    buf: Vec<u8>,
    done: bool,
}

impl LineStream {
    fn new(provider: &str, inner: ByteStream) -> Self {
        Self {
            provider: provider.to_string(),
            inner,
            buf: Vec::new(),
            done: false,
        }
    }
}

impl Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            if let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
                let mut raw: Vec<u8> = self.buf.drain(..=idx).collect();
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                let line = String::from_utf8_lossy(&raw).into_owned();
                return Poll::Ready(Some(Ok(SseLine { line })));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!(provider = %self.provider, error = %e, "stream read failed");
                    self.done = true;
                    self.buf.clear();
                    return Poll::Ready(Some(Err(RelayError::ProviderUnavailable {
                        provider: self.provider.clone(),
                        status: None,
                        retry_after_ms: None,
                    })));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if !self.buf.is_empty() {
                        let raw = std::mem::take(&mut self.buf);
                        let line = String::from_utf8_lossy(&raw).into_owned();
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_json_success_sends_headers() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/chat")
                .header("authorization", "Bearer k");
            then.status(200)
                .header("x-request-id", "abc123")
                .json_body(json!({"ok": true}));
        });

        let client = HttpClient::new_default().unwrap();
        let resp = client
            .post_json(
                "xai",
                &format!("{}/chat", server.base_url()),
                &json!({"msg":"hi"}),
                &[("Authorization".to_string(), "Bearer k".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(resp["ok"], true);
        m.assert();
    }

    #[tokio::test]
    async fn post_json_429_maps_to_rate_limited_with_retry_after() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(429).header("Retry-After", "2").body("slow down");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json("xai", &format!("{}/chat", server.base_url()), &json!({}), &[])
            .await
            .unwrap_err();

        match err {
            RelayError::RateLimited {
                provider,
                retry_after_ms,
                message,
            } => {
                assert_eq!(provider, "xai");
                assert_eq!(retry_after_ms, Some(2_000));
                assert_eq!(message, "slow down");
            }
            other => panic!("expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_sse_503_maps_to_unavailable_with_status() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(503).body("oops");
        });
        let client = HttpClient::new_default().expect("client");
        let err = match client
            .post_sse("openai", &format!("{}/chat", server.base_url()), &json!({}), &[])
            .await
        {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            RelayError::ProviderUnavailable { status: Some(503), .. }
        ));
    }

    #[tokio::test]
    async fn post_json_200_bad_json_maps_to_provider_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(200).body("not-json");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json("xai", &format!("{}/chat", server.base_url()), &json!({}), &[])
            .await
            .unwrap_err();
        match err {
            RelayError::ProviderError { code, .. } => assert_eq!(code, "200"),
            other => panic!("expected ProviderError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_json_400_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(400).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json("xai", &format!("{}/chat", server.base_url()), &json!({}), &[])
            .await
            .unwrap_err();
        match err {
            RelayError::ProviderError { message, code, .. } => {
                assert_eq!(code, "400");
                assert_eq!(message.len(), 303);
                assert!(message.ends_with("..."));
            }
            other => panic!("expected ProviderError, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_unavailable_without_status() {
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json("xai", "http://127.0.0.1:9/chat", &json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::ProviderUnavailable { status: None, .. }
        ));
    }

    #[tokio::test]
    async fn post_sse_splits_lines_and_flushes_tail() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: a\r\n\r\ndata: b\n\ndata: [DONE]");
        });
        let client = HttpClient::new_default().expect("client");
        let stream = client
            .post_sse("xai", &format!("{}/chat", server.base_url()), &json!({}), &[])
            .await
            .expect("stream");
        let lines: Vec<String> = stream.map(|l| l.expect("line").line).collect().await;
        assert_eq!(lines, vec!["data: a", "", "data: b", "", "data: [DONE]"]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(200);
        let t = truncate(&s, 301);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), 300 + 3);
        assert_eq!(truncate("short", 300), "short");
    }
}
