//! HTTP helpers for driving the router in-process.
//!
//! Requests go through `tower::ServiceExt::oneshot`, so no socket is bound.
//! `EventStreamReader` parses `text/event-stream` bodies frame by frame.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::{
    body::{Body, BodyDataStream},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use serde_json::Value;
use tower::ServiceExt;

/// A buffered response with its body parsed as JSON when possible.
#[derive(Debug)]
pub struct TestResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed body: JSON, a string for non-JSON text, or `Null` when empty.
    pub body: Value,
}

impl TestResponse {
    /// Returns the error code from an error body.
    pub fn error_code(&self) -> Option<&str> {
        self.body["error"]["code"].as_str()
    }
}

/// Builds a `GET` request.
pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri, None)
}

/// Builds a request with a JSON body.
pub fn json(method: Method, uri: &str, body: &Value) -> Request<Body> {
    request(method, uri, Some(body.to_string()))
}

/// Builds a request with a raw body sent as JSON.
pub fn raw_json(method: Method, uri: &str, body: &str) -> Request<Body> {
    request(method, uri, Some(body.to_string()))
}

fn request(method: Method, uri: &str, body: Option<String>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let result = match body {
        Some(body) => {
            builder.header(header::CONTENT_TYPE, "application/json").body(Body::from(body))
        },
        None => builder.body(Body::empty()),
    };
    result.unwrap_or_else(|e| panic!("invalid test request for {uri}: {e}"))
}

/// Adds an `Authorization: Bearer` header.
pub fn with_bearer(mut request: Request<Body>, key: &str) -> Request<Body> {
    let value = format!("Bearer {key}").parse().unwrap_or_else(|e| panic!("invalid key: {e}"));
    request.headers_mut().insert(header::AUTHORIZATION, value);
    request
}

/// Sends a request and buffers the response.
///
/// # Errors
///
/// Returns an error if the router fails or the body cannot be read.
pub async fn send(router: &Router, request: Request<Body>) -> Result<TestResponse> {
    let response = router.clone().oneshot(request).await.context("router call failed")?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .context("failed to read response body")?;

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Ok(TestResponse { status, headers, body })
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// The `event:` field.
    pub event: String,
    /// The `data:` field parsed as JSON.
    pub data: Value,
}

/// Incremental reader over a `text/event-stream` body.
pub struct EventStreamReader {
    stream: BodyDataStream,
    buffer: String,
}

impl EventStreamReader {
    /// Opens an event stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the response is not a successful event stream.
    pub async fn open(router: &Router, uri: &str) -> Result<Self> {
        let response = router.clone().oneshot(get(uri)).await.context("router call failed")?;
        if response.status() != StatusCode::OK {
            bail!("event stream returned {}", response.status());
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            bail!("unexpected content type {content_type}");
        }

        Ok(Self { stream: response.into_body().into_data_stream(), buffer: String::new() })
    }

    /// Waits for the next frame. `None` means the stream ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the body fails or a frame is malformed.
    pub async fn next_frame(&mut self) -> Result<Option<SseFrame>> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                if let Some(frame) = parse_frame(&raw)? {
                    return Ok(Some(frame));
                }
                continue;
            }

            match self.stream.next().await {
                Some(chunk) => {
                    let chunk = chunk.context("event stream body failed")?;
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                },
                None => return Ok(None),
            }
        }
    }

    /// Waits for the next frame, failing after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, stream end or a malformed frame.
    pub async fn expect_frame(&mut self, timeout: Duration) -> Result<SseFrame> {
        match tokio::time::timeout(timeout, self.next_frame()).await {
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => bail!("event stream ended"),
            Ok(Err(e)) => Err(e),
            Err(_) => bail!("no event within {timeout:?}"),
        }
    }

    /// Returns true if no frame arrives within `timeout`.
    pub async fn is_quiet_for(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.next_frame()).await.is_err()
    }
}

fn parse_frame(raw: &str) -> Result<Option<SseFrame>> {
    let mut event = None;
    let mut data = String::new();

    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim_start());
        }
    }

    match event {
        Some(event) => {
            let data = serde_json::from_str(&data)
                .with_context(|| format!("malformed data in {event} frame: {data}"))?;
            Ok(Some(SseFrame { event, data }))
        },
        // Comment-only frames carry nothing.
        None => Ok(None),
    }
}
