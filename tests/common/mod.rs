//! Shared utilities for integration testing: a programmable mock engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::mpsc;

use http_pipeline::engine::{EngineAdapter, EngineResponse};
use http_pipeline::pipeline::CallAttributes;
use http_pipeline::scope::ExecutionScope;
use http_pipeline::{EngineError, Request};

/// What the mock engine does for one invocation.
#[allow(dead_code)]
pub enum MockBehavior {
    /// Respond with a buffered body after a delay.
    Respond {
        status: u16,
        body: &'static str,
        delay_ms: u64,
    },
    /// Respond 302 with a Location header after a delay.
    Redirect { to: &'static str, delay_ms: u64 },
    /// Stream chunks, pausing before each one.
    Stream {
        chunks: Vec<&'static str>,
        chunk_delay_ms: u64,
    },
    /// Fail outright.
    Fail(EngineError),
}

/// A programmable engine: the handler decides per invocation, seeing the
/// invocation index, the request and the resolved call attributes.
pub struct MockEngine {
    handler: Box<dyn Fn(u32, &Request, &CallAttributes) -> MockBehavior + Send + Sync>,
    calls: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl MockEngine {
    pub fn new(
        handler: impl Fn(u32, &Request, &CallAttributes) -> MockBehavior + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Always respond 200 with `body` after `delay_ms`.
    pub fn respond_after(delay_ms: u64, body: &'static str) -> Self {
        Self::new(move |_, _, _| MockBehavior::Respond {
            status: 200,
            body,
            delay_ms,
        })
    }

    /// Shared invocation counter, readable after the engine moves into the
    /// client.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

/// Sleep that honors scope cancellation the way a conforming engine must.
async fn engine_sleep(ms: u64, scope: &ExecutionScope) -> Result<(), EngineError> {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
        cause = scope.cancelled() => Err(EngineError::Aborted(cause)),
    }
}

#[async_trait]
impl EngineAdapter for MockEngine {
    async fn execute(
        &self,
        request: &Request,
        attributes: &CallAttributes,
        scope: &ExecutionScope,
    ) -> Result<EngineResponse, EngineError> {
        let invocation = self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.handler)(invocation, request, attributes) {
            MockBehavior::Respond {
                status,
                body,
                delay_ms,
            } => {
                engine_sleep(delay_ms, scope).await?;
                let status = StatusCode::from_u16(status).expect("test status");
                Ok(EngineResponse::from_bytes(
                    status,
                    HeaderMap::new(),
                    Bytes::from_static(body.as_bytes()),
                ))
            }
            MockBehavior::Redirect { to, delay_ms } => {
                engine_sleep(delay_ms, scope).await?;
                let mut headers = HeaderMap::new();
                headers.insert(LOCATION, HeaderValue::from_static(to));
                Ok(EngineResponse::from_bytes(
                    StatusCode::FOUND,
                    headers,
                    Bytes::new(),
                ))
            }
            MockBehavior::Stream {
                chunks,
                chunk_delay_ms,
            } => {
                let (tx, rx) = mpsc::channel(1);
                let stream_scope = scope.clone();
                tokio::spawn(async move {
                    for chunk in chunks {
                        if engine_sleep(chunk_delay_ms, &stream_scope).await.is_err() {
                            return;
                        }
                        if tx.send(Ok(Bytes::from_static(chunk.as_bytes()))).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(EngineResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: rx,
                })
            }
            MockBehavior::Fail(err) => Err(err),
        }
    }
}

/// Parse a test URL.
#[allow(dead_code)]
pub fn url(path: &str) -> url::Url {
    format!("http://localhost{path}").parse().expect("test url")
}
