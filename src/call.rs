//! Call glue: one logical request/response exchange.
//!
//! # Responsibilities
//! - Tie together the request, its scope, the response stream and
//!   completion bookkeeping
//! - Complete the call scope when the consumer is done, which disarms
//!   watchdogs and releases any still-open body stream
//! - Surface the recorded cancellation cause on a body cut off mid-drain,
//!   never a generic closed-stream error

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio::sync::mpsc;

use crate::error::{CancelCause, ClientError, EngineError};
use crate::scope::ExecutionScope;

/// Global atomic counter for call IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a logical call, shared by its redirect hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    pub fn new() -> Self {
        Self(CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// A streaming response body.
///
/// Reads race the stream's scope: if the call is cancelled while the body
/// is still being drained, the next read raises the cancellation cause.
/// Draining to the end (or dropping the body) completes the stream scope
/// and then the call scope normally.
pub struct Body {
    rx: mpsc::Receiver<Result<Bytes, EngineError>>,
    call_scope: ExecutionScope,
    stream_scope: ExecutionScope,
    finished: bool,
}

impl Body {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<Bytes, EngineError>>,
        call_scope: ExecutionScope,
        stream_scope: ExecutionScope,
    ) -> Self {
        Self {
            rx,
            call_scope,
            stream_scope,
            finished: false,
        }
    }

    /// Next chunk of the body, or `None` at the end of the stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        if self.finished {
            return Ok(None);
        }
        if let Some(cause) = self.stream_scope.cancel_cause() {
            self.finished = true;
            return Err(ClientError::from_cause(cause));
        }

        let next = tokio::select! {
            chunk = self.rx.recv() => chunk,
            cause = self.stream_scope.cancelled() => {
                self.finished = true;
                return Err(ClientError::from_cause(cause));
            }
        };

        match next {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => {
                self.finished = true;
                let err: ClientError = err.into();
                // A mid-stream engine failure is this call's terminal cause.
                self.call_scope.complete_with_cause(err.as_cause());
                Err(err)
            }
            None => {
                self.finished = true;
                // A sender closed by cancellation is a truncated stream,
                // not end-of-stream: surface the recorded cause instead.
                if let Some(cause) = self
                    .stream_scope
                    .cancel_cause()
                    .or_else(|| self.call_scope.cancel_cause())
                {
                    return Err(ClientError::from_cause(cause));
                }
                self.complete_ok();
                Ok(None)
            }
        }
    }

    /// Drain the remaining stream into one buffer.
    pub async fn read_all(&mut self) -> Result<Bytes, ClientError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    fn complete_ok(&self) {
        self.stream_scope.complete_ok();
        self.call_scope.complete_ok();
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        // Abandoning the stream counts as being done with the call.
        // No-ops if a cancellation already completed the scopes.
        self.complete_ok();
    }
}

/// A received response with a streaming body.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response produced without engine I/O, e.g. by a cache feature
    /// short-circuiting the pipeline. The body is a single buffered chunk.
    pub fn synthetic(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        scope: &ExecutionScope,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        if !body.is_empty() {
            // Capacity 1 and nothing was sent yet.
            let _ = tx.try_send(Ok(body));
        }
        drop(tx);
        let stream_scope = scope.child();
        Self::new(status, headers, Body::new(rx, scope.clone(), stream_scope))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        self.body.next_chunk().await
    }

    /// Read the whole remaining body.
    pub async fn read_all(mut self) -> Result<Bytes, ClientError> {
        self.body.read_all().await
    }
}

/// One logical request/response exchange, possibly spanning redirect hops.
///
/// The call's scope stays active while the body is drained, so a request
/// watchdog keeps guarding slow streams; it completes when the consumer
/// finishes with the body or drops the call.
pub struct Call {
    id: CallId,
    scope: ExecutionScope,
    response: Response,
}

impl Call {
    pub(crate) fn new(id: CallId, scope: ExecutionScope, response: Response) -> Self {
        Self {
            id,
            scope,
            response,
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// The call's scope (final hop). Exposed for observation and explicit
    /// cancellation wiring.
    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    /// Cancel the call. The body stream, if still open, raises
    /// [`CancelCause::UserCancelled`] on its next read.
    pub fn cancel(&self) {
        self.scope.cancel(CancelCause::UserCancelled);
    }

    /// Hand the response stream to the consumer. The call scope completes
    /// when the body is drained or dropped.
    pub fn into_response(self) -> Response {
        self.response
    }

    /// Hand off: complete the call scope normally right now, while the
    /// body keeps streaming under its own child scope. Disarms the request
    /// watchdog; the remaining drain is unguarded. Normal completion does
    /// not cancel the stream.
    pub fn detach_response(self) -> Response {
        self.scope.complete_ok();
        self.response
    }

    /// Read the whole body and finish the call.
    pub async fn read_body(self) -> Result<Bytes, ClientError> {
        self.into_response().read_all().await
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("status", &self.response.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> (ExecutionScope, ExecutionScope) {
        let call_scope = ExecutionScope::root().child();
        let stream_scope = call_scope.child();
        (call_scope, stream_scope)
    }

    #[tokio::test]
    async fn draining_body_completes_call_scope() {
        let (call_scope, stream_scope) = scopes();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"hello "))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"world"))).await.unwrap();
        drop(tx);

        let mut body = Body::new(rx, call_scope.clone(), stream_scope);
        let all = body.read_all().await.unwrap();
        assert_eq!(&all[..], b"hello world");
        assert!(!call_scope.is_active());
    }

    #[tokio::test]
    async fn cancelled_stream_raises_cause_not_closed_error() {
        let (call_scope, stream_scope) = scopes();
        let (tx, rx) = mpsc::channel::<Result<Bytes, EngineError>>(1);
        let mut body = Body::new(rx, call_scope.clone(), stream_scope);

        call_scope.cancel(CancelCause::RequestTimeout { limit_ms: 100 });
        let err = body.next_chunk().await.unwrap_err();
        assert_eq!(
            err,
            ClientError::TimeoutExceeded {
                axis: crate::error::TimeoutAxis::Request,
                limit_ms: 100
            }
        );
        drop(tx);
    }

    #[tokio::test]
    async fn dropping_body_completes_scopes() {
        let (call_scope, stream_scope) = scopes();
        let (_tx, rx) = mpsc::channel::<Result<Bytes, EngineError>>(1);
        let body = Body::new(rx, call_scope.clone(), stream_scope.clone());
        drop(body);
        assert!(!call_scope.is_active());
        assert!(!stream_scope.is_active());
        assert!(call_scope.cancel_cause().is_none());
    }

    #[tokio::test]
    async fn closed_channel_after_cancellation_is_not_eof() {
        // The engine's feeder observes the cancelled scope and closes the
        // channel without an error chunk; the drained prefix must still
        // surface the cancellation cause, not a clean end-of-stream.
        let (call_scope, stream_scope) = scopes();
        let (tx, rx) = mpsc::channel(2);
        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        let mut body = Body::new(rx, call_scope.clone(), stream_scope);

        assert!(body.next_chunk().await.unwrap().is_some());
        call_scope.cancel(CancelCause::RequestTimeout { limit_ms: 100 });
        drop(tx);

        let err = body.next_chunk().await.unwrap_err();
        assert_eq!(
            err,
            ClientError::TimeoutExceeded {
                axis: crate::error::TimeoutAxis::Request,
                limit_ms: 100
            }
        );
    }

    #[tokio::test]
    async fn closed_channel_with_cancelled_call_scope_is_not_eof() {
        // Exercises the end-of-stream arm directly: the stream scope never
        // saw the cancellation, only the call scope did.
        let call_scope = ExecutionScope::root().child();
        let stream_scope = ExecutionScope::root().child();
        let (tx, rx) = mpsc::channel::<Result<Bytes, EngineError>>(1);
        let mut body = Body::new(rx, call_scope.clone(), stream_scope);

        call_scope.cancel(CancelCause::UserCancelled);
        drop(tx);

        let err = body.next_chunk().await.unwrap_err();
        assert_eq!(err, ClientError::Cancelled(CancelCause::UserCancelled));
    }

    #[tokio::test]
    async fn mid_stream_engine_failure_completes_call_with_cause() {
        let (call_scope, stream_scope) = scopes();
        let (tx, rx) = mpsc::channel(2);
        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        tx.send(Err(EngineError::Io("connection reset".into())))
            .await
            .unwrap();
        drop(tx);

        let mut body = Body::new(rx, call_scope.clone(), stream_scope);
        assert!(body.next_chunk().await.unwrap().is_some());
        let err = body.next_chunk().await.unwrap_err();
        assert!(matches!(err, ClientError::Engine(_)));
        assert!(call_scope.cancel_cause().is_some());
    }
}
