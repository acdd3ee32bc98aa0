//! Transport engine contract and engine-side resource pooling.
//!
//! The pipeline dispatches fully-built requests to an [`EngineAdapter`];
//! everything below that interface (framing, TLS, DNS) lives outside this
//! crate. [`ResourcePool`] and [`PooledEngine`] cover the one engine-side
//! concern this crate owns: caching expensive per-configuration transport
//! handles with LRU eviction.

mod pool;
mod pooled;

pub use pool::{PoolLease, PooledHandle, ResourcePool};
pub use pooled::{PooledEngine, PooledTransport};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::pipeline::{CallAttributes, ProxySettings, SecurityContext};
use crate::request::Request;
use crate::scope::ExecutionScope;

/// Structural key for engine handle reuse, derived from the subset of
/// per-call attributes relevant to connection sharing. Two calls with
/// identical derived keys may share a pooled handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    /// Connect deadline the handle is configured with (0 = disabled).
    pub connect_timeout_ms: u64,
    /// Socket idle deadline the handle is configured with (0 = disabled).
    pub socket_timeout_ms: u64,
    pub proxy: Option<ProxySettings>,
    pub security: Option<SecurityContext>,
}

impl EngineKey {
    /// Derive the key deterministically from resolved call attributes.
    /// Calls without resolved timeouts (no timeout feature installed) all
    /// map to the zero key.
    pub fn from_attributes(attributes: &CallAttributes) -> Self {
        let (connect, socket) = match attributes.resolved_timeouts() {
            Some(resolved) => (resolved.connect_timeout_ms, resolved.socket_timeout_ms),
            None => (0, 0),
        };
        Self {
            connect_timeout_ms: connect,
            socket_timeout_ms: socket,
            proxy: attributes.proxy.clone(),
            security: attributes.security.clone(),
        }
    }
}

/// A streaming response as produced by an engine.
///
/// The body channel carries chunks or a mid-stream engine failure; the
/// engine closes the sender at the end of the stream.
pub struct EngineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: mpsc::Receiver<Result<Bytes, EngineError>>,
}

impl EngineResponse {
    /// A response with a single-chunk body, for engines that buffer.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, bytes: Bytes) -> Self {
        let (tx, rx) = mpsc::channel(1);
        if !bytes.is_empty() {
            // Capacity 1 and nothing was sent yet.
            let _ = tx.try_send(Ok(bytes));
        }
        Self {
            status,
            headers,
            body: rx,
        }
    }
}

/// The contract a transport implementation exposes to the pipeline.
///
/// A conforming engine must:
/// - honor `scope` cancellation by aborting in-flight I/O promptly and
///   surfacing [`EngineError::Aborted`] rather than a generic I/O error;
/// - apply the connect/socket timeouts from `attributes` to the underlying
///   connection when non-zero, reporting expiry as the matching
///   [`EngineError`] variant;
/// - keep all other I/O failures distinct ([`EngineError::Io`]) so callers
///   can discriminate.
#[async_trait]
pub trait EngineAdapter: Send + Sync + 'static {
    async fn execute(
        &self,
        request: &Request,
        attributes: &CallAttributes,
        scope: &ExecutionScope,
    ) -> Result<EngineResponse, EngineError>;

    /// Invoked once at client shutdown. Engines with pooled handles tear
    /// them down here.
    async fn shutdown(&self) {}
}
