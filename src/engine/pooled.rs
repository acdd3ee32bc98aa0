//! Engine adapter scaffold with per-configuration handle caching.
//!
//! Concrete transports implement [`PooledTransport`]; the scaffold handles
//! key derivation, single-flight handle creation, LRU bounds and keeping a
//! leased handle alive until the call that uses it completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PoolConfig;
use crate::engine::pool::{PooledHandle, ResourcePool};
use crate::engine::{EngineAdapter, EngineKey, EngineResponse};
use crate::error::EngineError;
use crate::pipeline::CallAttributes;
use crate::request::Request;
use crate::scope::ExecutionScope;

/// What a concrete transport supplies: how to open a handle for an
/// effective connection configuration, and how to send one request over
/// an opened handle.
#[async_trait]
pub trait PooledTransport: Send + Sync + 'static {
    type Handle: PooledHandle;

    /// Open a handle configured for `key` (dial/idle timeouts, proxy,
    /// security context). Invoked once per key per miss.
    async fn open(&self, key: &EngineKey) -> Result<Self::Handle, crate::error::PoolError>;

    /// Execute one request over an opened handle, honoring `scope`
    /// cancellation.
    async fn send(
        &self,
        handle: &Self::Handle,
        request: &Request,
        attributes: &CallAttributes,
        scope: &ExecutionScope,
    ) -> Result<EngineResponse, EngineError>;
}

/// An [`EngineAdapter`] that caches transport handles per [`EngineKey`].
pub struct PooledEngine<T: PooledTransport> {
    transport: Arc<T>,
    pool: Arc<ResourcePool<EngineKey, T::Handle>>,
    shutdown_grace: Duration,
}

impl<T: PooledTransport> PooledEngine<T> {
    pub fn new(transport: T, config: PoolConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            pool: ResourcePool::new(config.capacity),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }

    /// Number of cached handles, for observation.
    pub fn pooled_handles(&self) -> usize {
        self.pool.len()
    }
}

#[async_trait]
impl<T: PooledTransport> EngineAdapter for PooledEngine<T> {
    async fn execute(
        &self,
        request: &Request,
        attributes: &CallAttributes,
        scope: &ExecutionScope,
    ) -> Result<EngineResponse, EngineError> {
        let key = EngineKey::from_attributes(attributes);
        let lease = self
            .pool
            .get_or_create(key.clone(), || self.transport.open(&key))
            .await
            .map_err(EngineError::Pool)?;

        let response = self
            .transport
            .send(&lease, request, attributes, scope)
            .await?;

        // The lease lives until the call completes, so eviction cannot
        // tear the handle down under an in-flight response stream.
        scope.on_completion(move |_| drop(lease));
        Ok(response)
    }

    async fn shutdown(&self) {
        self.pool.close_all(self.shutdown_grace).await;
    }
}
