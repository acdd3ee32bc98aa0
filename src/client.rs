//! Client assembly and call execution.
//!
//! # Responsibilities
//! - Build the pipeline, install default and caller-provided features
//! - Own the root execution scope for the client's lifetime
//! - Run the redirect hop loop: each hop is a new logical call through the
//!   full pipeline, sharing the original timeout attributes
//! - Dispatch the Send phase to the engine, racing it against the hop
//!   scope so cancellation is honored even by engines that ignore it
//! - Shut down: drain the engine's pooled handles, then complete the root

use std::sync::Arc;

use crate::call::{Body, Call, CallId, Response};
use crate::config::ClientConfig;
use crate::engine::EngineAdapter;
use crate::error::{CancelCause, ClientError, EngineError};
use crate::features::{
    Feature, FeatureKey, FeatureRegistry, RedirectFeature, RequestLifecycleFeature, TimeoutFeature,
};
use crate::pipeline::{CallContext, Flow, Interceptor, Phase, Pipeline};
use crate::request::Request;
use crate::scope::{ExecutionScope, ScopeId};

/// Owner tag for the client's own terminal Send interceptor.
const ENGINE_DISPATCH: FeatureKey = FeatureKey("EngineDispatch");

/// Builder for [`HttpClient`]. The request lifecycle feature is installed
/// up front so it runs before anything else in the Before phase; timeout
/// and redirect features are installed at build time unless the caller
/// already provided their own.
pub struct HttpClientBuilder {
    config: ClientConfig,
    engine: Arc<dyn EngineAdapter>,
    pipeline: Pipeline,
    registry: FeatureRegistry,
}

impl HttpClientBuilder {
    pub fn new(engine: impl EngineAdapter) -> Self {
        let mut pipeline = Pipeline::new();
        let mut registry = FeatureRegistry::new();
        // Infallible: the standard phases exist and nothing is installed yet.
        let _ = registry.install::<RequestLifecycleFeature>(&mut pipeline, |_| {});
        Self {
            config: ClientConfig::default(),
            engine: Arc::new(engine),
            pipeline,
            registry,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a feature, configuring it through `configure`. Reinstalling
    /// under the same key replaces the prior instance with a warning.
    pub fn install<F: Feature>(
        mut self,
        configure: impl FnOnce(&mut F::Config),
    ) -> Result<Self, ClientError> {
        self.registry
            .install::<F>(&mut self.pipeline, configure)?;
        Ok(self)
    }

    /// Define a custom pipeline phase relative to an existing one.
    pub fn define_phase(mut self, phase: Phase, after: Option<Phase>) -> Result<Self, ClientError> {
        self.pipeline.define_phase(phase, after)?;
        Ok(self)
    }

    /// Register a raw interceptor outside any feature.
    pub fn intercept(
        mut self,
        phase: Phase,
        owner: FeatureKey,
        interceptor: Interceptor,
    ) -> Result<Self, ClientError> {
        self.pipeline.intercept(phase, owner, interceptor)?;
        Ok(self)
    }

    pub fn build(mut self) -> Result<HttpClient, ClientError> {
        if !self.registry.contains(TimeoutFeature::KEY) {
            let defaults = self.config.timeouts;
            self.registry
                .install::<TimeoutFeature>(&mut self.pipeline, |config| *config = defaults)?;
        }
        if !self.registry.contains(RedirectFeature::KEY) {
            let redirects = self.config.redirects;
            self.registry
                .install::<RedirectFeature>(&mut self.pipeline, |config| *config = redirects)?;
        }
        install_engine_dispatch(&mut self.pipeline, Arc::clone(&self.engine))?;

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                pipeline: self.pipeline,
                registry: self.registry,
                engine: self.engine,
                root_scope: ExecutionScope::root(),
            }),
        })
    }
}

struct ClientInner {
    config: ClientConfig,
    pipeline: Pipeline,
    registry: FeatureRegistry,
    engine: Arc<dyn EngineAdapter>,
    root_scope: ExecutionScope,
}

/// The extensible HTTP client. Cheap to clone; all clones share the
/// pipeline, feature registry, engine and root scope.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    pub fn builder(engine: impl EngineAdapter) -> HttpClientBuilder {
        HttpClientBuilder::new(engine)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The client-lifetime root of the cancellation tree.
    pub fn root_scope(&self) -> &ExecutionScope {
        &self.inner.root_scope
    }

    /// The installed instance of a feature, if any.
    pub fn feature<F: Feature>(&self) -> Option<Arc<F>> {
        self.inner.registry.get::<F>()
    }

    /// Execute one logical call, following redirects per configuration.
    ///
    /// Every hop runs the full pipeline: a fresh hop scope is created, the
    /// request watchdog re-armed, and the engine dispatched. Hop failures
    /// complete that hop's scope with the failure cause, which stops its
    /// watchdog; sibling calls and the root scope are unaffected.
    pub async fn execute(&self, request: Request) -> Result<Call, ClientError> {
        let inner = &self.inner;
        let call_id = CallId::new();
        let mut current = request;
        let mut hop: u32 = 0;

        loop {
            let mut ctx = CallContext::new(call_id, hop, current, inner.root_scope.clone());
            match inner.pipeline.execute(&mut ctx).await {
                Err(err) => {
                    tracing::debug!(call = %call_id, hop, error = %err, "call failed");
                    finish_failed_hop(&ctx, inner.root_scope.id(), &err);
                    return Err(err);
                }
                Ok(()) => {
                    if let Some(next) = ctx.next_hop.take() {
                        // Dropping the hop's response completes its scope
                        // normally and releases the discarded body.
                        ctx.response = None;
                        current = next;
                        hop += 1;
                        continue;
                    }
                    let hop_scope = ctx.scope.clone();
                    match ctx.take_response() {
                        Some(response) => {
                            tracing::trace!(call = %call_id, hop, status = %response.status(), "call produced response");
                            return Ok(Call::new(call_id, hop_scope, response));
                        }
                        None => {
                            let err = ClientError::Configuration(
                                "pipeline finished without producing a response".into(),
                            );
                            finish_failed_hop(&ctx, inner.root_scope.id(), &err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Shut down the client: tear down pooled engine handles (bounded
    /// grace for in-flight calls) and complete the root scope. Normal
    /// completion hands off, so calls still draining are not cancelled.
    pub async fn close(&self) {
        self.inner.engine.shutdown().await;
        self.inner.root_scope.complete_ok();
        tracing::debug!("client closed");
    }

    /// Abort the client: cancel every active call, then shut down.
    pub async fn abort(&self) {
        self.inner
            .root_scope
            .cancel(CancelCause::UserCancelled);
        self.inner.engine.shutdown().await;
    }
}

fn finish_failed_hop(ctx: &CallContext, root: ScopeId, err: &ClientError) {
    // Only ever complete the per-hop scope; if the lifecycle feature was
    // somehow not installed the context still points at the root.
    if ctx.scope.id() != root && ctx.scope.is_active() {
        ctx.scope.complete_with_cause(err.as_cause());
    }
}

fn install_engine_dispatch(
    pipeline: &mut Pipeline,
    engine: Arc<dyn EngineAdapter>,
) -> Result<(), ClientError> {
    pipeline.intercept(
        Phase::SEND,
        ENGINE_DISPATCH,
        Arc::new(move |ctx| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                let scope = ctx.scope.clone();
                // Race the engine against cancellation so a watchdog firing
                // mid-I/O is honored even if the engine never checks the
                // scope; the engine's own abort surfaces the same way.
                let outcome = tokio::select! {
                    result = engine.execute(&ctx.request, &ctx.attributes, &scope) => result,
                    cause = scope.cancelled() => Err(EngineError::Aborted(cause)),
                };
                let engine_response = outcome.map_err(ClientError::from)?;

                let stream_scope = ctx.scope.child();
                let body = Body::new(engine_response.body, ctx.scope.clone(), stream_scope);
                ctx.response = Some(Response::new(
                    engine_response.status,
                    engine_response.headers,
                    body,
                ));
                Ok(Flow::Proceed)
            })
        }),
    )
}
