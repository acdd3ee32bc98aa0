//! Request lifecycle feature.
//!
//! Gives every hop its own execution scope as a child of the scope the
//! client passed in (normally the client root). Installed by default and
//! first in the Before phase, so every later interceptor (watchdog arming
//! included) sees the per-hop scope. The client completes the hop scope
//! when the call finishes: ok when the consumer is done, with a cause when
//! the pipeline fails.

use std::sync::Arc;

use crate::error::ClientError;
use crate::features::{Feature, FeatureKey};
use crate::pipeline::{Flow, Phase, Pipeline};

pub struct RequestLifecycleFeature;

impl Feature for RequestLifecycleFeature {
    type Config = ();
    const KEY: FeatureKey = FeatureKey("RequestLifecycle");

    fn from_config(_config: Self::Config) -> Result<Self, ClientError> {
        Ok(Self)
    }

    fn install(self: Arc<Self>, pipeline: &mut Pipeline) -> Result<(), ClientError> {
        pipeline.intercept(
            Phase::BEFORE,
            Self::KEY,
            Arc::new(|ctx| {
                Box::pin(async move {
                    ctx.scope = ctx.scope.child();
                    tracing::trace!(
                        call = %ctx.call_id,
                        hop = ctx.hop,
                        scope = %ctx.scope.id(),
                        "hop scope created"
                    );
                    Ok(Flow::Proceed)
                })
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallId;
    use crate::features::FeatureRegistry;
    use crate::pipeline::CallContext;
    use crate::request::Request;
    use crate::scope::ExecutionScope;

    #[tokio::test]
    async fn each_hop_gets_a_fresh_child_scope() {
        let mut pipeline = Pipeline::new();
        let mut registry = FeatureRegistry::new();
        registry
            .install::<RequestLifecycleFeature>(&mut pipeline, |_| {})
            .unwrap();

        let root = ExecutionScope::root();
        let request = Request::get("http://localhost/".parse().unwrap());
        let mut first = CallContext::new(CallId::new(), 0, request.clone(), root.clone());
        pipeline.execute(&mut first).await.unwrap();
        let mut second = CallContext::new(CallId::new(), 0, request, root.clone());
        pipeline.execute(&mut second).await.unwrap();

        assert_ne!(first.scope.id(), root.id());
        assert_ne!(second.scope.id(), root.id());
        assert_ne!(first.scope.id(), second.scope.id());
    }
}
