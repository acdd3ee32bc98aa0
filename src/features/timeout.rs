//! Timeout feature.
//!
//! # Responsibilities
//! - Resolve effective per-call timeouts (per-call override merged with
//!   feature defaults) once per hop and record them in call attributes
//! - Arm a request watchdog per hop when the request axis is enabled
//! - Disarm the watchdog when the call's scope completes for any reason,
//!   so no timer outlives its call
//!
//! Connect and socket timeouts are not enforced here; the engine applies
//! them to the underlying transport handle, reading the resolved values
//! from the attribute bag. On redirects the request watchdog is re-armed
//! fresh for every hop: a chain is bounded by hops times the request
//! timeout, not by a shared decrementing budget.

use std::sync::Arc;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::error::{CancelCause, ClientError};
use crate::features::{Feature, FeatureKey};
use crate::pipeline::{Flow, Phase, Pipeline, ResolvedTimeouts};
use crate::scope::ExecutionScope;

pub struct TimeoutFeature {
    defaults: TimeoutConfig,
}

impl TimeoutFeature {
    pub fn defaults(&self) -> TimeoutConfig {
        self.defaults
    }
}

impl Feature for TimeoutFeature {
    type Config = TimeoutConfig;
    const KEY: FeatureKey = FeatureKey("Timeout");

    fn from_config(config: Self::Config) -> Result<Self, ClientError> {
        Ok(Self { defaults: config })
    }

    fn install(self: Arc<Self>, pipeline: &mut Pipeline) -> Result<(), ClientError> {
        let feature = Arc::clone(&self);
        pipeline.intercept(
            Phase::BEFORE,
            Self::KEY,
            Arc::new(move |ctx| {
                let feature = Arc::clone(&feature);
                Box::pin(async move {
                    let resolved =
                        ResolvedTimeouts::resolve(ctx.attributes.timeout, &feature.defaults);
                    // First resolution wins for this hop's lifetime.
                    let resolved = ctx.attributes.set_resolved_timeouts(resolved);

                    if resolved.request_timeout_ms > 0 {
                        arm_watchdog(&ctx.scope, resolved.request_timeout_ms);
                        tracing::trace!(
                            call = %ctx.call_id,
                            hop = ctx.hop,
                            limit_ms = resolved.request_timeout_ms,
                            "request watchdog armed"
                        );
                    }
                    Ok(Flow::Proceed)
                })
            }),
        )
    }
}

/// Start the per-hop deadline watchdog against `scope`.
///
/// The task handle lives in this call's completion listener, not in the
/// feature, so concurrent calls cannot clobber each other's watchdog.
fn arm_watchdog(scope: &ExecutionScope, limit_ms: u64) {
    let armed_scope = scope.clone();
    let watchdog = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(limit_ms)).await;
        tracing::debug!(scope = %armed_scope.id(), limit_ms, "request watchdog fired");
        armed_scope.cancel(CancelCause::RequestTimeout { limit_ms });
    });
    scope.on_completion(move |_| watchdog.abort());
}
