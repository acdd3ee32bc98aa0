//! Redirect-following feature.
//!
//! Marks the next hop on the call context when a response is a 3xx with a
//! Location header; the client starts the new logical hop after the
//! pipeline returns. Each hop shares the original timeout attributes and
//! re-arms its own request watchdog (per-hop budget, not a shared
//! decrementing one). A hop timeout is therefore attributed to the hop in
//! which it occurred.

use std::sync::Arc;

use http::header::LOCATION;

use crate::config::RedirectConfig;
use crate::error::ClientError;
use crate::features::{Feature, FeatureKey};
use crate::pipeline::{CallContext, Flow, Phase, Pipeline};

pub struct RedirectFeature {
    config: RedirectConfig,
}

impl Feature for RedirectFeature {
    type Config = RedirectConfig;
    const KEY: FeatureKey = FeatureKey("Redirect");

    fn from_config(config: Self::Config) -> Result<Self, ClientError> {
        if config.follow && config.max_redirects == 0 {
            return Err(ClientError::Configuration(
                "redirect following enabled with max_redirects = 0".into(),
            ));
        }
        Ok(Self { config })
    }

    fn install(self: Arc<Self>, pipeline: &mut Pipeline) -> Result<(), ClientError> {
        if !self.config.follow {
            return Ok(());
        }
        let feature = Arc::clone(&self);
        pipeline.intercept(
            Phase::RECEIVE,
            Self::KEY,
            Arc::new(move |ctx| {
                let feature = Arc::clone(&feature);
                Box::pin(async move { feature.mark_next_hop(ctx) })
            }),
        )
    }
}

impl RedirectFeature {
    fn mark_next_hop(&self, ctx: &mut CallContext) -> Result<Flow, ClientError> {
        let Some(response) = ctx.response.as_ref() else {
            return Ok(Flow::Proceed);
        };
        if !response.status().is_redirection() {
            return Ok(Flow::Proceed);
        }
        let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(Flow::Proceed);
        };

        let target = ctx.request.url.join(location).map_err(|err| {
            ClientError::Configuration(format!("invalid redirect location {location:?}: {err}"))
        })?;

        if ctx.hop >= self.config.max_redirects {
            return Err(ClientError::TooManyRedirects {
                limit: self.config.max_redirects,
            });
        }

        tracing::debug!(
            call = %ctx.call_id,
            hop = ctx.hop,
            status = %response.status(),
            target = %target,
            "following redirect"
        );
        ctx.next_hop = Some(ctx.request.redirected_to(target));
        Ok(Flow::Proceed)
    }
}
