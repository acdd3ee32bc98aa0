//! Pluggable client features.
//!
//! # Responsibilities
//! - Associate one feature instance per key per client
//! - Build immutable feature configuration at install time from a
//!   caller-supplied configure closure
//! - Replace (never stack) on reinstall under the same key, with a warning
//! - Let features register interceptors into pipeline phases

mod lifecycle;
mod redirect;
mod timeout;

pub use lifecycle::RequestLifecycleFeature;
pub use redirect::RedirectFeature;
pub use timeout::TimeoutFeature;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ClientError;
use crate::pipeline::Pipeline;

/// Unique key identifying a feature within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureKey(pub &'static str);

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A pluggable unit of behavior installed once per client.
///
/// Configuration is built once at install time and frozen; any per-call
/// runtime state lives in call-scoped attributes or call-local closures,
/// never in feature fields, so concurrent calls cannot interfere.
pub trait Feature: Send + Sync + 'static {
    type Config: Default;

    const KEY: FeatureKey;

    /// Build the immutable feature instance from its configuration.
    fn from_config(config: Self::Config) -> Result<Self, ClientError>
    where
        Self: Sized;

    /// Register this feature's interceptors against the client pipeline.
    fn install(self: Arc<Self>, pipeline: &mut Pipeline) -> Result<(), ClientError>;
}

/// Per-client registry of installed features. There is no process-wide
/// state; every client carries its own registry.
#[derive(Default)]
pub struct FeatureRegistry {
    installed: HashMap<FeatureKey, Arc<dyn Any + Send + Sync>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a feature, building its configuration through `configure`.
    ///
    /// Installing again under the same key replaces the previous instance.
    /// The old instance's pipeline slots are vacated in place and refilled
    /// by the new one, so interceptors are never double-registered and the
    /// feature keeps its position in each phase.
    pub fn install<F: Feature>(
        &mut self,
        pipeline: &mut Pipeline,
        configure: impl FnOnce(&mut F::Config),
    ) -> Result<(), ClientError> {
        let mut config = F::Config::default();
        configure(&mut config);
        let feature = Arc::new(F::from_config(config)?);

        let replacing = self.installed.remove(&F::KEY).is_some();
        if replacing {
            tracing::warn!(feature = %F::KEY, "feature already installed, replacing previous instance");
            pipeline.vacate_owned_by(F::KEY);
        }
        tracing::debug!(feature = %F::KEY, "installing feature");
        self.installed
            .insert(F::KEY, Arc::clone(&feature) as Arc<dyn Any + Send + Sync>);
        let result = feature.install(pipeline);
        if replacing {
            pipeline.purge_vacated(F::KEY);
        }
        result
    }

    /// Whether a feature is installed under `key`.
    pub fn contains(&self, key: FeatureKey) -> bool {
        self.installed.contains_key(&key)
    }

    /// The installed instance of `F`, if any.
    pub fn get<F: Feature>(&self) -> Option<Arc<F>> {
        self.installed
            .get(&F::KEY)
            .and_then(|any| Arc::clone(any).downcast::<F>().ok())
    }
}
