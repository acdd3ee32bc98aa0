//! Client configuration schema.
//!
//! All types derive Serde traits so a configuration can be loaded from a
//! config file or built in code; every field has a documented default.

use serde::{Deserialize, Serialize};

/// Root configuration for an [`crate::client::HttpClient`].
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Default timeout values, overridable per call.
    pub timeouts: TimeoutConfig,

    /// Redirect-following behavior.
    pub redirects: RedirectConfig,

    /// Engine-side resource pool settings.
    pub pool: PoolConfig,
}

/// Timeout defaults installed with the timeout feature.
///
/// A value of `0` disables that axis entirely.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request deadline in milliseconds, re-armed per redirect hop.
    pub request_timeout_ms: u64,

    /// Connect deadline in milliseconds, applied by the engine.
    pub connect_timeout_ms: u64,

    /// Socket idle deadline in milliseconds, applied by the engine.
    pub socket_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            socket_timeout_ms: 10_000,
        }
    }
}

/// Redirect-following configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Follow 3xx responses carrying a Location header.
    pub follow: bool,

    /// Maximum hops before the call fails with a redirect-limit error.
    pub max_redirects: u32,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            follow: true,
            max_redirects: 20,
        }
    }
}

/// Engine-side resource pool configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of cached engine handles; inserting beyond this
    /// evicts the least-recently-used entry.
    pub capacity: usize,

    /// Grace period in milliseconds that `close_all` waits for in-flight
    /// users before force-closing their handles.
    pub shutdown_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            shutdown_grace_ms: 2_000,
        }
    }
}
