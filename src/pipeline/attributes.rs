//! Per-call attribute bag.
//!
//! Features pass resolved state to the engine layer through an explicit
//! struct-of-optionals rather than a reflective type-keyed map; every
//! well-known attribute set gets a named field.

use crate::config::TimeoutConfig;

/// Per-call timeout overrides, carried across redirect hops.
///
/// `None` means "inherit the feature default"; an explicit `Some(0)`
/// disables that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeoutAttributes {
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub socket_timeout_ms: Option<u64>,
}

impl TimeoutAttributes {
    pub fn request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    pub fn socket_timeout(mut self, ms: u64) -> Self {
        self.socket_timeout_ms = Some(ms);
        self
    }
}

/// Effective timeout values for one call, defaults merged in.
///
/// `0` means disabled for that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedTimeouts {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
}

impl ResolvedTimeouts {
    /// Merge per-call overrides with feature defaults.
    pub fn resolve(overrides: TimeoutAttributes, defaults: &TimeoutConfig) -> Self {
        Self {
            request_timeout_ms: overrides
                .request_timeout_ms
                .unwrap_or(defaults.request_timeout_ms),
            connect_timeout_ms: overrides
                .connect_timeout_ms
                .unwrap_or(defaults.connect_timeout_ms),
            socket_timeout_ms: overrides
                .socket_timeout_ms
                .unwrap_or(defaults.socket_timeout_ms),
        }
    }
}

/// Proxy settings relevant to engine handle reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxySettings {
    pub address: String,
}

/// Opaque security-context tag (e.g. which client TLS identity to use).
/// TLS negotiation itself is outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityContext {
    pub identity: String,
}

/// The open per-call attribute bag attached to each request context.
#[derive(Debug, Clone, Default)]
pub struct CallAttributes {
    /// Raw per-call overrides as set on the request.
    pub timeout: TimeoutAttributes,
    /// Proxy to route this call through, if any.
    pub proxy: Option<ProxySettings>,
    /// Security context for this call, if any.
    pub security: Option<SecurityContext>,
    resolved_timeouts: Option<ResolvedTimeouts>,
}

impl CallAttributes {
    /// Effective timeouts for this call, if a feature has resolved them.
    pub fn resolved_timeouts(&self) -> Option<ResolvedTimeouts> {
        self.resolved_timeouts
    }

    /// Record resolved timeouts. Immutable once set for the call's
    /// lifetime; a second write is ignored.
    pub fn set_resolved_timeouts(&mut self, resolved: ResolvedTimeouts) -> ResolvedTimeouts {
        *self.resolved_timeouts.get_or_insert(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_merges_defaults() {
        let defaults = TimeoutConfig::default();
        let overrides = TimeoutAttributes::default().request_timeout(500);
        let resolved = ResolvedTimeouts::resolve(overrides, &defaults);
        assert_eq!(resolved.request_timeout_ms, 500);
        assert_eq!(resolved.connect_timeout_ms, 10_000);
        assert_eq!(resolved.socket_timeout_ms, 10_000);
    }

    #[test]
    fn explicit_zero_disables_axis() {
        let defaults = TimeoutConfig::default();
        let overrides = TimeoutAttributes::default().request_timeout(0);
        let resolved = ResolvedTimeouts::resolve(overrides, &defaults);
        assert_eq!(resolved.request_timeout_ms, 0);
    }

    #[test]
    fn resolved_timeouts_write_once() {
        let mut attributes = CallAttributes::default();
        let first = ResolvedTimeouts {
            request_timeout_ms: 100,
            connect_timeout_ms: 200,
            socket_timeout_ms: 300,
        };
        assert_eq!(attributes.set_resolved_timeouts(first), first);

        let second = ResolvedTimeouts {
            request_timeout_ms: 1,
            connect_timeout_ms: 2,
            socket_timeout_ms: 3,
        };
        // Ignored: the first resolution wins for the call's lifetime.
        assert_eq!(attributes.set_resolved_timeouts(second), first);
        assert_eq!(attributes.resolved_timeouts(), Some(first));
    }
}
