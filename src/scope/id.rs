//! Scope identity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for scope IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an execution scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    pub fn new() -> Self {
        Self(SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}
