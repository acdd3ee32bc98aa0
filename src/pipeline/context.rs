//! Mutable request-in-flight context handed to every interceptor.

use crate::call::{CallId, Response};
use crate::pipeline::CallAttributes;
use crate::request::Request;
use crate::scope::ExecutionScope;

/// State for one logical call flowing through the pipeline.
///
/// A redirect chain creates a fresh context per hop; the per-call timeout
/// overrides travel with the request so each hop re-resolves from the same
/// attributes.
pub struct CallContext {
    /// Identity of the call this hop belongs to.
    pub call_id: CallId,
    /// Redirect hop index, 0 for the original request.
    pub hop: u32,
    /// The request as features see and mutate it.
    pub request: Request,
    /// Open attribute bag features use to pass resolved state to the engine.
    pub attributes: CallAttributes,
    /// This hop's cancellable scope, a child of the client root scope.
    pub scope: ExecutionScope,
    /// Response produced by the Send phase, transformed by Receive phase.
    pub response: Option<Response>,
    /// Set by the redirect feature: the request for the next hop. The
    /// client drains this after the pipeline returns and starts a new
    /// logical call sharing the same timeout attributes.
    pub next_hop: Option<Request>,
}

impl CallContext {
    pub fn new(call_id: CallId, hop: u32, request: Request, scope: ExecutionScope) -> Self {
        let mut attributes = CallAttributes::default();
        attributes.timeout = request.timeout;
        Self {
            call_id,
            hop,
            request,
            attributes,
            scope,
            response: None,
            next_hop: None,
        }
    }

    /// Take the response out of the context after the pipeline finishes.
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }
}
