//! Outgoing request representation.
//!
//! Body (de)serialization and content negotiation live outside this crate;
//! a request carries opaque bytes.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::pipeline::TimeoutAttributes;

/// A fully-built outgoing request plus per-call overrides.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Per-call timeout overrides; unset fields inherit feature defaults.
    /// Shared across every hop of a redirect chain.
    pub timeout: TimeoutAttributes,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: TimeoutAttributes::default(),
        }
    }

    /// Convenience constructor for a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set per-call timeout overrides.
    pub fn timeout(mut self, timeout: TimeoutAttributes) -> Self {
        self.timeout = timeout;
        self
    }

    /// The request this redirect hop resolves to. Keeps the method, body
    /// and timeout overrides; replaces the target URL.
    pub(crate) fn redirected_to(&self, location: Url) -> Self {
        let mut next = self.clone();
        next.url = location;
        next
    }
}
