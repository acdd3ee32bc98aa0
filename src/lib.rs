//! Extensible asynchronous HTTP client core.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ HttpClient::execute ──▶ Pipeline (Before → State → Send → Receive)
//!                     │                    │
//!                     │              features: lifecycle / timeout / redirect
//!                     │                    │
//!                     │              EngineAdapter ──▶ ResourcePool (LRU handles)
//!                     │                    │
//!                     ◀── Call ◀── streaming Response ◀── transport I/O
//!
//!   ExecutionScope tree:  client root ─ hop scope ─ body stream scope
//!   (errors propagate up to the caller, cancellation propagates down)
//! ```
//!
//! Wire codecs, TLS, DNS and body (de)serialization live behind the
//! [`engine::EngineAdapter`] contract; this crate owns the pipeline, the
//! cancellation tree, the timeout subsystem and the engine-side handle
//! pool.

pub mod call;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod request;
pub mod scope;

pub use call::{Call, CallId, Response};
pub use client::{HttpClient, HttpClientBuilder};
pub use config::ClientConfig;
pub use error::{CancelCause, ClientError, EngineError, PoolError, TimeoutAxis};
pub use request::Request;
pub use scope::ExecutionScope;
