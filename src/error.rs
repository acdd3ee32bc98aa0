//! Failure taxonomy for the client core.
//!
//! # Responsibilities
//! - Distinguish timeout, cancellation, transport, configuration and pool
//!   failures so callers can discriminate
//! - Carry the cancellation cause recorded on an [`crate::scope::ExecutionScope`]
//!   through to the caller, including on partially-drained body streams

use thiserror::Error;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAxis {
    /// Whole-request watchdog, armed per hop.
    Request,
    /// Time to establish a transport connection.
    Connect,
    /// Idle time on an established connection.
    Socket,
}

impl std::fmt::Display for TimeoutAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutAxis::Request => write!(f, "request"),
            TimeoutAxis::Connect => write!(f, "connect"),
            TimeoutAxis::Socket => write!(f, "socket"),
        }
    }
}

/// Why a scope reached `CompletedWithCause`.
///
/// Cloneable so the same cause can surface both from the call result and
/// from a body stream that was still being drained when it fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// Explicit cancellation by the caller.
    UserCancelled,
    /// The per-hop request watchdog fired.
    RequestTimeout { limit_ms: u64 },
    /// The engine reported a connect deadline expiry.
    ConnectTimeout { limit_ms: u64 },
    /// The engine reported a socket idle expiry.
    SocketTimeout { limit_ms: u64 },
    /// A failure elsewhere in the pipeline completed the scope.
    UpstreamFailure(String),
}

impl CancelCause {
    /// The timeout axis this cause corresponds to, if any.
    pub fn timeout_axis(&self) -> Option<TimeoutAxis> {
        match self {
            CancelCause::RequestTimeout { .. } => Some(TimeoutAxis::Request),
            CancelCause::ConnectTimeout { .. } => Some(TimeoutAxis::Connect),
            CancelCause::SocketTimeout { .. } => Some(TimeoutAxis::Socket),
            _ => None,
        }
    }
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::UserCancelled => write!(f, "cancelled by caller"),
            CancelCause::RequestTimeout { limit_ms } => {
                write!(f, "request timeout has expired [{limit_ms} ms]")
            }
            CancelCause::ConnectTimeout { limit_ms } => {
                write!(f, "connect timeout has expired [{limit_ms} ms]")
            }
            CancelCause::SocketTimeout { limit_ms } => {
                write!(f, "socket timeout has expired [{limit_ms} ms]")
            }
            CancelCause::UpstreamFailure(inner) => write!(f, "upstream failure: {inner}"),
        }
    }
}

/// Failures reported by a transport engine.
///
/// Engines must keep cancellation and timeout distinct from generic I/O
/// errors so the pipeline can attribute them correctly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("connect timed out after {limit_ms} ms")]
    ConnectTimeout { limit_ms: u64 },

    #[error("socket idle for longer than {limit_ms} ms")]
    SocketTimeout { limit_ms: u64 },

    /// In-flight I/O aborted because the call's scope was cancelled.
    #[error("aborted: {0}")]
    Aborted(CancelCause),

    /// The engine-side resource pool could not provide a handle.
    #[error("resource pool failure: {0}")]
    Pool(#[from] PoolError),

    /// Any other transport-level failure.
    #[error("transport failure: {0}")]
    Io(String),
}

/// Failures originating in the engine-side resource pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The factory for a pooled handle failed. Surfaced only to the call
    /// that triggered the miss; the pool entry is removed, not poisoned.
    #[error("engine handle creation failed: {0}")]
    Creation(String),

    #[error("resource pool is closed")]
    Closed,
}

/// Terminal failure of a call, one cause per call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{axis} timeout exceeded [{limit_ms} ms]")]
    TimeoutExceeded { axis: TimeoutAxis, limit_ms: u64 },

    #[error("call cancelled: {0}")]
    Cancelled(CancelCause),

    #[error("engine failure: {0}")]
    Engine(EngineError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource pool failure: {0}")]
    Pool(#[from] PoolError),

    #[error("redirect limit of {limit} hops exceeded")]
    TooManyRedirects { limit: u32 },
}

impl ClientError {
    /// Translate a recorded cancellation cause into the caller-facing error.
    ///
    /// Timeout-flavored causes surface as [`ClientError::TimeoutExceeded`]
    /// so callers see the same error whether they observe the call result
    /// or a body stream cut off mid-drain.
    pub fn from_cause(cause: CancelCause) -> Self {
        match cause {
            CancelCause::RequestTimeout { limit_ms } => ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Request,
                limit_ms,
            },
            CancelCause::ConnectTimeout { limit_ms } => ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Connect,
                limit_ms,
            },
            CancelCause::SocketTimeout { limit_ms } => ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Socket,
                limit_ms,
            },
            other => ClientError::Cancelled(other),
        }
    }

    /// The cancellation cause equivalent to this error, used when a failed
    /// pipeline completes the call scope.
    pub fn as_cause(&self) -> CancelCause {
        match self {
            ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Request,
                limit_ms,
            } => CancelCause::RequestTimeout { limit_ms: *limit_ms },
            ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Connect,
                limit_ms,
            } => CancelCause::ConnectTimeout { limit_ms: *limit_ms },
            ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Socket,
                limit_ms,
            } => CancelCause::SocketTimeout { limit_ms: *limit_ms },
            ClientError::Cancelled(cause) => cause.clone(),
            other => CancelCause::UpstreamFailure(other.to_string()),
        }
    }
}

impl From<EngineError> for ClientError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ConnectTimeout { limit_ms } => ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Connect,
                limit_ms,
            },
            EngineError::SocketTimeout { limit_ms } => ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Socket,
                limit_ms,
            },
            EngineError::Aborted(cause) => ClientError::from_cause(cause),
            EngineError::Pool(err) => ClientError::Pool(err),
            other => ClientError::Engine(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_cause_surfaces_as_timeout_error() {
        let err = ClientError::from_cause(CancelCause::RequestTimeout { limit_ms: 100 });
        assert_eq!(
            err,
            ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Request,
                limit_ms: 100
            }
        );
    }

    #[test]
    fn user_cancel_stays_cancelled() {
        let err = ClientError::from_cause(CancelCause::UserCancelled);
        assert_eq!(err, ClientError::Cancelled(CancelCause::UserCancelled));
    }

    #[test]
    fn engine_abort_keeps_cause() {
        let err: ClientError =
            EngineError::Aborted(CancelCause::SocketTimeout { limit_ms: 50 }).into();
        assert_eq!(
            err,
            ClientError::TimeoutExceeded {
                axis: TimeoutAxis::Socket,
                limit_ms: 50
            }
        );
    }

    #[test]
    fn cause_round_trip() {
        let original = ClientError::TimeoutExceeded {
            axis: TimeoutAxis::Request,
            limit_ms: 250,
        };
        assert_eq!(ClientError::from_cause(original.as_cause()), original);
    }
}
