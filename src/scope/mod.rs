//! Cancellable execution scopes.
//!
//! # Responsibilities
//! - Form the cancellation tree: client root scope, one child per call
//! - Deliver cancellation down (parent failure cancels active children),
//!   never up (a child failure leaves siblings and the parent untouched)
//! - Fire completion listeners exactly once per scope
//! - Expose an awaitable completion signal for cooperating I/O

mod id;

pub use id::ScopeId;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

use crate::error::CancelCause;

/// Terminal outcome of a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Normal completion. Active children are handed off, not cancelled.
    Ok,
    /// Failure completion. Every active child is cancelled with this cause.
    Cause(CancelCause),
}

impl Completion {
    /// The cancellation cause, if this was a failure completion.
    pub fn cause(&self) -> Option<&CancelCause> {
        match self {
            Completion::Ok => None,
            Completion::Cause(cause) => Some(cause),
        }
    }
}

type CompletionListener = Box<dyn FnOnce(&Completion) + Send + 'static>;

struct ScopeState {
    outcome: Option<Completion>,
    children: HashMap<ScopeId, Arc<ScopeInner>>,
    listeners: Vec<CompletionListener>,
}

struct ScopeInner {
    id: ScopeId,
    parent: Option<Weak<ScopeInner>>,
    state: Mutex<ScopeState>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ScopeInner {
    /// Bookkeeping lock. Critical sections stay short and never perform
    /// I/O or invoke listeners while held.
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A cancellable lifetime node in a tree rooted at the client.
///
/// Cloning shares the same node. State is monotonic: once completed (ok or
/// with cause) a scope never transitions again; the first completion wins
/// and a racing loser's cause is discarded.
#[derive(Clone)]
pub struct ExecutionScope {
    inner: Arc<ScopeInner>,
}

impl ExecutionScope {
    /// Create a root scope with no parent. The client owns one of these for
    /// its entire lifetime.
    pub fn root() -> Self {
        Self::new(None)
    }

    fn new(parent: Option<Weak<ScopeInner>>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        let inner = Arc::new(ScopeInner {
            id: ScopeId::new(),
            parent,
            state: Mutex::new(ScopeState {
                outcome: None,
                children: HashMap::new(),
                listeners: Vec::new(),
            }),
            done_tx,
            done_rx,
        });
        tracing::trace!(scope = %inner.id, "scope created");
        Self { inner }
    }

    /// Create a child scope.
    ///
    /// Safe to call while the parent is mid-shutdown: if the parent already
    /// completed with a cause, the child is born cancelled with that cause.
    /// If the parent completed normally, the child starts detached but
    /// active (the parent handed off).
    pub fn child(&self) -> Self {
        let child = Self::new(Some(Arc::downgrade(&self.inner)));

        let inherited_cause = {
            let mut state = self.inner.lock();
            match &state.outcome {
                None => {
                    state
                        .children
                        .insert(child.inner.id, Arc::clone(&child.inner));
                    None
                }
                Some(Completion::Cause(cause)) => Some(cause.clone()),
                Some(Completion::Ok) => None,
            }
        };

        if let Some(cause) = inherited_cause {
            child.cancel(cause);
        }
        child
    }

    /// Unique identity of this scope.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Whether this scope has not yet completed.
    pub fn is_active(&self) -> bool {
        self.inner.lock().outcome.is_none()
    }

    /// The recorded outcome, if the scope has completed.
    pub fn completion(&self) -> Option<Completion> {
        self.inner.lock().outcome.clone()
    }

    /// The recorded cancellation cause, if the scope failed.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        match self.inner.lock().outcome {
            Some(Completion::Cause(ref cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Complete normally. Active children are left running; this is the
    /// hand-off pattern used when a call's scope completes while its body
    /// stream is still being drained by the consumer. Returns false if the
    /// scope was already terminal.
    pub fn complete_ok(&self) -> bool {
        self.complete(Completion::Ok)
    }

    /// Complete with a cause, cancelling every active child.
    pub fn complete_with_cause(&self, cause: CancelCause) -> bool {
        self.complete(Completion::Cause(cause))
    }

    /// Idempotent cancellation: a no-op on an already-terminal scope, and
    /// the recorded cause is never overwritten.
    pub fn cancel(&self, cause: CancelCause) {
        self.complete_with_cause(cause);
    }

    /// Register a completion listener. Fires exactly once; if the scope is
    /// already terminal it fires immediately on the calling task.
    pub fn on_completion<F>(&self, listener: F)
    where
        F: FnOnce(&Completion) + Send + 'static,
    {
        let mut pending: Option<CompletionListener> = Some(Box::new(listener));
        let fire_now = {
            let mut state = self.inner.lock();
            match state.outcome.clone() {
                Some(outcome) => Some(outcome),
                None => {
                    if let Some(boxed) = pending.take() {
                        state.listeners.push(boxed);
                    }
                    None
                }
            }
        };
        if let (Some(outcome), Some(boxed)) = (fire_now, pending) {
            boxed(&outcome);
        }
    }

    /// Wait until this scope completes (ok or with cause).
    pub async fn done(&self) {
        let mut rx = self.inner.done_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Resolve only if this scope is cancelled with a cause. Pends forever
    /// on normal completion, so racing I/O against it is not aborted by a
    /// parent handing off.
    pub async fn cancelled(&self) -> CancelCause {
        self.done().await;
        match self.cancel_cause() {
            Some(cause) => cause,
            None => futures_util::future::pending().await,
        }
    }

    fn complete(&self, outcome: Completion) -> bool {
        let (listeners, doomed_children) = {
            let mut state = self.inner.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            let listeners = std::mem::take(&mut state.listeners);
            let children = match outcome {
                // Failure cancels children; normal completion hands off.
                Completion::Cause(_) => state.children.drain().map(|(_, c)| c).collect(),
                Completion::Ok => Vec::new(),
            };
            (listeners, children)
        };

        match &outcome {
            Completion::Ok => {
                tracing::trace!(scope = %self.inner.id, "scope completed");
            }
            Completion::Cause(cause) => {
                tracing::debug!(scope = %self.inner.id, %cause, "scope cancelled");
            }
        }

        // Children transition before this scope's listeners observe the
        // completion, and without holding our state lock.
        if let Completion::Cause(ref cause) = outcome {
            for child in doomed_children {
                ExecutionScope { inner: child }.cancel(cause.clone());
            }
        }

        let _ = self.inner.done_tx.send(true);

        for listener in listeners {
            listener(&outcome);
        }

        // Detach from the parent's child registry.
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent.lock().children.remove(&self.inner.id);
        }

        true
    }
}

impl std::fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("id", &self.inner.id)
            .field("outcome", &self.inner.lock().outcome)
            .finish()
    }
}
