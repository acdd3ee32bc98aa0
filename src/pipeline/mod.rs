//! Ordered interceptor pipeline.
//!
//! # Responsibilities
//! - Maintain the total phase order (Before → State → Send → Receive by
//!   default, custom phases inserted relative to existing ones)
//! - Run interceptors phase-by-phase, in registration order within a phase
//! - Stop the whole chain on the first error; only the cleanup path runs
//!   after a failure
//! - Support explicit short-circuit: an interceptor that produced a final
//!   result skips the remaining interceptors and phases

mod attributes;
mod context;

pub use attributes::{
    CallAttributes, ProxySettings, ResolvedTimeouts, SecurityContext, TimeoutAttributes,
};
pub use context::CallContext;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::ClientError;
use crate::features::FeatureKey;

/// A named, totally-ordered stage of request processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Phase(pub &'static str);

impl Phase {
    /// Request mutation, scope setup, watchdog arming.
    pub const BEFORE: Phase = Phase("Before");
    /// Per-call state propagation (cookies, auth state and the like).
    pub const STATE: Phase = Phase("State");
    /// Engine selection and dispatch.
    pub const SEND: Phase = Phase("Send");
    /// Response transformation on the way back.
    pub const RECEIVE: Phase = Phase("Receive");
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// What an interceptor tells the pipeline to do next.
///
/// Returning normally proceeds implicitly; `Finish` is the explicit
/// short-circuit action. There is no way to stall the chain by merely
/// returning early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next interceptor, then the next phase.
    Proceed,
    /// Short-circuit: skip all remaining interceptors and phases.
    Finish,
}

/// An interceptor: receives the mutable call context, may mutate it,
/// short-circuit, or fail.
pub type Interceptor = Arc<
    dyn for<'a> Fn(&'a mut CallContext) -> BoxFuture<'a, Result<Flow, ClientError>> + Send + Sync,
>;

struct Registration {
    owner: FeatureKey,
    /// `None` marks a slot vacated by a feature reinstall; the replacement
    /// instance fills it in place so the original ordering is preserved.
    interceptor: Option<Interceptor>,
}

struct PhaseSlot {
    phase: Phase,
    interceptors: Vec<Registration>,
}

/// The ordered phase list with registered interceptors.
pub struct Pipeline {
    phases: Vec<PhaseSlot>,
}

impl Pipeline {
    /// A pipeline with the standard request phases.
    pub fn new() -> Self {
        let phases = [Phase::BEFORE, Phase::STATE, Phase::SEND, Phase::RECEIVE]
            .into_iter()
            .map(|phase| PhaseSlot {
                phase,
                interceptors: Vec::new(),
            })
            .collect();
        Self { phases }
    }

    fn position(&self, phase: Phase) -> Option<usize> {
        self.phases.iter().position(|slot| slot.phase == phase)
    }

    /// Insert a custom phase after `after`, or at the end of the order.
    pub fn define_phase(&mut self, phase: Phase, after: Option<Phase>) -> Result<(), ClientError> {
        if self.position(phase).is_some() {
            return Err(ClientError::Configuration(format!(
                "phase {phase} is already defined"
            )));
        }
        let slot = PhaseSlot {
            phase,
            interceptors: Vec::new(),
        };
        match after {
            Some(anchor) => {
                let index = self.position(anchor).ok_or_else(|| {
                    ClientError::Configuration(format!("unknown anchor phase {anchor}"))
                })?;
                self.phases.insert(index + 1, slot);
            }
            None => self.phases.push(slot),
        }
        Ok(())
    }

    /// Register an interceptor in a phase, tagged with the feature that
    /// owns it. A slot vacated by a reinstall of the same feature is
    /// filled in place; otherwise the interceptor goes at the end of the
    /// phase.
    pub fn intercept(
        &mut self,
        phase: Phase,
        owner: FeatureKey,
        interceptor: Interceptor,
    ) -> Result<(), ClientError> {
        let index = self
            .position(phase)
            .ok_or_else(|| ClientError::Configuration(format!("unknown phase {phase}")))?;
        let slot = &mut self.phases[index];
        if let Some(vacant) = slot
            .interceptors
            .iter_mut()
            .find(|reg| reg.owner == owner && reg.interceptor.is_none())
        {
            vacant.interceptor = Some(interceptor);
        } else {
            slot.interceptors.push(Registration {
                owner,
                interceptor: Some(interceptor),
            });
        }
        Ok(())
    }

    /// Remove every interceptor a feature registered, in all phases.
    pub fn remove_owned_by(&mut self, owner: FeatureKey) {
        for slot in &mut self.phases {
            slot.interceptors.retain(|reg| reg.owner != owner);
        }
    }

    /// Vacate a feature's registrations ahead of a reinstall: the slots
    /// stay in position for the replacement instance to fill.
    pub(crate) fn vacate_owned_by(&mut self, owner: FeatureKey) {
        for slot in &mut self.phases {
            for reg in &mut slot.interceptors {
                if reg.owner == owner {
                    reg.interceptor = None;
                }
            }
        }
    }

    /// Drop vacated slots the replacement instance did not refill.
    pub(crate) fn purge_vacated(&mut self, owner: FeatureKey) {
        for slot in &mut self.phases {
            slot.interceptors
                .retain(|reg| reg.owner != owner || reg.interceptor.is_some());
        }
    }

    /// Run the pipeline for one hop.
    ///
    /// Checks the hop's scope before each interceptor so a watchdog
    /// cancellation is observed promptly even by interceptors that never
    /// look at the scope themselves.
    pub async fn execute(&self, ctx: &mut CallContext) -> Result<(), ClientError> {
        'phases: for slot in &self.phases {
            for reg in &slot.interceptors {
                let Some(interceptor) = &reg.interceptor else {
                    continue;
                };
                if let Some(cause) = ctx.scope.cancel_cause() {
                    return Err(ClientError::from_cause(cause));
                }
                match interceptor(ctx).await? {
                    Flow::Proceed => {}
                    Flow::Finish => {
                        tracing::trace!(
                            call = %ctx.call_id,
                            phase = %slot.phase,
                            "interceptor short-circuited pipeline"
                        );
                        break 'phases;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallId;
    use crate::error::CancelCause;
    use crate::request::Request;
    use crate::scope::ExecutionScope;
    use std::sync::Mutex;

    fn context() -> CallContext {
        let request = Request::get("http://localhost/".parse().unwrap());
        CallContext::new(CallId::new(), 0, request, ExecutionScope::root())
    }

    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
        flow: Flow,
    ) -> Interceptor {
        let log = Arc::clone(log);
        Arc::new(move |_ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(label);
                Ok(flow)
            })
        })
    }

    #[tokio::test]
    async fn phases_run_in_order_interceptors_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let key = FeatureKey("test");
        pipeline
            .intercept(Phase::SEND, key, recording(&log, "send", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "before-1", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "before-2", Flow::Proceed))
            .unwrap();

        pipeline.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["before-1", "before-2", "send"]);
    }

    #[tokio::test]
    async fn finish_skips_remaining_interceptors_and_phases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let key = FeatureKey("test");
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "first", Flow::Finish))
            .unwrap();
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "second", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::SEND, key, recording(&log, "send", Flow::Proceed))
            .unwrap();

        pipeline.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn error_aborts_remaining_pipeline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let key = FeatureKey("test");
        pipeline
            .intercept(
                Phase::BEFORE,
                key,
                Arc::new(|_ctx| {
                    Box::pin(async {
                        Err(ClientError::Configuration("broken interceptor".into()))
                    })
                }),
            )
            .unwrap();
        pipeline
            .intercept(Phase::SEND, key, recording(&log, "send", Flow::Proceed))
            .unwrap();

        let err = pipeline.execute(&mut context()).await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_scope_stops_execution_with_cause() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let key = FeatureKey("test");
        pipeline
            .intercept(Phase::SEND, key, recording(&log, "send", Flow::Proceed))
            .unwrap();

        let mut ctx = context();
        ctx.scope.cancel(CancelCause::UserCancelled);
        let err = pipeline.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err, ClientError::Cancelled(CancelCause::UserCancelled));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_phase_runs_at_its_position() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let key = FeatureKey("test");
        let render = Phase("Render");
        pipeline.define_phase(render, Some(Phase::BEFORE)).unwrap();
        pipeline
            .intercept(render, key, recording(&log, "render", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "before", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::STATE, key, recording(&log, "state", Flow::Proceed))
            .unwrap();

        pipeline.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["before", "render", "state"]);
    }

    #[test]
    fn duplicate_phase_definition_is_rejected() {
        let mut pipeline = Pipeline::new();
        let err = pipeline.define_phase(Phase::SEND, None).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn reinstall_keeps_the_features_position_in_the_phase() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let first = FeatureKey("first");
        let second = FeatureKey("second");
        pipeline
            .intercept(Phase::BEFORE, first, recording(&log, "stale", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::BEFORE, second, recording(&log, "second", Flow::Proceed))
            .unwrap();

        pipeline.vacate_owned_by(first);
        pipeline
            .intercept(Phase::BEFORE, first, recording(&log, "fresh", Flow::Proceed))
            .unwrap();
        pipeline.purge_vacated(first);

        pipeline.execute(&mut context()).await.unwrap();
        // The replacement runs where the original registered, not at the end.
        assert_eq!(*log.lock().unwrap(), vec!["fresh", "second"]);
    }

    #[tokio::test]
    async fn unfilled_vacated_slots_are_purged() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let key = FeatureKey("shrinking");
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "before", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::SEND, key, recording(&log, "send", Flow::Proceed))
            .unwrap();

        // The replacement registers in Before only; the Send slot goes away.
        pipeline.vacate_owned_by(key);
        pipeline
            .intercept(Phase::BEFORE, key, recording(&log, "replacement", Flow::Proceed))
            .unwrap();
        pipeline.purge_vacated(key);

        pipeline.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["replacement"]);
    }

    #[tokio::test]
    async fn remove_owned_by_drops_only_that_features_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let keep = FeatureKey("keep");
        let drop_key = FeatureKey("drop");
        pipeline
            .intercept(Phase::BEFORE, keep, recording(&log, "keep", Flow::Proceed))
            .unwrap();
        pipeline
            .intercept(Phase::BEFORE, drop_key, recording(&log, "drop", Flow::Proceed))
            .unwrap();

        pipeline.remove_owned_by(drop_key);
        pipeline.execute(&mut context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["keep"]);
    }
}
