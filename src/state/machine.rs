use std::sync::Arc;
use tracing::{debug, error, info};

use super::errors::{ConfigError, TickError};
use super::graph::{State, TransitionGraph};
use super::pacing::NoPacing;
use super::traits::{Pacer, ProgressStore};
use super::types::{Outcome, ProgressRecord};
use crate::observability::reconcile_metrics;

/// Level-triggered state machine. Built fresh for every invocation from a
/// workflow definition plus the persisted [`ProgressRecord`], ticked once,
/// then dropped. Nothing survives in memory between ticks.
///
/// Callers must serialise invocations for the same managed resource; the
/// machine does no locking of its own.
pub struct Machine<C> {
    graph: TransitionGraph<C>,
    current: State<C>,
    progress: Arc<dyn ProgressStore>,
    pacer: Arc<dyn Pacer>,
}

impl<C: Send + Sync + 'static> Machine<C> {
    /// Locates the state to resume at and builds the machine around it.
    ///
    /// An empty `next_state` resumes at `initial`. A name that is not
    /// registered fails instead of falling back to `initial`, so a stale or
    /// corrupt record can never silently restart the pipeline somewhere else.
    pub fn resume(
        graph: TransitionGraph<C>,
        record: &ProgressRecord,
        initial: &str,
        progress: Arc<dyn ProgressStore>,
    ) -> Result<Self, ConfigError> {
        if !graph.contains(initial) {
            return Err(ConfigError::UnregisteredState {
                name: initial.to_string(),
            });
        }

        let starting = record.resume_point().unwrap_or(initial);
        let current = graph
            .state(starting)
            .cloned()
            .ok_or_else(|| ConfigError::UnregisteredState {
                name: starting.to_string(),
            })?;

        debug!(state = %current.name(), "Resuming state machine");

        Ok(Self {
            graph,
            current,
            progress,
            pacer: Arc::new(NoPacing),
        })
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// Points the machine at another registered state.
    pub fn set_state(&mut self, name: &str) -> Result<(), ConfigError> {
        let state = self
            .graph
            .state(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnregisteredState {
                name: name.to_string(),
            })?;
        self.current = state;
        Ok(())
    }

    pub fn current_state(&self) -> &str {
        self.current.name()
    }

    pub fn graph(&self) -> &TransitionGraph<C> {
        &self.graph
    }

    /// Runs the current state once and, if it completed, persists the next
    /// resume point.
    ///
    /// At most one transition happens per call. A failing action or
    /// completion check leaves the persisted resume point untouched, so the
    /// next call re-runs the same action. A persistence failure is reported
    /// after the action's side effects already happened; nothing is rolled
    /// back.
    pub async fn tick(&mut self, ctx: &mut C) -> Result<Outcome, TickError> {
        let metrics = reconcile_metrics();
        metrics.record_tick();

        let state = self.current.clone();
        let name = state.name();
        info!(state = %name, "Reconciling state");

        let outcome = match state.action().run(ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(state = %name, error = %e, "Error reconciling state");
                metrics.record_action_error();
                return Err(TickError::Action {
                    state: name.to_string(),
                    source: e,
                });
            }
        };

        let complete = match state.completion() {
            None => true,
            Some(check) => match check.is_complete(ctx).await {
                Ok(complete) => complete,
                Err(e) => {
                    debug!(state = %name, error = %e, "Error determining if state is complete");
                    metrics.record_completion_check_error();
                    return Err(TickError::CompletionCheck {
                        state: name.to_string(),
                        source: e,
                    });
                }
            },
        };

        if !complete {
            debug!(state = %name, "State is not yet complete");
            metrics.record_incomplete();
            return Ok(outcome);
        }

        debug!(state = %name, "Completed state");

        let next_state = self
            .graph
            .resolve_next(name, ctx)
            .map(|transition| transition.to().to_string())
            .unwrap_or_default();

        if next_state.is_empty() {
            debug!(state = %name, "No transition available, clearing resume point");
        } else {
            debug!(from = %name, to = %next_state, "Preparing transition");
        }

        self.pacer.before_persist().await;
        if let Err(e) = self.progress.save_next_state(&next_state).await {
            error!(state = %name, next_state = %next_state, error = %e, "Error saving next state");
            metrics.record_persistence_error();
            return Err(TickError::Persistence {
                state: name.to_string(),
                next_state,
                source: e,
            });
        }
        self.pacer.after_persist().await;

        metrics.record_transition();
        Ok(outcome)
    }
}
