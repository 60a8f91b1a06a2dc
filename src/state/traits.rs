// Seams between the engine and the outside world - actions, completion checks,
// progress persistence and pacing are all injected so the engine stays testable.

use anyhow::Result;
use async_trait::async_trait;

use super::types::Outcome;

/// The unit of work performed by a state.
///
/// Actions are re-executed from scratch on every retry, so they must be
/// idempotent with respect to the external world.
#[async_trait]
pub trait Action<C>: Send + Sync {
    async fn run(&self, ctx: &mut C) -> Result<Outcome>;
}

/// Decides whether a state's work has converged after its action ran.
#[async_trait]
pub trait CompletionCheck<C>: Send + Sync {
    async fn is_complete(&self, ctx: &C) -> Result<bool>;
}

/// Persists the name of the state the next tick should resume at.
///
/// An empty name is the "start from the initial state" sentinel. Saving the
/// same name twice must be harmless.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save_next_state(&self, state_name: &str) -> Result<()>;
}

/// Pacing applied around the externally visible persistence write.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn before_persist(&self);
    async fn after_persist(&self);
}

/// Adapts a synchronous closure into an [`Action`].
pub struct FnAction<F>(pub F);

#[async_trait]
impl<C, F> Action<C> for FnAction<F>
where
    C: Send + Sync + 'static,
    F: Fn(&mut C) -> Result<Outcome> + Send + Sync + 'static,
{
    async fn run(&self, ctx: &mut C) -> Result<Outcome> {
        (self.0)(ctx)
    }
}

/// Adapts a synchronous closure into a [`CompletionCheck`].
pub struct FnCheck<F>(pub F);

#[async_trait]
impl<C, F> CompletionCheck<C> for FnCheck<F>
where
    C: Send + Sync + 'static,
    F: Fn(&C) -> Result<bool> + Send + Sync + 'static,
{
    async fn is_complete(&self, ctx: &C) -> Result<bool> {
        (self.0)(ctx)
    }
}
