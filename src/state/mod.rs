// Generic reconciliation state machine
//
// States and guarded transitions form a graph; a machine is rebuilt from the
// persisted progress record on every invocation and advances at most one
// transition per tick.

pub mod errors;
pub mod graph;
pub mod machine;
pub mod pacing;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod mocks;


pub use errors::{ConfigError, TickError};
pub use graph::{always, from_bool, guard, Guard, State, Transition, TransitionGraph};
pub use machine::Machine;
pub use pacing::{FixedPacing, NoPacing, RateLimitedPacing};
pub use traits::{Action, CompletionCheck, FnAction, FnCheck, Pacer, ProgressStore};
pub use types::{Outcome, ProgressRecord};
