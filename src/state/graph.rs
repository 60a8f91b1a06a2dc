use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::errors::ConfigError;
use super::traits::{Action, CompletionCheck, FnAction};
use super::types::Outcome;

/// Predicate selecting among outgoing transitions. Evaluated against the
/// context snapshot only after the source state completed.
pub type Guard<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// Guard that always allows the transition.
pub fn always<C>() -> Guard<C> {
    Arc::new(|_: &C| true)
}

/// Guard with a value fixed at definition time.
pub fn from_bool<C>(value: bool) -> Guard<C> {
    Arc::new(move |_: &C| value)
}

/// Wraps a plain function or closure as a [`Guard`].
pub fn guard<C, F>(predicate: F) -> Guard<C>
where
    F: Fn(&C) -> bool + Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// A named unit of work. Identity is by name.
pub struct State<C> {
    name: String,
    action: Arc<dyn Action<C>>,
    completion: Option<Arc<dyn CompletionCheck<C>>>,
}

impl<C: Send + Sync + 'static> State<C> {
    pub fn new(name: impl Into<String>, action: impl Action<C> + 'static) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
            completion: None,
        }
    }

    /// State whose action is a synchronous closure.
    pub fn from_fn<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut C) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        Self::new(name, FnAction(action))
    }

    /// Without a completion check a state is complete as soon as its action
    /// returns without error.
    pub fn with_completion(mut self, check: impl CompletionCheck<C> + 'static) -> Self {
        self.completion = Some(Arc::new(check));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_completion_check(&self) -> bool {
        self.completion.is_some()
    }

    pub(crate) fn action(&self) -> &Arc<dyn Action<C>> {
        &self.action
    }

    pub(crate) fn completion(&self) -> Option<&Arc<dyn CompletionCheck<C>>> {
        self.completion.as_ref()
    }

    // Two registrations describe the same node only if they share the
    // action and completion check instances (i.e. one is a clone of the other).
    fn same_definition(&self, other: &State<C>) -> bool {
        let same_action = Arc::as_ptr(&self.action).cast::<()>()
            == Arc::as_ptr(&other.action).cast::<()>();
        let same_check = match (&self.completion, &other.completion) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>(),
            _ => false,
        };
        same_action && same_check
    }
}

impl<C> Clone for State<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: Arc::clone(&self.action),
            completion: self.completion.clone(),
        }
    }
}

impl<C> fmt::Debug for State<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("has_completion_check", &self.completion.is_some())
            .finish()
    }
}

/// Directed, guarded edge between two registered states.
pub struct Transition<C> {
    from: String,
    to: String,
    guard: Guard<C>,
}

impl<C> Transition<C> {
    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn is_allowed(&self, ctx: &C) -> bool {
        (self.guard)(ctx)
    }
}

impl<C> fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Registry of states plus, per source state, its outgoing transitions in
/// registration order. Order matters: the first allowed transition wins.
///
/// Cycles are allowed. Termination is the guards' business, not the graph's.
pub struct TransitionGraph<C> {
    states: HashMap<String, State<C>>,
    transitions: HashMap<String, Vec<Transition<C>>>,
}

impl<C: Send + Sync + 'static> Default for TransitionGraph<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> TransitionGraph<C> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            transitions: HashMap::new(),
        }
    }

    /// Registers a state without adding any edge. Idempotent for clones of
    /// the same state; a different definition under a taken name is an error.
    pub fn register(&mut self, state: &State<C>) -> Result<(), ConfigError> {
        self.check_registrable(state)?;
        self.states
            .entry(state.name.clone())
            .or_insert_with(|| state.clone());
        Ok(())
    }

    /// Registers both endpoints and appends the edge to `from`'s list.
    /// Edges are never deduplicated or reordered.
    pub fn add_transition(
        &mut self,
        from: &State<C>,
        to: &State<C>,
        guard: Guard<C>,
    ) -> Result<(), ConfigError> {
        // Validate both endpoints before touching the registry so a failed
        // call leaves the graph unchanged.
        self.check_registrable(from)?;
        self.check_registrable(to)?;
        self.register(from)?;
        self.register(to)?;

        self.transitions
            .entry(from.name.clone())
            .or_default()
            .push(Transition {
                from: from.name.clone(),
                to: to.name.clone(),
                guard,
            });
        Ok(())
    }

    fn check_registrable(&self, state: &State<C>) -> Result<(), ConfigError> {
        if state.name.is_empty() {
            return Err(ConfigError::EmptyStateName);
        }
        match self.states.get(&state.name) {
            Some(existing) if !existing.same_definition(state) => {
                Err(ConfigError::ConflictingState {
                    name: state.name.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn state(&self, name: &str) -> Option<&State<C>> {
        self.states.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn transitions_from(&self, name: &str) -> &[Transition<C>] {
        self.transitions
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// First outgoing transition of `from` whose guard allows it, if any.
    pub fn resolve_next(&self, from: &str, ctx: &C) -> Option<&Transition<C>> {
        self.transitions_from(from)
            .iter()
            .find(|transition| transition.is_allowed(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> State<()> {
        State::from_fn(name, |_: &mut ()| Ok(Outcome::Requeue))
    }

    #[test]
    fn test_add_transition_registers_both_endpoints() {
        let mut graph = TransitionGraph::new();
        let a = noop("A");
        let b = noop("B");
        graph.add_transition(&a, &b, always()).unwrap();

        assert!(graph.contains("A"));
        assert!(graph.contains("B"));
        assert_eq!(graph.transitions_from("A").len(), 1);
        assert!(graph.transitions_from("B").is_empty());
    }

    #[test]
    fn test_same_state_registered_repeatedly_is_idempotent() {
        let mut graph = TransitionGraph::new();
        let a = noop("A");
        let b = noop("B");
        let c = noop("C");
        graph.add_transition(&a, &b, always()).unwrap();
        graph.add_transition(&a, &c, always()).unwrap();
        graph.add_transition(&b, &a, always()).unwrap();

        assert_eq!(graph.state_names().count(), 3);
        let targets: Vec<_> = graph.transitions_from("A").iter().map(|t| t.to()).collect();
        assert_eq!(targets, vec!["B", "C"]);
    }

    #[test]
    fn test_conflicting_definitions_are_rejected() {
        let mut graph = TransitionGraph::new();
        let a = noop("A");
        let b = noop("B");
        let impostor = noop("B");
        graph.add_transition(&a, &b, always()).unwrap();

        let err = graph.add_transition(&a, &impostor, always()).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingState { ref name } if name == "B"));
        // Rejected call must not leave a dangling edge behind
        assert_eq!(graph.transitions_from("A").len(), 1);
    }

    #[test]
    fn test_completion_check_is_part_of_identity() {
        let mut graph = TransitionGraph::new();
        let a = noop("A");
        let checked = a
            .clone()
            .with_completion(crate::state::traits::FnCheck(|_: &()| Ok(true)));

        graph.register(&a).unwrap();
        assert!(graph.register(&checked).is_err());
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut graph: TransitionGraph<()> = TransitionGraph::new();
        assert!(matches!(
            graph.register(&noop("")),
            Err(ConfigError::EmptyStateName)
        ));
    }

    #[test]
    fn test_resolve_next_is_first_match() {
        let mut graph = TransitionGraph::new();
        let a = noop("A");
        graph.add_transition(&a, &noop("Never"), from_bool(false)).unwrap();
        graph.add_transition(&a, &noop("First"), always()).unwrap();
        graph.add_transition(&a, &noop("Second"), always()).unwrap();

        assert_eq!(graph.resolve_next("A", &()).map(|t| t.to()), Some("First"));
        assert!(graph.resolve_next("First", &()).is_none());
        assert!(graph.resolve_next("Unknown", &()).is_none());
    }
}
