//! # Cooperative State Machine
//!
//! A pass-oriented state machine over a mutable context `C`. Each call to
//! [`StateMachine::run`] starts at the initial state and walks edges until a
//! terminal state completes the pass or the time budget forces a yield.
//!
//! ## States
//!
//! ```text
//! Action ─┬─ success ──▶ …      Condition ─┬─ true ──▶ …
//!         ├─ failure ──▶ …                 └─ false ─▶ …
//!         └─ max time ─▶ … (or yield)
//!
//! Multi ──┬─ all sub-states visited ──▶ next
//!         └─ budget exhausted ────────▶ max time (or yield)
//!
//! Frequency ─┬─ due ───▶ …            End (pass completed)
//!            └─ other ─▶ …
//! ```
//!
//! ## Design
//!
//! States live in an arena owned by the machine and are referenced by
//! [`StateId`]. The builder only accepts edges to states created earlier,
//! so the graph is acyclic and every pass terminates. Wiring is frozen by
//! [`StateMachineBuilder::build`].
//!
//! A state failure is an ordinary edge. Only the context's error type `E`
//! aborts a pass, and it propagates out of `run` untouched so the caller can
//! roll back its transaction and retry the whole pass later.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::Budget;

// ─── Outcomes ────────────────────────────────────────────────────────

/// Result of one unit of work in an action state or sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The work completed.
    Success,
    /// The work did not complete; follow the failure edge.
    Failure,
    /// The work stopped because the time budget ran out.
    MaxTimeExceeded,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::MaxTimeExceeded => "MAX_TIME_EXCEEDED",
        };
        f.write_str(s)
    }
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalSignal {
    /// A terminal state was reached.
    Completed,
    /// The budget ran out in a state with no max-time edge. The next pass
    /// starts again from the initial state.
    Yielded {
        /// Name of the state that gave up control.
        state: String,
    },
}

impl TerminalSignal {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Edge taken out of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    Success,
    Failure,
    MaxTime,
    True,
    False,
    Next,
    Due,
    NotDue,
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::MaxTime => "MAX_TIME",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Next => "NEXT",
            Self::Due => "DUE",
            Self::NotDue => "NOT_DUE",
        };
        f.write_str(s)
    }
}

/// Record of one transition taken during the last pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State the transition left.
    pub from: String,
    /// State the transition entered, `None` when the pass yielded.
    pub to: Option<String>,
    /// Edge that was followed.
    pub edge: Edge,
    /// When the transition occurred.
    pub at: DateTime<Utc>,
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised while wiring a state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An edge points at a state that was not created before its source.
    #[error("state {from} has an edge to unknown or later state #{to}")]
    InvalidEdge {
        /// Source state name.
        from: String,
        /// Target arena index.
        to: usize,
    },

    /// The initial state does not exist.
    #[error("initial state #{0} does not exist")]
    UnknownInitial(usize),
}

// ─── Sub-states ──────────────────────────────────────────────────────

/// A unit of work contributed to a composite state.
///
/// Sub-states keep their own state across passes; the composite only
/// decides the order in which they run.
pub trait SubState<C, E>: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Higher priorities run first within a composite.
    fn priority(&self) -> i32;

    /// Run one bounded unit of work.
    fn visit(&mut self, context: &mut C, budget: &Budget) -> Result<StepOutcome, E>;
}

/// Order sub-states by descending priority. Equal priorities keep their
/// registration order.
pub fn sort_by_priority<C, E>(sub_states: &mut [Box<dyn SubState<C, E>>]) {
    sub_states.sort_by(|a, b| b.priority().cmp(&a.priority()));
}

// ─── Arena ───────────────────────────────────────────────────────────

/// Handle to a state inside one machine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(usize);

/// Work of an action state.
pub type ActionFn<C, E> = Box<dyn FnMut(&mut C, &Budget) -> Result<StepOutcome, E> + Send>;

/// Predicate of a condition state.
pub type ConditionFn<C, E> = Box<dyn Fn(&C) -> Result<bool, E> + Send>;

enum Node<C, E> {
    Action {
        work: ActionFn<C, E>,
        on_success: StateId,
        on_failure: StateId,
        on_max_time: Option<StateId>,
    },
    Condition {
        predicate: ConditionFn<C, E>,
        when_true: StateId,
        when_false: StateId,
    },
    Multi {
        sub_states: Vec<Box<dyn SubState<C, E>>>,
        next: StateId,
        on_max_time: Option<StateId>,
    },
    Frequency {
        every: Duration,
        last_due: Option<DateTime<Utc>>,
        when_due: StateId,
        otherwise: StateId,
    },
    End,
}

impl<C, E> Node<C, E> {
    fn edges(&self) -> Vec<StateId> {
        match self {
            Self::Action {
                on_success,
                on_failure,
                on_max_time,
                ..
            } => {
                let mut edges = vec![*on_success, *on_failure];
                edges.extend(on_max_time);
                edges
            }
            Self::Condition {
                when_true,
                when_false,
                ..
            } => vec![*when_true, *when_false],
            Self::Multi {
                next, on_max_time, ..
            } => {
                let mut edges = vec![*next];
                edges.extend(on_max_time);
                edges
            }
            Self::Frequency {
                when_due,
                otherwise,
                ..
            } => vec![*when_due, *otherwise],
            Self::End => Vec::new(),
        }
    }
}

struct Step<C, E> {
    name: String,
    node: Node<C, E>,
}

// ─── Builder ─────────────────────────────────────────────────────────

/// Wires states from the terminal state backwards.
///
/// ```
/// use pulse_state::{StateMachineBuilder, StepOutcome};
///
/// let mut b = StateMachineBuilder::<u32, ()>::new();
/// let end = b.end("End");
/// let count = b.action("Count", |c: &mut u32, _| { *c += 1; Ok(StepOutcome::Success) }, end, end, None);
/// let machine = b.build(count).unwrap();
/// assert_eq!(machine.len(), 2);
/// ```
pub struct StateMachineBuilder<C, E> {
    steps: Vec<Step<C, E>>,
}

impl<C, E> Default for StateMachineBuilder<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E> StateMachineBuilder<C, E> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn push(&mut self, name: impl Into<String>, node: Node<C, E>) -> StateId {
        self.steps.push(Step {
            name: name.into(),
            node,
        });
        StateId(self.steps.len() - 1)
    }

    pub fn end(&mut self, name: impl Into<String>) -> StateId {
        self.push(name, Node::End)
    }

    pub fn action<F>(
        &mut self,
        name: impl Into<String>,
        work: F,
        on_success: StateId,
        on_failure: StateId,
        on_max_time: Option<StateId>,
    ) -> StateId
    where
        F: FnMut(&mut C, &Budget) -> Result<StepOutcome, E> + Send + 'static,
    {
        self.push(
            name,
            Node::Action {
                work: Box::new(work),
                on_success,
                on_failure,
                on_max_time,
            },
        )
    }

    pub fn condition<F>(
        &mut self,
        name: impl Into<String>,
        predicate: F,
        when_true: StateId,
        when_false: StateId,
    ) -> StateId
    where
        F: Fn(&C) -> Result<bool, E> + Send + 'static,
    {
        self.push(
            name,
            Node::Condition {
                predicate: Box::new(predicate),
                when_true,
                when_false,
            },
        )
    }

    /// Composite state. Sub-states are ordered by descending priority once,
    /// here.
    pub fn multi(
        &mut self,
        name: impl Into<String>,
        mut sub_states: Vec<Box<dyn SubState<C, E>>>,
        next: StateId,
        on_max_time: Option<StateId>,
    ) -> StateId {
        sort_by_priority(&mut sub_states);
        self.push(
            name,
            Node::Multi {
                sub_states,
                next,
                on_max_time,
            },
        )
    }

    /// Branch to `when_due` at most once every `every`, otherwise to
    /// `otherwise`. The first visit is always due.
    pub fn frequency(
        &mut self,
        name: impl Into<String>,
        every: Duration,
        when_due: StateId,
        otherwise: StateId,
    ) -> StateId {
        self.push(
            name,
            Node::Frequency {
                every,
                last_due: None,
                when_due,
                otherwise,
            },
        )
    }

    /// Freeze the wiring. Every edge must point at a state created before
    /// its source.
    pub fn build(self, initial: StateId) -> Result<StateMachine<C, E>, StateError> {
        if initial.0 >= self.steps.len() {
            return Err(StateError::UnknownInitial(initial.0));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(bad) = step.node.edges().into_iter().find(|e| e.0 >= index) {
                return Err(StateError::InvalidEdge {
                    from: step.name.clone(),
                    to: bad.0,
                });
            }
        }
        Ok(StateMachine {
            steps: self.steps,
            initial,
            transitions: Vec::new(),
        })
    }
}

// ─── Machine ─────────────────────────────────────────────────────────

/// A frozen state graph, re-entered once per pass.
pub struct StateMachine<C, E> {
    steps: Vec<Step<C, E>>,
    initial: StateId,
    transitions: Vec<TransitionRecord>,
}

impl<C, E> std::fmt::Debug for StateMachine<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.state_names())
            .field("initial", &self.initial)
            .finish()
    }
}

impl<C, E> StateMachine<C, E> {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn state_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Transitions taken during the most recent pass.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Run one pass from the initial state.
    pub fn run(&mut self, context: &mut C, budget: &Budget) -> Result<TerminalSignal, E> {
        self.transitions.clear();
        let mut current = self.initial;
        loop {
            // Every id was checked against the arena in `build`.
            let Some(step) = self.steps.get_mut(current.0) else {
                return Ok(TerminalSignal::Completed);
            };
            let (target, edge) = match &mut step.node {
                Node::End => return Ok(TerminalSignal::Completed),
                Node::Action {
                    work,
                    on_success,
                    on_failure,
                    on_max_time,
                } => match work(context, budget)? {
                    StepOutcome::MaxTimeExceeded => (*on_max_time, Edge::MaxTime),
                    _ if budget.is_exceeded() => (*on_max_time, Edge::MaxTime),
                    StepOutcome::Success => (Some(*on_success), Edge::Success),
                    StepOutcome::Failure => (Some(*on_failure), Edge::Failure),
                },
                Node::Condition {
                    predicate,
                    when_true,
                    when_false,
                } => {
                    if predicate(context)? {
                        (Some(*when_true), Edge::True)
                    } else {
                        (Some(*when_false), Edge::False)
                    }
                }
                Node::Multi {
                    sub_states,
                    next,
                    on_max_time,
                } => {
                    let mut exceeded = false;
                    for sub in sub_states.iter_mut() {
                        if budget.is_exceeded() {
                            exceeded = true;
                            break;
                        }
                        match sub.visit(context, budget)? {
                            StepOutcome::Success => {}
                            StepOutcome::Failure => {
                                tracing::warn!(
                                    state = %step.name,
                                    sub_state = sub.name(),
                                    "sub-state failed, continuing with the next one"
                                );
                            }
                            StepOutcome::MaxTimeExceeded => {
                                exceeded = true;
                                break;
                            }
                        }
                    }
                    if exceeded {
                        (*on_max_time, Edge::MaxTime)
                    } else {
                        (Some(*next), Edge::Next)
                    }
                }
                Node::Frequency {
                    every,
                    last_due,
                    when_due,
                    otherwise,
                } => {
                    let now = budget.now();
                    let due = last_due.map_or(true, |last| now - last >= *every);
                    if due {
                        *last_due = Some(now);
                        (Some(*when_due), Edge::Due)
                    } else {
                        (Some(*otherwise), Edge::NotDue)
                    }
                }
            };

            let from = step.name.clone();
            let to = target.and_then(|t| self.steps.get(t.0)).map(|s| s.name.clone());
            tracing::debug!(state = %from, edge = %edge, to = ?to, "transition");
            self.transitions.push(TransitionRecord {
                from: from.clone(),
                to,
                edge,
                at: budget.now(),
            });
            match target {
                Some(next) => current = next,
                None => return Ok(TerminalSignal::Yielded { state: from }),
            }
        }
    }
}
