//! Core types shared by the planner and the scheduler.

use std::fmt;
use thiserror::Error;

/// Consecutive infeasible draws tolerated before a shuffled run is declared livelocked.
pub const DEFAULT_MAX_RETRIES: u64 = 100_000;

/// Order in which the scheduler selects action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMode {
    /// Random order: every step draws one of the active action types with equal
    /// probability, independent of how much quota each one has left.
    ///
    /// An infeasible draw is discarded and redrawn, since the pool may become
    /// able to satisfy it after other picks change its state.
    #[default]
    Shuffled,

    /// Configuration order: the first active action type is always picked until
    /// its quota is exhausted.
    ///
    /// An infeasible pick aborts the run with [`ScheduleError::OrderInfeasible`].
    Fixed,
}

impl OrderMode {
    /// Returns true for random selection.
    pub fn is_shuffled(&self) -> bool {
        matches!(self, OrderMode::Shuffled)
    }

    /// Returns true for configuration-order selection.
    pub fn is_fixed(&self) -> bool {
        matches!(self, OrderMode::Fixed)
    }
}

impl fmt::Display for OrderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderMode::Shuffled => write!(f, "shuffled"),
            OrderMode::Fixed => write!(f, "fixed"),
        }
    }
}

/// Bound on consecutive infeasible draws in shuffled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fail with [`ScheduleError::Livelock`] after this many consecutive
    /// infeasible draws. The counter resets on every successful pick.
    Bounded(u64),
    /// Redraw forever. A permanently infeasible action type never terminates.
    Unbounded,
}

impl RetryPolicy {
    /// Maps a configured limit to a policy, `0` meaning unbounded.
    pub fn from_limit(limit: u64) -> Self {
        if limit == 0 {
            RetryPolicy::Unbounded
        } else {
            RetryPolicy::Bounded(limit)
        }
    }

    pub(crate) fn exhausted(&self, consecutive: u64) -> bool {
        match self {
            RetryPolicy::Bounded(limit) => consecutive >= *limit,
            RetryPolicy::Unbounded => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Bounded(DEFAULT_MAX_RETRIES)
    }
}

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Some action type still has quota left.
    Running,
    /// Every quota is exhausted.
    Done,
    /// The run failed and will not produce further picks.
    Aborted,
}

impl RunState {
    /// Returns true for `Done` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// A resource pool that decides whether an action can be issued right now.
pub trait FeasibilityOracle {
    /// Request parameters and signing material handed out for one pick.
    type Request;

    /// Reports whether the pool can currently satisfy `action`.
    ///
    /// Must not change pool state, and must agree with a following `request`.
    fn satisfies(&self, action: &str) -> bool;

    /// Issues the request for `action`, possibly consuming pool resources.
    ///
    /// Only called immediately after `satisfies(action)` returned true.
    fn request(&mut self, action: &str) -> Self::Request;
}

/// Destination for serialized transactions.
pub trait TransactionSink {
    type Error;

    /// Persists one serialized transaction.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Flushes the sink. Called exactly once, after the run reaches a terminal
    /// state; no writes follow it.
    fn close(&mut self) -> Result<(), Self::Error>;
}

/// Errors raised while planning quotas.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error(
        "invalid weight {weight} for action `{action}`: weights must be finite and non-negative"
    )]
    InvalidWeight { action: String, weight: f64 },

    #[error("action weights sum to a non-finite value")]
    WeightSumOverflow,

    #[error("action `{0}` appears more than once")]
    DuplicateAction(String),
}

/// Errors that end a scheduling run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("`{action}` action is not satisfied in the configured order, try to adjust it")]
    OrderInfeasible { action: String },

    #[error(
        "no feasible action after {retries} consecutive draws, still active: {}",
        .active.join(", ")
    )]
    Livelock { retries: u64, active: Vec<String> },
}

impl ScheduleError {
    /// The action type that could not be satisfied, for fixed-order aborts.
    pub fn action(&self) -> Option<&str> {
        match self {
            ScheduleError::OrderInfeasible { action } => Some(action),
            ScheduleError::Livelock { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_from_limit() {
        assert_eq!(RetryPolicy::from_limit(0), RetryPolicy::Unbounded);
        assert_eq!(RetryPolicy::from_limit(5), RetryPolicy::Bounded(5));
        assert_eq!(RetryPolicy::default(), RetryPolicy::Bounded(DEFAULT_MAX_RETRIES));
    }

    #[test]
    fn test_retry_policy_exhaustion() {
        let bounded = RetryPolicy::Bounded(3);
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
        assert!(!RetryPolicy::Unbounded.exhausted(u64::MAX));
    }

    #[test]
    fn test_error_messages() {
        let err = ScheduleError::OrderInfeasible { action: "issuetoken".into() };
        assert_eq!(err.action(), Some("issuetoken"));
        assert!(err.to_string().contains("`issuetoken`"));

        let err = ScheduleError::Livelock {
            retries: 10,
            active: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.action(), None);
        assert!(err.to_string().ends_with("still active: a, b"));
    }
}
