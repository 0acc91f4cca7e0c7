//! Quota-driven action scheduling for synthetic transaction workloads.
//!
//! This crate turns a set of relative action weights and a transaction budget
//! into a stream of action picks. Each action type receives an absolute quota,
//! and the scheduler draws action types until every quota is exhausted, asking
//! an external resource pool whether each candidate can currently be satisfied.
//!
//! # Core Components
//!
//! - **QuotaPlanner** ([`plan`]): converts weights into per-action quotas
//! - **ActionScheduler**: the pick loop, in shuffled or fixed order
//! - **SharedScheduler**: a lock-protected scheduler for concurrent pickers
//! - **FeasibilityOracle** / **TransactionSink**: contracts for the pool and
//!   the output writer, implemented by callers
//!
//! # Algorithm Overview
//!
//! 1. Zero weights are dropped; the rest are scaled to `total` and rounded
//!    half-to-even
//! 2. Every action with a positive quota starts in the active set
//! 3. Each step selects an active action (uniformly at random, or the first in
//!    configuration order) and checks it against the oracle
//! 4. Infeasible picks are retried in shuffled order and abort fixed order
//! 5. A feasible pick advances progress; the action leaves the active set when
//!    its quota is reached
//!
//! # Example
//!
//! ```rust
//! use quota_scheduler::{
//!     plan, ActionScheduler, ActionWeights, FeasibilityOracle, OrderMode, ScheduleError,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! struct AlwaysFeasible;
//!
//! impl FeasibilityOracle for AlwaysFeasible {
//!     type Request = ();
//!     fn satisfies(&self, _action: &str) -> bool { true }
//!     fn request(&mut self, _action: &str) {}
//! }
//!
//! let weights = ActionWeights::from_pairs([("transfer", 3.0), ("issuetoken", 1.0)]);
//! let plan = plan(&weights, 8).unwrap();
//!
//! let mut scheduler = ActionScheduler::new(plan, OrderMode::Shuffled, StdRng::seed_from_u64(7));
//! let summary = scheduler
//!     .run(&mut AlwaysFeasible, |_| Ok::<(), ScheduleError>(()), |_| {})
//!     .unwrap();
//!
//! assert_eq!(summary.emitted, 8);
//! assert_eq!(summary.count("transfer"), 6);
//! ```

pub mod planner;
pub mod scheduler;
pub mod shared;
pub mod types;

pub use planner::{plan, ActionWeights, QuotaPlan, QuotaTable};
pub use scheduler::{ActionScheduler, Pick, RunSummary, ScheduleState};
pub use shared::SharedScheduler;
pub use types::{
    FeasibilityOracle, OrderMode, PlanError, RetryPolicy, RunState, ScheduleError,
    TransactionSink, DEFAULT_MAX_RETRIES,
};
