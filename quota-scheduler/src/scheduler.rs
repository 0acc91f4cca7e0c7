//! The quota-driven pick loop.
//!
//! The scheduler owns all run bookkeeping ([`ScheduleState`]) and performs no
//! I/O itself: each pick hands the oracle's request back to the caller, which
//! builds, signs and persists the transaction.

use rand::Rng;

use crate::planner::{QuotaPlan, QuotaTable};
use crate::types::{FeasibilityOracle, OrderMode, RetryPolicy, RunState, ScheduleError};

/// Progress bookkeeping for one run.
///
/// Invariants: `0 <= progress <= quota` for every planned action, and an
/// action is active exactly while its progress is below its quota.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    quotas: QuotaTable,
    /// Emitted count per quota entry, aligned with `quotas`.
    progress: Vec<u64>,
    /// Indices into `quotas` still below target, in configuration order.
    active: Vec<usize>,
}

impl ScheduleState {
    /// Starts a run from a plan: every progress counter at zero and every
    /// action with a positive quota active.
    pub fn new(plan: QuotaPlan) -> Self {
        let quotas = plan.quotas;
        let active = quotas
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, (_, quota))| *quota > 0)
            .map(|(idx, _)| idx)
            .collect();
        let progress = vec![0; quotas.len()];

        Self {
            quotas,
            progress,
            active,
        }
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    /// Current count for `action`, or `None` if it was not planned.
    pub fn progress(&self, action: &str) -> Option<u64> {
        self.quotas
            .entries()
            .iter()
            .position(|(a, _)| a == action)
            .map(|idx| self.progress[idx])
    }

    /// Active action types, in configuration order.
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.active
            .iter()
            .map(|&idx| self.quotas.entries()[idx].0.as_str())
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.active.is_empty()
    }

    /// Picks completed so far.
    pub fn completed(&self) -> u64 {
        self.progress.iter().sum()
    }

    /// Picks still owed before every quota is met.
    pub fn remaining(&self) -> u64 {
        self.quotas.total() - self.completed()
    }

    fn action_at(&self, pos: usize) -> &str {
        &self.quotas.entries()[self.active[pos]].0
    }

    /// Records one pick of the active action at `pos`. Returns true if that
    /// pick exhausted the action's quota and removed it from the active set.
    fn advance(&mut self, pos: usize) -> bool {
        let idx = self.active[pos];
        self.progress[idx] += 1;
        if self.progress[idx] == self.quotas.entries()[idx].1 {
            // Vec::remove keeps the remaining actions in configuration order.
            self.active.remove(pos);
            true
        } else {
            false
        }
    }

    fn counts(&self) -> Vec<(String, u64)> {
        self.quotas
            .iter()
            .zip(&self.progress)
            .map(|((action, _), count)| (action.to_string(), *count))
            .collect()
    }
}

/// One scheduled action together with the pool's request for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick<R> {
    pub action: String,
    pub request: R,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Total picks handed to the emitter.
    pub emitted: u64,
    /// Picks per planned action, in configuration order.
    pub per_action: Vec<(String, u64)>,
    /// Infeasible draws discarded over the whole run.
    pub retries: u64,
    pub state: RunState,
}

impl RunSummary {
    /// Number of picks of `action`.
    pub fn count(&self, action: &str) -> u64 {
        self.per_action
            .iter()
            .find(|(a, _)| a == action)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }
}

/// Selects action types until every quota is exhausted.
///
/// # Example
///
/// ```
/// use quota_scheduler::{plan, ActionScheduler, ActionWeights, FeasibilityOracle, OrderMode};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// struct Unlimited;
///
/// impl FeasibilityOracle for Unlimited {
///     type Request = u32;
///     fn satisfies(&self, _action: &str) -> bool { true }
///     fn request(&mut self, _action: &str) -> u32 { 0 }
/// }
///
/// let weights = ActionWeights::from_pairs([("A", 3.0), ("B", 1.0)]);
/// let plan = plan(&weights, 4).unwrap();
/// let mut scheduler = ActionScheduler::new(plan, OrderMode::Fixed, StdRng::seed_from_u64(0));
///
/// let mut order = Vec::new();
/// while let Some(pick) = scheduler.next_pick(&mut Unlimited).unwrap() {
///     order.push(pick.action);
/// }
/// assert_eq!(order, ["A", "A", "A", "B"]);
/// ```
#[derive(Debug)]
pub struct ActionScheduler<R> {
    state: ScheduleState,
    mode: OrderMode,
    retry: RetryPolicy,
    rng: R,
    run_state: RunState,
    failure: Option<ScheduleError>,
    consecutive_retries: u64,
    total_retries: u64,
}

impl<R: Rng> ActionScheduler<R> {
    /// Creates a scheduler with the default bounded retry policy.
    pub fn new(plan: QuotaPlan, mode: OrderMode, rng: R) -> Self {
        let state = ScheduleState::new(plan);
        let run_state = if state.is_exhausted() {
            RunState::Done
        } else {
            RunState::Running
        };

        Self {
            state,
            mode,
            retry: RetryPolicy::default(),
            rng,
            run_state,
            failure: None,
            consecutive_retries: 0,
            total_retries: 0,
        }
    }

    /// Replaces the retry policy for shuffled-mode infeasible draws.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn mode(&self) -> OrderMode {
        self.mode
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_done(&self) -> bool {
        self.run_state == RunState::Done
    }

    /// Picks still owed before the run is done.
    pub fn remaining(&self) -> u64 {
        self.state.remaining()
    }

    /// Infeasible draws discarded so far.
    pub fn retries(&self) -> u64 {
        self.total_retries
    }

    /// Selects the next feasible action and requests its parameters.
    ///
    /// Returns `Ok(None)` once every quota is exhausted. In fixed order an
    /// infeasible pick aborts with [`ScheduleError::OrderInfeasible`]; in
    /// shuffled order it is redrawn, up to the retry policy's bound. Once
    /// aborted, the scheduler keeps returning the error that stopped it.
    pub fn next_pick<O>(
        &mut self,
        oracle: &mut O,
    ) -> Result<Option<Pick<O::Request>>, ScheduleError>
    where
        O: FeasibilityOracle,
    {
        loop {
            match self.run_state {
                RunState::Running => {}
                RunState::Done => return Ok(None),
                RunState::Aborted => {
                    return match &self.failure {
                        Some(err) => Err(err.clone()),
                        None => Ok(None),
                    }
                }
            }

            let pos = match self.mode {
                OrderMode::Shuffled => self.rng.gen_range(0..self.state.active_len()),
                OrderMode::Fixed => 0,
            };

            let candidate = self.state.action_at(pos);
            if !oracle.satisfies(candidate) {
                let action = candidate.to_string();
                match self.mode {
                    OrderMode::Fixed => {
                        tracing::warn!(%action, "action not satisfiable in fixed order");
                        return Err(self.abort(ScheduleError::OrderInfeasible { action }));
                    }
                    OrderMode::Shuffled => {
                        self.consecutive_retries += 1;
                        self.total_retries += 1;
                        tracing::trace!(
                            %action,
                            retries = self.consecutive_retries,
                            "infeasible draw"
                        );

                        if self.retry.exhausted(self.consecutive_retries) {
                            let err = ScheduleError::Livelock {
                                retries: self.consecutive_retries,
                                active: self.state.active().map(str::to_string).collect(),
                            };
                            tracing::warn!(%err, "giving up on shuffled schedule");
                            return Err(self.abort(err));
                        }
                        continue;
                    }
                }
            }

            let action = candidate.to_string();
            let request = oracle.request(&action);
            self.consecutive_retries = 0;

            if self.state.advance(pos) {
                tracing::debug!(%action, remaining = self.state.active_len(), "quota reached");
            }
            if self.state.is_exhausted() {
                self.run_state = RunState::Done;
            }

            return Ok(Some(Pick { action, request }));
        }
    }

    /// Drives the loop to a terminal state.
    ///
    /// Every pick is passed to `emit`, then `on_progress(1)` is called. Emit
    /// errors halt the run and are returned unchanged; scheduling errors are
    /// converted into `E`.
    pub fn run<O, F, P, E>(
        &mut self,
        oracle: &mut O,
        mut emit: F,
        mut on_progress: P,
    ) -> Result<RunSummary, E>
    where
        O: FeasibilityOracle,
        F: FnMut(Pick<O::Request>) -> Result<(), E>,
        P: FnMut(u64),
        E: From<ScheduleError>,
    {
        while let Some(pick) = self.next_pick(oracle)? {
            if let Err(err) = emit(pick) {
                self.halt();
                return Err(err);
            }
            on_progress(1);
        }

        tracing::debug!(
            emitted = self.state.completed(),
            retries = self.total_retries,
            "schedule complete"
        );
        Ok(self.summary())
    }

    /// Stops the run without a scheduling error, e.g. after an output failure.
    pub fn halt(&mut self) {
        if self.run_state == RunState::Running {
            self.run_state = RunState::Aborted;
        }
    }

    /// Snapshot of the run so far.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            emitted: self.state.completed(),
            per_action: self.state.counts(),
            retries: self.total_retries,
            state: self.run_state,
        }
    }

    fn abort(&mut self, err: ScheduleError) -> ScheduleError {
        self.run_state = RunState::Aborted;
        self.failure = Some(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{plan, ActionWeights};
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::cell::Cell;
    use std::collections::HashSet;

    /// Oracle backed by a set of currently feasible actions.
    struct TestOracle {
        feasible: HashSet<String>,
        requests: Vec<String>,
    }

    impl TestOracle {
        fn all() -> Self {
            Self::only(&["A", "B", "C", "D"])
        }

        fn only(actions: &[&str]) -> Self {
            Self {
                feasible: actions.iter().map(|a| a.to_string()).collect(),
                requests: Vec::new(),
            }
        }
    }

    impl FeasibilityOracle for TestOracle {
        type Request = usize;

        fn satisfies(&self, action: &str) -> bool {
            self.feasible.contains(action)
        }

        fn request(&mut self, action: &str) -> usize {
            assert!(self.satisfies(action), "request without a feasible check");
            self.requests.push(action.to_string());
            self.requests.len()
        }
    }

    fn scheduler(pairs: &[(&str, f64)], total: u64, mode: OrderMode) -> ActionScheduler<StdRng> {
        let weights = ActionWeights::from_pairs(pairs.iter().copied());
        ActionScheduler::new(plan(&weights, total).unwrap(), mode, StdRng::seed_from_u64(42))
    }

    fn drain(scheduler: &mut ActionScheduler<StdRng>, oracle: &mut TestOracle) -> Vec<String> {
        let mut picks = Vec::new();
        while let Some(pick) = scheduler.next_pick(oracle).unwrap() {
            picks.push(pick.action);
        }
        picks
    }

    #[test]
    fn test_shuffled_run_meets_quotas() {
        let weights = [("A", 1.0), ("B", 1.0), ("C", 0.0)];
        let mut scheduler = scheduler(&weights, 10, OrderMode::Shuffled);
        let mut oracle = TestOracle::all();
        let mut emitted = Vec::new();
        let mut progress_calls = 0;

        let summary = scheduler
            .run(
                &mut oracle,
                |pick| {
                    emitted.push(pick.action);
                    Ok::<(), ScheduleError>(())
                },
                |n| {
                    assert_eq!(n, 1);
                    progress_calls += 1;
                },
            )
            .unwrap();

        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.emitted, 10);
        assert_eq!(summary.count("A"), 5);
        assert_eq!(summary.count("B"), 5);
        assert_eq!(summary.count("C"), 0);
        assert_eq!(emitted.len(), 10);
        assert!(!emitted.iter().any(|a| a == "C"));
        assert_eq!(progress_calls, 10);
        assert!(scheduler.is_done());
    }

    #[test]
    fn test_fixed_order_follows_configuration() {
        let mut scheduler = scheduler(&[("A", 3.0), ("B", 1.0)], 4, OrderMode::Fixed);
        let picks = drain(&mut scheduler, &mut TestOracle::all());

        assert_eq!(picks, ["A", "A", "A", "B"]);
        assert_eq!(scheduler.run_state(), RunState::Done);
    }

    #[test]
    fn test_fixed_order_aborts_on_infeasible_action() {
        let mut scheduler = scheduler(&[("A", 1.0)], 1, OrderMode::Fixed);
        let mut oracle = TestOracle::only(&[]);

        let err = scheduler.next_pick(&mut oracle).unwrap_err();
        assert_eq!(err, ScheduleError::OrderInfeasible { action: "A".into() });
        assert_eq!(scheduler.run_state(), RunState::Aborted);
        assert!(oracle.requests.is_empty());

        // The failure is sticky.
        assert_eq!(scheduler.next_pick(&mut oracle).unwrap_err(), err);
        assert_eq!(scheduler.summary().emitted, 0);
    }

    #[test]
    fn test_fixed_order_aborts_midway() {
        let mut scheduler = scheduler(&[("A", 1.0), ("B", 1.0)], 4, OrderMode::Fixed);
        let mut oracle = TestOracle::only(&["A"]);

        assert_eq!(scheduler.next_pick(&mut oracle).unwrap().unwrap().action, "A");
        assert_eq!(scheduler.next_pick(&mut oracle).unwrap().unwrap().action, "A");
        let err = scheduler.next_pick(&mut oracle).unwrap_err();
        assert_eq!(err.action(), Some("B"));
        assert_eq!(scheduler.summary().count("A"), 2);
    }

    #[test]
    fn test_fixed_run_returns_error_without_emitting() {
        let mut scheduler = scheduler(&[("A", 1.0)], 1, OrderMode::Fixed);
        let mut emitted = 0;

        let result = scheduler.run(
            &mut TestOracle::only(&[]),
            |_| {
                emitted += 1;
                Ok::<(), ScheduleError>(())
            },
            |_| {},
        );

        assert_eq!(result.unwrap_err(), ScheduleError::OrderInfeasible { action: "A".into() });
        assert_eq!(emitted, 0);
    }

    #[test]
    fn test_shuffled_infeasible_hits_retry_bound() {
        let mut scheduler = scheduler(&[("A", 1.0)], 1, OrderMode::Shuffled)
            .with_retry_policy(RetryPolicy::Bounded(50));
        let mut oracle = TestOracle::only(&[]);

        let err = scheduler.next_pick(&mut oracle).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Livelock {
                retries: 50,
                active: vec!["A".into()],
            }
        );
        assert_eq!(scheduler.retries(), 50);
        assert_eq!(scheduler.run_state(), RunState::Aborted);
        assert!(oracle.requests.is_empty());
    }

    #[test]
    fn test_shuffled_retries_past_infeasible_action() {
        // B is never feasible, but A can still finish before the bound trips.
        let mut scheduler = scheduler(&[("A", 1.0), ("B", 1.0)], 20, OrderMode::Shuffled)
            .with_retry_policy(RetryPolicy::Bounded(1_000));
        let mut oracle = TestOracle::only(&["A"]);

        let mut a_picks = 0;
        let err = loop {
            match scheduler.next_pick(&mut oracle) {
                Ok(Some(pick)) => {
                    assert_eq!(pick.action, "A");
                    a_picks += 1;
                }
                Ok(None) => panic!("run cannot finish while B is infeasible"),
                Err(err) => break err,
            }
        };

        assert_eq!(a_picks, 10);
        assert!(scheduler.retries() >= 1_000);
        assert_eq!(
            err,
            ScheduleError::Livelock {
                retries: 1_000,
                active: vec!["B".into()],
            }
        );
    }

    #[test]
    fn test_progress_never_exceeds_quota() {
        let weights = [("A", 5.0), ("B", 2.0), ("C", 1.0)];
        let mut scheduler = scheduler(&weights, 40, OrderMode::Shuffled);
        let mut oracle = TestOracle::all();
        let quotas = scheduler.state().quotas().clone();

        while scheduler.next_pick(&mut oracle).unwrap().is_some() {
            let state = scheduler.state();
            for (action, quota) in quotas.iter() {
                let progress = state.progress(action).unwrap();
                assert!(progress <= quota);
                let active = state.active().any(|a| a == action);
                assert_eq!(active, progress < quota);
            }
        }

        assert_eq!(scheduler.remaining(), 0);
        for (action, quota) in quotas.iter() {
            assert_eq!(scheduler.state().progress(action), Some(quota));
        }
    }

    #[test]
    fn test_shuffled_selection_is_uniform_over_types() {
        // A has far more quota than B, but while both are active each is drawn
        // with equal probability, so B finishes well before A does.
        let mut scheduler = scheduler(&[("A", 99.0), ("B", 1.0)], 1_000, OrderMode::Shuffled);
        let picks = drain(&mut scheduler, &mut TestOracle::all());

        let last_b = picks.iter().rposition(|a| a == "B").unwrap();
        assert!(last_b < 100, "B exhausted at pick {last_b}");
        assert_eq!(picks.iter().filter(|a| *a == "B").count(), 10);
    }

    #[test]
    fn test_same_seed_same_order() {
        let run = || {
            let weights = [("A", 1.0), ("B", 2.0), ("C", 3.0)];
            let mut scheduler = scheduler(&weights, 60, OrderMode::Shuffled);
            drain(&mut scheduler, &mut TestOracle::all())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_empty_plan_is_done_immediately() {
        let mut scheduler = scheduler(&[("A", 0.0)], 10, OrderMode::Shuffled);
        assert!(scheduler.is_done());
        assert!(scheduler.next_pick(&mut TestOracle::all()).unwrap().is_none());
    }

    #[test]
    fn test_zero_quota_action_never_emitted() {
        let mut scheduler = scheduler(&[("A", 1.0), ("B", 3.0)], 2, OrderMode::Fixed);
        let picks = drain(&mut scheduler, &mut TestOracle::all());
        assert_eq!(picks, ["B", "B"]);
        assert_eq!(scheduler.state().progress("A"), Some(0));
    }

    #[test]
    fn test_emit_error_halts_run() {
        let mut scheduler = scheduler(&[("A", 1.0)], 5, OrderMode::Fixed);
        let mut calls = 0;

        #[derive(Debug, PartialEq)]
        enum Failure {
            Schedule,
            Write,
        }
        impl From<ScheduleError> for Failure {
            fn from(_: ScheduleError) -> Self {
                Failure::Schedule
            }
        }

        let result = scheduler.run(
            &mut TestOracle::all(),
            |_| {
                calls += 1;
                if calls == 2 {
                    Err(Failure::Write)
                } else {
                    Ok(())
                }
            },
            |_| {},
        );

        assert_eq!(result.unwrap_err(), Failure::Write);
        assert_eq!(scheduler.run_state(), RunState::Aborted);
        assert!(scheduler.next_pick(&mut TestOracle::all()).unwrap().is_none());
    }

    #[test]
    fn test_requests_follow_feasible_checks() {
        let mut scheduler = scheduler(&[("A", 1.0), ("B", 1.0)], 6, OrderMode::Shuffled);
        let mut oracle = TestOracle::all();
        let mut ids = Vec::new();

        while let Some(pick) = scheduler.next_pick(&mut oracle).unwrap() {
            ids.push(pick.request);
        }

        assert_eq!(ids, (1..=6).collect::<Vec<_>>());
        assert_eq!(oracle.requests.len(), 6);
    }

    /// Oracle that refuses every other feasibility check.
    #[derive(Default)]
    struct AlternatingOracle {
        checks: Cell<u64>,
    }

    impl FeasibilityOracle for AlternatingOracle {
        type Request = ();

        fn satisfies(&self, _action: &str) -> bool {
            let n = self.checks.get();
            self.checks.set(n + 1);
            n % 2 == 1
        }

        fn request(&mut self, _action: &str) {}
    }

    proptest! {
        #[test]
        fn prop_progress_bounded_and_quotas_met(
            raw in proptest::collection::vec(0u32..20, 1..6),
            total in 0u64..300,
            seed in any::<u64>(),
        ) {
            let weights = ActionWeights::from_pairs(
                raw.iter().enumerate().map(|(i, w)| (format!("a{i}"), f64::from(*w))),
            );
            let plan = plan(&weights, total).unwrap();
            let planned = plan.total;
            let mut scheduler =
                ActionScheduler::new(plan, OrderMode::Shuffled, StdRng::seed_from_u64(seed));
            let mut oracle = AlternatingOracle::default();

            while scheduler.next_pick(&mut oracle).unwrap().is_some() {
                let state = scheduler.state();
                for (action, quota) in state.quotas().iter() {
                    prop_assert!(state.progress(action).unwrap_or(0) <= quota);
                }
            }

            let summary = scheduler.summary();
            prop_assert_eq!(summary.state, RunState::Done);
            prop_assert_eq!(summary.emitted, planned);
            for (action, quota) in scheduler.state().quotas().iter() {
                prop_assert_eq!(summary.count(action), quota);
            }
        }
    }
}
