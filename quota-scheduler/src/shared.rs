//! Scheduler shared between worker threads.
//!
//! Workers call [`SharedScheduler::next_pick`] concurrently. The whole
//! select, check, request and advance sequence runs under one lock, so quota
//! bookkeeping has a single writer and two workers can never be issued the
//! same pool resource. Building and signing the transaction happen outside
//! the lock.

use parking_lot::Mutex;
use rand::Rng;

use crate::scheduler::{ActionScheduler, Pick, RunSummary};
use crate::types::{FeasibilityOracle, RunState, ScheduleError};

struct Inner<R, O> {
    scheduler: ActionScheduler<R>,
    oracle: O,
}

/// An [`ActionScheduler`] and its oracle behind a single lock.
pub struct SharedScheduler<R, O> {
    inner: Mutex<Inner<R, O>>,
}

impl<R, O> SharedScheduler<R, O>
where
    R: Rng,
    O: FeasibilityOracle,
{
    pub fn new(scheduler: ActionScheduler<R>, oracle: O) -> Self {
        Self {
            inner: Mutex::new(Inner { scheduler, oracle }),
        }
    }

    /// Atomically selects the next action and consumes its pool resources.
    pub fn next_pick(&self) -> Result<Option<Pick<O::Request>>, ScheduleError> {
        let mut guard = self.inner.lock();
        let Inner { scheduler, oracle } = &mut *guard;
        scheduler.next_pick(oracle)
    }

    /// Stops handing out picks, e.g. after a worker failed to write.
    pub fn halt(&self) {
        self.inner.lock().scheduler.halt();
    }

    pub fn run_state(&self) -> RunState {
        self.inner.lock().scheduler.run_state()
    }

    pub fn summary(&self) -> RunSummary {
        self.inner.lock().scheduler.summary()
    }

    /// Releases the scheduler and the oracle.
    pub fn into_inner(self) -> (ActionScheduler<R>, O) {
        let Inner { scheduler, oracle } = self.inner.into_inner();
        (scheduler, oracle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{plan, ActionWeights};
    use crate::types::OrderMode;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashMap;
    use std::thread;

    /// Hands out a fixed number of tickets per action; each ticket only once.
    struct TicketPool {
        tickets: HashMap<String, Vec<u32>>,
    }

    impl FeasibilityOracle for TicketPool {
        type Request = u32;

        fn satisfies(&self, action: &str) -> bool {
            self.tickets.get(action).is_some_and(|t| !t.is_empty())
        }

        fn request(&mut self, action: &str) -> u32 {
            self.tickets
                .get_mut(action)
                .and_then(Vec::pop)
                .expect("checked by satisfies")
        }
    }

    #[test]
    fn test_concurrent_pickers_share_quotas() {
        let weights = ActionWeights::from_pairs([("A", 1.0), ("B", 3.0)]);
        let plan = plan(&weights, 400).unwrap();
        let pool = TicketPool {
            tickets: HashMap::from([
                ("A".to_string(), (0..100).collect()),
                ("B".to_string(), (0..300).collect()),
            ]),
        };
        let shared = SharedScheduler::new(
            ActionScheduler::new(plan, OrderMode::Shuffled, StdRng::seed_from_u64(1)),
            pool,
        );

        let picks: Vec<Pick<u32>> = thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut mine = Vec::new();
                        while let Some(pick) = shared.next_pick().unwrap() {
                            mine.push(pick);
                        }
                        mine
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(picks.len(), 400);
        assert_eq!(shared.run_state(), RunState::Done);

        // Every ticket was issued exactly once.
        let mut a: Vec<u32> = picks.iter().filter(|p| p.action == "A").map(|p| p.request).collect();
        let mut b: Vec<u32> = picks.iter().filter(|p| p.action == "B").map(|p| p.request).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, (0..100).collect::<Vec<_>>());
        assert_eq!(b, (0..300).collect::<Vec<_>>());

        let (_, pool) = shared.into_inner();
        assert!(pool.tickets.values().all(Vec::is_empty));
    }

    #[test]
    fn test_halt_stops_all_workers() {
        let weights = ActionWeights::from_pairs([("A", 1.0)]);
        let pool = TicketPool {
            tickets: HashMap::from([("A".to_string(), (0..10).collect())]),
        };
        let scheduler = ActionScheduler::new(
            plan(&weights, 10).unwrap(),
            OrderMode::Fixed,
            StdRng::seed_from_u64(1),
        );
        let shared = SharedScheduler::new(scheduler, pool);

        assert!(shared.next_pick().unwrap().is_some());
        shared.halt();
        assert!(shared.next_pick().unwrap().is_none());
        assert_eq!(shared.run_state(), RunState::Aborted);
        assert_eq!(shared.summary().emitted, 1);
    }
}
