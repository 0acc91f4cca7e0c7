//! Generation runs: quota planning, scheduling, signing and output.

use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use std::path::Path;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use quota_scheduler::{
    plan, ActionScheduler, OrderMode, Pick, QuotaPlan, RunSummary, SharedScheduler,
    TransactionSink,
};

use crate::config::TrafficConfig;
use crate::error::{ConfigError, GenerateError, PoolError};
use crate::ledger::Ledger;
use crate::pool::{Grant, RandomPool};
use crate::writer::TrafficWriter;

/// Default transaction lifetime, in seconds from generation time.
pub const DEFAULT_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Plans quotas for a configuration and writes the resulting traffic.
///
/// A generator performs exactly one run: [`generate`](Self::generate)
/// consumes it and closes the sink once the run ends, whether it succeeded
/// or not.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use trafficgen::{OrderMode, TrafficConfig, TrafficGenerator};
///
/// let config = TrafficConfig::load(Path::new("actions.json"))?;
/// let generator = TrafficGenerator::create("TE", config, Path::new("traffic_data.bin"))?;
/// let (summary, _) = generator.generate(OrderMode::Shuffled, |_| {})?;
/// println!("wrote {} transactions", summary.emitted);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct TrafficGenerator<W> {
    name: String,
    config: TrafficConfig,
    plan: QuotaPlan,
    pool: RandomPool,
    ledger: Ledger,
    sink: W,
}

impl TrafficGenerator<TrafficWriter> {
    /// Creates a generator writing a framed traffic file at `output`.
    ///
    /// The output file is only created (and truncated) once the name and
    /// configuration have been accepted.
    pub fn create(name: &str, config: TrafficConfig, output: &Path) -> Result<Self, GenerateError> {
        let (pool, plan) = prepare(name, &config)?;
        let writer = TrafficWriter::create(output)?;
        Ok(Self::assemble(name, config, pool, plan, writer))
    }
}

impl<W> TrafficGenerator<W>
where
    W: TransactionSink,
    GenerateError: From<W::Error>,
{
    /// Validates the configuration, builds the pool and plans quotas.
    pub fn new(name: &str, config: TrafficConfig, sink: W) -> Result<Self, GenerateError> {
        let (pool, plan) = prepare(name, &config)?;
        Ok(Self::assemble(name, config, pool, plan, sink))
    }

    fn assemble(
        name: &str,
        config: TrafficConfig,
        pool: RandomPool,
        plan: QuotaPlan,
        sink: W,
    ) -> Self {
        let ledger = Ledger::new(config.chain_id, default_expiration());
        Self {
            name: name.to_string(),
            config,
            plan,
            pool,
            ledger,
            sink,
        }
    }

    /// Overrides the expiration stamped on every transaction (Unix seconds).
    pub fn with_expiration(mut self, expiration: u64) -> Self {
        self.ledger = Ledger::new(self.config.chain_id, expiration);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Realized number of transactions the run will produce.
    pub fn total(&self) -> u64 {
        self.plan.total
    }

    pub fn plan(&self) -> &QuotaPlan {
        &self.plan
    }

    /// Runs the scheduler to completion on the calling thread.
    ///
    /// `on_progress(1)` is called after each written transaction. Returns the
    /// run summary and the closed sink.
    pub fn generate<P>(
        self,
        mode: OrderMode,
        on_progress: P,
    ) -> Result<(RunSummary, W), GenerateError>
    where
        P: FnMut(u64),
    {
        let Self {
            config,
            plan,
            mut pool,
            ledger,
            mut sink,
            ..
        } = self;

        tracing::info!(%mode, total = plan.total, "generating traffic");
        let mut scheduler = ActionScheduler::new(plan, mode, schedule_rng(&config))
            .with_retry_policy(config.retry_policy());

        let result = scheduler.run(
            &mut pool,
            |pick| -> Result<(), GenerateError> {
                let bytes = encode_pick(&ledger, pick)?;
                sink.write(&bytes)?;
                Ok(())
            },
            on_progress,
        );

        let summary = finish(result, sink.close().map_err(GenerateError::from))?;
        Ok((summary, sink))
    }

    /// Runs the scheduler with `threads` workers building and signing in parallel.
    ///
    /// Picks are handed out under a single lock, so quotas and pool resources
    /// are never double-issued; only construction and signing overlap. Records
    /// may land in the output out of pick order.
    pub fn generate_parallel<P>(
        self,
        mode: OrderMode,
        threads: usize,
        on_progress: P,
    ) -> Result<(RunSummary, W), GenerateError>
    where
        W: Send,
        P: FnMut(u64) + Send,
    {
        if threads <= 1 {
            return self.generate(mode, on_progress);
        }

        let Self {
            config,
            plan,
            pool,
            ledger,
            sink,
            ..
        } = self;

        tracing::info!(%mode, threads, total = plan.total, "generating traffic in parallel");
        let scheduler = ActionScheduler::new(plan, mode, schedule_rng(&config))
            .with_retry_policy(config.retry_policy());
        let shared = SharedScheduler::new(scheduler, pool);
        let sink = Mutex::new(sink);
        let progress = Mutex::new(on_progress);

        let result = thread::scope(|s| {
            let workers: Vec<_> = (0..threads)
                .map(|_| s.spawn(|| worker(&shared, &ledger, &sink, &progress)))
                .collect();

            let mut first_err = None;
            for handle in workers {
                let outcome = handle.join().unwrap_or_else(|_| Err(GenerateError::WorkerPanic));
                if let Err(err) = outcome {
                    shared.halt();
                    first_err.get_or_insert(err);
                }
            }
            first_err.map_or(Ok(()), Err)
        });

        let mut sink = sink.into_inner();
        let closed = sink.close().map_err(GenerateError::from);
        let summary = finish(result.map(|()| shared.summary()), closed)?;
        Ok((summary, sink))
    }
}

/// Pulls picks until the shared scheduler is exhausted or fails.
fn worker<R, W, P>(
    shared: &SharedScheduler<R, RandomPool>,
    ledger: &Ledger,
    sink: &Mutex<W>,
    progress: &Mutex<P>,
) -> Result<(), GenerateError>
where
    R: rand::Rng,
    W: TransactionSink,
    GenerateError: From<W::Error>,
    P: FnMut(u64),
{
    while let Some(pick) = shared.next_pick()? {
        let written = encode_pick(ledger, pick)
            .and_then(|bytes| sink.lock().write(&bytes).map_err(GenerateError::from));
        if let Err(err) = written {
            shared.halt();
            return Err(err);
        }
        (*progress.lock())(1);
    }
    Ok(())
}

/// Validates `config`, builds the resource pool and plans quotas.
fn prepare(name: &str, config: &TrafficConfig) -> Result<(RandomPool, QuotaPlan), GenerateError> {
    config.validate()?;
    let pool = RandomPool::new(name, config.max_user_number, config.seed)?;
    let weights = config.action_weights()?;
    let plan = plan(&weights, config.total()).map_err(ConfigError::from)?;

    tracing::info!(
        region = name,
        requested = config.total,
        total = plan.total,
        actions = plan.quotas.len(),
        "planned traffic"
    );
    for (action, quota) in plan.quotas.iter() {
        tracing::debug!(action, quota, "quota");
    }
    Ok((pool, plan))
}

/// Builds, signs and serializes the transaction for one pick.
fn encode_pick(
    ledger: &Ledger,
    pick: Pick<Result<Grant, PoolError>>,
) -> Result<Vec<u8>, GenerateError> {
    let grant = pick.request?;
    let trx = ledger.sign_action(&pick.action, grant.params, &grant.keys)?;
    Ok(trx.serialize()?)
}

/// Combines the run outcome with the sink's close result, preferring the run error.
fn finish(
    result: Result<RunSummary, GenerateError>,
    closed: Result<(), GenerateError>,
) -> Result<RunSummary, GenerateError> {
    match (result, closed) {
        (Ok(summary), Ok(())) => {
            tracing::info!(
                emitted = summary.emitted,
                retries = summary.retries,
                "traffic generated"
            );
            for (action, count) in &summary.per_action {
                tracing::debug!(action = action.as_str(), count, "emitted");
            }
            Ok(summary)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                tracing::warn!(%close_err, "failed to close output after error");
            }
            tracing::error!(%err, "traffic generation failed");
            Err(err)
        }
    }
}

/// Scheduler randomness, kept apart from the pool's stream.
fn schedule_rng(config: &TrafficConfig) -> StdRng {
    StdRng::seed_from_u64(config.seed.wrapping_add(1))
}

fn default_expiration() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        + DEFAULT_LIFETIME_SECS
}
