//! CLI for generating and inspecting traffic files.

use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use trafficgen::{OrderMode, TrafficConfig, TrafficGenerator, TrafficReader, Transaction};

#[derive(Parser)]
#[command(
    name = "trafficgen",
    version,
    about = "Generate signed transaction traffic for load tests"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a traffic file from an action config.
    Generate(GenerateArgs),
    /// Summarize a traffic file and count records whose signatures do not
    /// recover a signer.
    Inspect {
        /// Traffic file to read.
        path: PathBuf,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Region name prefixed to generated object names (1-2 characters).
    #[arg(short, long, default_value = "TE")]
    name: String,

    /// Action config (JSON).
    #[arg(short, long, default_value = "actions.json")]
    config: PathBuf,

    /// Output traffic file.
    #[arg(short, long, default_value = "traffic_data.bin")]
    output: PathBuf,

    /// Emit actions in config order instead of random order.
    #[arg(long)]
    fixed: bool,

    /// Override the config's random seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the config's chain ID.
    #[arg(long)]
    chain_id: Option<u64>,

    /// Override the consecutive retry bound for random order (0 = unbounded).
    #[arg(long)]
    max_retries: Option<u64>,

    /// Worker threads for building and signing.
    #[arg(short, long, default_value_t = 1)]
    threads: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => generate(args),
        Command::Inspect { path } => inspect(&path),
    }
}

fn generate(args: GenerateArgs) -> Result<()> {
    let mut config = TrafficConfig::load(&args.config)
        .wrap_err_with(|| format!("failed to load config from {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(chain_id) = args.chain_id {
        config.chain_id = chain_id;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }

    let mode = if args.fixed {
        OrderMode::Fixed
    } else {
        OrderMode::Shuffled
    };

    let generator = TrafficGenerator::create(&args.name, config, &args.output)
        .wrap_err("failed to set up generator")?;
    let mut progress = Progress::new(generator.total());

    let start = Instant::now();
    let (summary, _) = generator
        .generate_parallel(mode, args.threads, |n| progress.advance(n))
        .wrap_err_with(|| format!("generation into {} failed", args.output.display()))?;
    let elapsed = start.elapsed();

    println!("{:16} | {:>8}", "action", "count");
    for (action, count) in &summary.per_action {
        println!("{:16} | {:8}", action, count);
    }
    println!(
        "{} transactions in {:.2} s ({:.0} tx/s), {} infeasible draws, written to {}",
        summary.emitted,
        elapsed.as_secs_f64(),
        summary.emitted as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        summary.retries,
        args.output.display()
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let reader = TrafficReader::open(path)
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut records = 0u64;
    let mut unrecoverable = 0u64;

    for record in reader {
        let bytes = record.wrap_err_with(|| format!("failed to read record {}", records))?;
        let trx = Transaction::deserialize(&bytes)
            .wrap_err_with(|| format!("record {} is not a transaction", records))?;
        records += 1;

        // Recovery only proves each signature is well formed; it does not tie
        // the signer to the action.
        if trx.recover_signers().map_or(true, |signers| signers.is_empty()) {
            unrecoverable += 1;
        }
        for action in trx.actions {
            *counts.entry(action.name).or_insert(0) += 1;
        }
    }

    println!("{:16} | {:>8}", "action", "count");
    for (action, count) in &counts {
        println!("{:16} | {:8}", action, count);
    }
    println!(
        "{} transactions, {} missing or with unrecoverable signatures",
        records, unrecoverable
    );
    Ok(())
}

/// Logs generation progress at every tenth of the run.
struct Progress {
    total: u64,
    done: u64,
    next_report: u64,
}

impl Progress {
    fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            next_report: Self::step(total),
        }
    }

    fn step(total: u64) -> u64 {
        (total / 10).max(1)
    }

    fn advance(&mut self, n: u64) {
        self.done += n;
        if self.done >= self.next_report || self.done == self.total {
            tracing::info!(done = self.done, total = self.total, "progress");
            self.next_report = self.done + Self::step(self.total);
        }
    }
}
