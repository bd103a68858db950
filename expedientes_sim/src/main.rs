//! Expedientes Simulator CLI
//!
//! Generate coherent lifecycle events, ingest raw payloads into a staging
//! table, or run both end to end over an in-process bus.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use expedientes_core::{GeneratorConfig, IngestMetrics, IngestObserver};
use expedientes_env::{PipelineContext, TokioContext};
use expedientes_sim::{
    resolve_seed, BatchExport, CaseRegistry, DriverConfig, EventSimulator, HistorySource, IngestionPipeline,
    JsonlHistory, JsonlTable, RecordSink, SimConfig, SimWorld,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Case lifecycle simulator and ingestion harness
#[derive(Parser, Debug)]
#[command(name = "expedientes-sim")]
#[command(about = "Simulate case lifecycle events and ingest them into a staging table", long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON summary on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a batch of events from the current case histories
    Generate {
        /// Case histories, one JSON row per line
        #[arg(long)]
        history: PathBuf,

        /// Number of events to generate
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Seed for case and branch selection (0 = random from time)
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Attempts allowed per requested event
        #[arg(long, default_value = "10")]
        retry_factor: usize,

        /// Probability that an event lowers the amount
        #[arg(long, default_value = "0.4")]
        amount_change_probability: f64,

        /// Write the batch to this file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Write events as JSON lines instead of one document
        #[arg(long)]
        jsonl: bool,
    },

    /// Normalize raw payloads (one per line) and append them to a table
    Ingest {
        /// Raw payloads, one per line
        #[arg(long)]
        input: PathBuf,

        /// Existing staging table file
        #[arg(long)]
        table: PathBuf,
    },

    /// Generate, publish, ingest and append over an in-process bus
    Run {
        #[arg(long)]
        history: PathBuf,

        #[arg(long)]
        table: PathBuf,

        /// Events per round
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Number of rounds; virtual time moves one day per round
        #[arg(short, long, default_value = "1")]
        rounds: usize,

        /// Master seed (0 = random from time)
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    if !args.json {
        info!("Expedientes simulator v{}", env!("CARGO_PKG_VERSION"));
    }

    match args.command {
        Command::Generate {
            history,
            count,
            seed,
            retry_factor,
            amount_change_probability,
            out,
            jsonl,
        } => {
            let histories = JsonlHistory::new(&history).load()?;
            let seed = resolve_seed(seed);
            let context = TokioContext::shared();
            let mut simulator = EventSimulator::new(Arc::clone(&context), CaseRegistry::from_histories(histories))
                .with_seed(seed)
                .with_config(DriverConfig::default().with_retry_factor(retry_factor))
                .with_generator(GeneratorConfig::default().with_amount_change_probability(amount_change_probability));

            let outcome = simulator.generate_batch(count, false)?;
            let export = BatchExport::new(seed, &outcome, context.system_time());

            if let Some(path) = &out {
                if jsonl {
                    export.write_jsonl(path)?;
                } else {
                    export.write_to_file(path)?;
                }
                info!("Wrote {} events to {}", export.generated, path.display());
            }

            if args.json {
                let summary = serde_json::json!({
                    "seed": seed,
                    "requested": export.requested,
                    "generated": export.generated,
                    "attempts": export.attempts,
                    "terminal_cases": simulator.registry().terminal_count(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }

        Command::Ingest { input, table } => {
            let context = TokioContext::shared();
            let metrics = Arc::new(IngestMetrics::new());
            let mut pipeline = IngestionPipeline::new(context, JsonlTable::open_existing(&table)?)
                .with_observer(Arc::clone(&metrics) as Arc<dyn IngestObserver>);

            let reader = BufReader::new(File::open(&input).with_context(|| format!("opening {}", input.display()))?);
            let mut lines = Vec::new();
            for line in reader.split(b'\n') {
                let line = line?;
                if !line.iter().all(u8::is_ascii_whitespace) {
                    lines.push(line);
                }
            }
            let stats = pipeline.ingest_batch(lines);
            let snapshot = metrics.snapshot();

            info!(
                "Ingested {} messages: {} appended, {} dropped, {} append failures",
                stats.received, stats.appended, stats.dropped, stats.append_failures
            );
            if args.json {
                let summary = serde_json::json!({ "pipeline": stats, "metrics": snapshot });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            if stats.append_failures > 0 {
                bail!("{} records could not be appended to {}", stats.append_failures, table.display());
            }
        }

        Command::Run {
            history,
            table,
            count,
            rounds,
            seed,
        } => {
            let histories = JsonlHistory::new(&history).load()?;
            let sink = JsonlTable::open_existing(&table)?;
            let config = SimConfig {
                seed: resolve_seed(seed),
                ..Default::default()
            };
            let mut world = SimWorld::new(config, histories, sink);

            let mut reports = Vec::with_capacity(rounds);
            for _ in 0..rounds {
                let report = world.run_round(count).await?;
                if report.generated < report.requested {
                    warn!(
                        "Round {}: only {} of {} events (terminal cases: {})",
                        report.round,
                        report.generated,
                        report.requested,
                        world.registry().terminal_count()
                    );
                }
                reports.push(report);
            }

            let snapshot = world.ingest_snapshot();
            let mut sink = world.into_sink();
            sink.flush()?;
            info!("Appended {} rows to {}", sink.appended(), table.display());

            if args.json {
                let summary = serde_json::json!({
                    "rounds": reports,
                    "metrics": snapshot,
                    "appended": sink.appended(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
    }

    Ok(())
}
