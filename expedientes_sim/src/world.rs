//! SimWorld - end-to-end simulation container.
//!
//! Wires the driver, an in-process bus and the ingestion pipeline around a
//! shared virtual clock: generate → publish → normalize → append.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use expedientes_core::{
    CaseHistory, GeneratorConfig, IngestMetrics, IngestObserver, IngestSnapshot, NormalizerConfig,
};
use expedientes_env::{EventBus, PipelineContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::bus::{BusSubscription, ChannelBus};
use crate::context::SimContext;
use crate::driver::{DriverConfig, EventSimulator};
use crate::error::SimError;
use crate::pipeline::{IngestionPipeline, PipelineStats};
use crate::publisher::{confirm_all, Publisher, PublisherConfig};
use crate::registry::CaseRegistry;
use crate::warehouse::RecordSink;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Topic name on the in-process bus
    pub topic: String,

    /// Undelivered messages the bus will buffer
    pub bus_capacity: usize,

    /// Virtual time between rounds
    pub round_interval: Duration,

    pub generator: GeneratorConfig,
    pub driver: DriverConfig,
    pub publisher: PublisherConfig,
    pub normalizer: NormalizerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            topic: "expedientes".to_string(),
            bus_capacity: 1024,
            round_interval: Duration::from_secs(86_400),
            generator: GeneratorConfig::default(),
            driver: DriverConfig::default(),
            publisher: PublisherConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

/// What one round produced.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: u64,
    pub requested: usize,
    pub generated: usize,
    pub attempts: usize,
    pub delivered: usize,
    pub publish_failures: usize,

    /// Cumulative pipeline counts after this round
    pub pipeline: PipelineStats,
}

pub struct SimWorld<S: RecordSink> {
    /// Configuration
    pub config: SimConfig,

    /// Shared virtual clock
    pub context: Arc<SimContext>,

    bus: Arc<ChannelBus>,
    subscription: BusSubscription,
    simulator: EventSimulator<SimContext>,
    pipeline: IngestionPipeline<S, SimContext>,
    metrics: Arc<IngestMetrics>,
    rounds: u64,
}

impl<S: RecordSink> SimWorld<S> {
    /// Builds a world over `histories`. The clock starts one day after the
    /// newest history entry, so generated events always sort after them.
    pub fn new(config: SimConfig, histories: Vec<CaseHistory>, sink: S) -> Self {
        // Derive separate seeds for different subsystems
        let driver_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let bus_seed = config.seed.wrapping_mul(0x517cc1b727220a95);

        let epoch = newest_timestamp(&histories)
            .map(|newest| newest + ChronoDuration::days(1))
            .unwrap_or_else(|| SimContext::new(config.seed).epoch());
        let context = Arc::new(SimContext::starting_at(config.seed, epoch));

        let (bus, subscription) = ChannelBus::new(config.topic.clone(), config.bus_capacity, bus_seed);
        let bus = Arc::new(bus);
        let publisher = Publisher::new(Arc::clone(&context), Arc::clone(&bus) as Arc<dyn EventBus>).with_config(config.publisher.clone());

        let simulator = EventSimulator::new(Arc::clone(&context), CaseRegistry::from_histories(histories))
            .with_seed(driver_seed)
            .with_generator(config.generator.clone())
            .with_config(config.driver.clone())
            .with_publisher(publisher);

        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestionPipeline::new(Arc::clone(&context), sink)
            .with_normalizer(config.normalizer.clone())
            .with_observer(Arc::clone(&metrics) as Arc<dyn IngestObserver>);

        info!(
            seed = config.seed,
            cases = simulator.registry().len(),
            start = %epoch,
            "simulation world ready"
        );

        Self {
            config,
            context,
            bus,
            subscription,
            simulator,
            pipeline,
            metrics,
            rounds: 0,
        }
    }

    /// Generates and publishes up to `count` events, ingests them, then
    /// advances the clock by one round interval.
    pub async fn run_round(&mut self, count: usize) -> Result<RoundReport, SimError> {
        let mut batch = self.simulator.generate_batch(count, true)?;

        // Keep consuming while publishes complete so a full bus never stalls
        let confirm = confirm_all(batch.take_pending());
        tokio::pin!(confirm);
        let publish = loop {
            tokio::select! {
                report = &mut confirm => break report,
                Some((_, message)) = self.subscription.recv() => {
                    self.pipeline.process(&message.payload);
                }
            }
        };
        let pipeline = self.pipeline.drain(&mut self.subscription);

        // Next round starts after this round's last event
        let used = self.config.driver.span(batch.events.len());
        self.context.advance_time(self.config.round_interval.max(used));
        self.rounds += 1;

        let report = RoundReport {
            round: self.rounds,
            requested: batch.requested,
            generated: batch.events.len(),
            attempts: batch.attempts,
            delivered: publish.delivered.len(),
            publish_failures: publish.failed.len() + batch.dispatch_failures,
            pipeline,
        };
        info!(
            round = report.round,
            generated = report.generated,
            delivered = report.delivered,
            appended = pipeline.appended,
            "round complete"
        );
        Ok(report)
    }

    pub fn registry(&self) -> &CaseRegistry {
        self.simulator.registry()
    }

    pub fn bus(&self) -> &ChannelBus {
        &self.bus
    }

    pub fn ingest_snapshot(&self) -> IngestSnapshot {
        self.metrics.snapshot()
    }

    pub fn sink(&self) -> &S {
        self.pipeline.sink()
    }

    pub fn into_sink(self) -> S {
        self.pipeline.into_sink()
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> DateTime<Utc> {
        self.context.system_time()
    }
}

fn newest_timestamp(histories: &[CaseHistory]) -> Option<DateTime<Utc>> {
    histories
        .iter()
        .flat_map(|history| {
            let amounts = history.amounts.iter().map(|entry| entry.timestamp);
            let stages = history.stages.iter().map(|entry| entry.timestamp);
            amounts.chain(stages)
        })
        .max()
}
