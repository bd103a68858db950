//! Simulation Driver.
//!
//! Picks cases uniformly, asks the generator for their next event, and
//! optionally publishes each event as it is produced. Terminal cases make
//! an attempt fail silently; the retry budget bounds how long a batch keeps
//! trying when most cases are finished.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use expedientes_core::{EventGenerator, GeneratorConfig, LifecycleEvent};
use expedientes_env::PipelineContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::publisher::{PublishHandle, Publisher};
use crate::registry::CaseRegistry;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Attempts allowed per requested event
    pub retry_factor: usize,

    /// Gap between consecutive event timestamps within one batch
    pub event_spacing: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retry_factor: 10,
            event_spacing: Duration::from_millis(1),
        }
    }
}

impl DriverConfig {
    pub fn with_retry_factor(mut self, retry_factor: usize) -> Self {
        self.retry_factor = retry_factor.max(1);
        self
    }

    /// Must be non-zero so a case picked twice in a batch never repeats a timestamp.
    pub fn with_event_spacing(mut self, event_spacing: Duration) -> Self {
        self.event_spacing = event_spacing.max(Duration::from_nanos(1));
        self
    }

    /// Clock time covered by `events` consecutive events.
    pub fn span(&self, events: usize) -> Duration {
        self.event_spacing.saturating_mul(u32::try_from(events).unwrap_or(u32::MAX))
    }
}

/// Result of one `generate_batch` call.
#[derive(Default)]
pub struct BatchOutcome {
    pub requested: usize,
    pub attempts: usize,
    pub events: Vec<LifecycleEvent>,

    /// Publishes still in flight, one per published event
    pub pending: Vec<PublishHandle>,

    /// Events that could not even be handed to the publisher
    pub dispatch_failures: usize,
}

impl BatchOutcome {
    /// Events requested but not produced.
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.events.len())
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall() == 0
    }

    /// Takes the in-flight handles, leaving none behind.
    pub fn take_pending(&mut self) -> Vec<PublishHandle> {
        std::mem::take(&mut self.pending)
    }
}

pub struct EventSimulator<C: PipelineContext> {
    context: Arc<C>,
    registry: CaseRegistry,
    generator: EventGenerator,
    publisher: Option<Publisher<C>>,
    config: DriverConfig,
    rng: ChaCha8Rng,
}

impl<C: PipelineContext> EventSimulator<C> {
    /// Creates a driver seeded from the context; seed 0 falls back to the
    /// wall clock.
    pub fn new(context: Arc<C>, registry: CaseRegistry) -> Self {
        let seed = resolve_seed(context.seed());
        Self {
            context,
            registry,
            generator: EventGenerator::default(),
            publisher: None,
            config: DriverConfig::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn with_generator(mut self, config: GeneratorConfig) -> Self {
        self.generator = EventGenerator::new(config);
        self
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_publisher(mut self, publisher: Publisher<C>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Reseeds the case/branch RNG. Seed 0 falls back to the wall clock.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(resolve_seed(seed));
        self
    }

    pub fn registry(&self) -> &CaseRegistry {
        &self.registry
    }

    /// One attempt: pick a case and try to advance it.
    pub fn generate_one(&mut self) -> Option<LifecycleEvent> {
        let now = self.context.system_time();
        self.generate_at(now)
    }

    fn generate_at(&mut self, at: DateTime<Utc>) -> Option<LifecycleEvent> {
        let (case_ref, state) = self.registry.pick_mut(&mut self.rng)?;
        self.generator.generate(case_ref, state, &mut self.rng, at)
    }

    /// Timestamp of the `index`-th event of a batch started at `start`.
    fn stamp(&self, start: DateTime<Utc>, index: usize) -> DateTime<Utc> {
        ChronoDuration::from_std(self.config.span(index))
            .ok()
            .and_then(|offset| start.checked_add_signed(offset))
            .unwrap_or(start)
    }

    /// Produces up to `target` events within `retry_factor * target` attempts.
    ///
    /// Events are stamped `event_spacing` apart starting at the context
    /// clock, so timestamps are strictly increasing within the batch.
    ///
    /// With `publish`, each event is dispatched as soon as it is generated;
    /// the handles come back in [`BatchOutcome::pending`].
    pub fn generate_batch(&mut self, target: usize, publish: bool) -> Result<BatchOutcome, SimError> {
        if publish && self.publisher.is_none() {
            return Err(SimError::NoPublisher);
        }

        let mut outcome = BatchOutcome {
            requested: target,
            events: Vec::with_capacity(target),
            ..Default::default()
        };
        if target == 0 {
            return Ok(outcome);
        }
        if self.registry.is_empty() {
            warn!("no cases loaded, nothing to generate");
            return Ok(outcome);
        }

        let start = self.context.system_time();
        let max_attempts = target.saturating_mul(self.config.retry_factor);
        while outcome.events.len() < target && outcome.attempts < max_attempts {
            outcome.attempts += 1;
            let at = self.stamp(start, outcome.events.len());
            let Some(event) = self.generate_at(at) else {
                continue;
            };

            if publish {
                if let Some(publisher) = &self.publisher {
                    match publisher.dispatch(&event) {
                        Ok(handle) => outcome.pending.push(handle),
                        Err(e) => {
                            outcome.dispatch_failures += 1;
                            warn!(case = %event.case_ref, error = %e, "could not dispatch event");
                        }
                    }
                }
            }
            outcome.events.push(event);
        }

        info!(
            generated = outcome.events.len(),
            requested = target,
            "generated coherent events"
        );
        if !outcome.is_complete() {
            warn!(
                shortfall = outcome.shortfall(),
                attempts = outcome.attempts,
                terminal = self.registry.terminal_count(),
                "retry budget exhausted before reaching target"
            );
        }
        if !publish {
            if let Some(first) = outcome.events.first() {
                match serde_json::to_string_pretty(first) {
                    Ok(json) => debug!(event = %json, "example event"),
                    Err(e) => debug!(error = %e, "could not render example event"),
                }
            }
        }

        Ok(outcome)
    }
}

/// Returns `seed`, or a wall-clock derived seed when it is 0.
pub fn resolve_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelBus;
    use crate::context::SimContext;
    use chrono::{TimeZone, Utc};
    use expedientes_core::graph;
    use expedientes_core::{CaseHistory, CaseRef, ProcedureType, Stage};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn histories(n: usize) -> Vec<CaseHistory> {
        let t = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let procedure = if i % 2 == 0 { ProcedureType::Verbal } else { ProcedureType::Ordinario };
                CaseHistory::new(CaseRef::new(format!("EXP-{:04}", i)).unwrap(), procedure)
                    .with_stage(Stage::Demanda, t)
                    .with_amount(1000.0 + i as f64, t)
            })
            .collect()
    }

    fn simulator(seed: u64, cases: usize) -> EventSimulator<SimContext> {
        let registry = CaseRegistry::from_histories(histories(cases));
        EventSimulator::new(SimContext::shared(seed), registry)
    }

    #[test]
    fn test_zero_target_returns_immediately() {
        let mut sim = simulator(1, 5);
        let outcome = sim.generate_batch(0, false).unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.shortfall(), 0);
    }

    #[test]
    fn test_publish_without_publisher() {
        let mut sim = simulator(1, 5);
        assert!(matches!(sim.generate_batch(3, true), Err(SimError::NoPublisher)));
    }

    #[test]
    fn test_batch_reaches_target() {
        let mut sim = simulator(7, 50);
        let outcome = sim.generate_batch(20, false).unwrap();
        assert_eq!(outcome.events.len(), 20);
        assert!(outcome.attempts >= 20);
        assert!(outcome.is_complete());
    }

    #[test]
    fn test_all_terminal_exhausts_budget() {
        let t = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let registry = CaseRegistry::from_histories(vec![
            CaseHistory::new(CaseRef::new("DONE").unwrap(), ProcedureType::Verbal)
                .with_stage(Stage::SentenciaDefinitiva, t),
        ]);
        let mut sim = EventSimulator::new(SimContext::shared(3), registry);

        let outcome = sim.generate_batch(4, false).unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.attempts, 40);
        assert_eq!(outcome.shortfall(), 4);
    }

    #[test]
    fn test_empty_registry() {
        let mut sim = EventSimulator::new(SimContext::shared(3), CaseRegistry::new());
        let outcome = sim.generate_batch(4, false).unwrap();
        assert_eq!(outcome.shortfall(), 4);
        assert_eq!(outcome.attempts, 0);
    }

    #[test]
    fn test_same_seed_same_batch() {
        let a = simulator(42, 30).generate_batch(25, false).unwrap().events;
        let b = simulator(42, 30).generate_batch(25, false).unwrap().events;
        assert_eq!(a, b);
    }

    #[test]
    fn test_events_stamped_from_context_clock() {
        let ctx = SimContext::shared(9);
        ctx.advance_time(Duration::from_secs(3600));
        let mut sim = EventSimulator::new(Arc::clone(&ctx), CaseRegistry::from_histories(histories(3)))
            .with_config(DriverConfig::default().with_event_spacing(Duration::from_secs(1)));

        let outcome = sim.generate_batch(3, false).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        for (i, event) in outcome.events.iter().enumerate() {
            assert_eq!(event.stages[0].timestamp, start + ChronoDuration::seconds(i as i64));
        }
    }

    #[test]
    fn test_repeat_picks_get_increasing_timestamps() {
        // A single case is picked on every attempt
        let t = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let registry = CaseRegistry::from_histories(vec![
            CaseHistory::new(CaseRef::new("ONLY").unwrap(), ProcedureType::Ordinario).with_amount(800.0, t),
        ]);
        let mut sim = EventSimulator::new(SimContext::shared(5), registry);

        let outcome = sim.generate_batch(3, false).unwrap();
        let stages: Vec<_> = outcome.events.iter().map(|e| e.stages[0].clone()).collect();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].estado, Stage::Demanda);
        assert!(stages.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_published_batch() {
        let (bus, mut sub) = ChannelBus::new("expedientes", 64, 1);
        let mut sim = simulator(11, 10).with_publisher(Publisher::new(SimContext::shared(11), Arc::new(bus)));

        let mut outcome = sim.generate_batch(8, true).unwrap();
        assert_eq!(outcome.pending.len(), outcome.events.len());

        let report = crate::publisher::confirm_all(outcome.take_pending()).await;
        assert!(report.all_delivered());

        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, outcome.events.len());
    }

    proptest! {
        #[test]
        fn prop_batches_stay_coherent(seed in 1u64.., cases in 1usize..20, target in 0usize..60) {
            let mut sim = simulator(seed, cases);
            let start: HashMap<_, _> = sim.registry().iter().map(|(r, s)| (r.clone(), s.clone())).collect();

            let outcome = sim.generate_batch(target, false).unwrap();
            prop_assert!(outcome.events.len() <= target);
            prop_assert!(outcome.attempts <= target * 10);

            // Replay per case: every stage is an edge, amounts never rise
            let mut replay = start;
            for event in &outcome.events {
                let state = replay.get_mut(&event.case_ref).unwrap();
                let next = event.stage().unwrap();
                prop_assert!(graph::is_valid_edge(state.procedure, state.last_stage.as_ref(), next));
                if let Some(amount) = event.amount() {
                    prop_assert!(amount <= state.last_amount.unwrap());
                    state.last_amount = Some(amount);
                }
                state.last_stage = Some(next.clone());
            }
            for (case_ref, state) in sim.registry().iter() {
                prop_assert_eq!(Some(state), replay.get(case_ref));
            }
        }
    }
}
