//! Simulation context implementing PipelineContext for deterministic runs.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use expedientes_env::PipelineContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Simulation context backed by a virtual clock.
///
/// This implements `PipelineContext` using:
/// - A virtual clock that only moves when advanced (or slept on)
/// - A fixed epoch, so event and ingestion timestamps are reproducible
/// - The master seed, from which the driver derives its RNG
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Virtual time 0 maps to this wall-clock instant
    epoch: DateTime<Utc>,
}

impl SimContext {
    /// Creates a context whose clock starts at 2024-01-01T00:00:00Z.
    pub fn new(seed: u64) -> Self {
        Self::starting_at(seed, default_epoch())
    }

    /// Creates a context whose clock starts at `epoch`.
    pub fn starting_at(seed: u64, epoch: DateTime<Utc>) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            epoch,
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time_ns;
    }

    /// Virtual time elapsed since the epoch.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }
}

fn default_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default()
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl PipelineContext for SimContext {
    fn system_time(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::nanoseconds(self.time_ns() as i64);
        self.epoch + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping in simulation just moves the clock
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, seed = self.seed, "spawning simulated task");
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
