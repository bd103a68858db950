//! Core processing context trait for the case lifecycle pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the event generator and
/// the ingestion normalizer can run both against live infrastructure
/// (tokio, system clock) and inside a deterministic simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, the system clock
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Every timestamp written into a lifecycle event or a normalized record
/// comes from `system_time()`, so a simulation context fully controls them.
#[async_trait]
pub trait PipelineContext: Send + Sync + 'static {
    /// Returns the wall-clock time used for event and ingestion timestamps.
    ///
    /// In simulation, this is the virtual clock plus an epoch offset.
    fn system_time(&self) -> DateTime<Utc>;

    /// Suspends execution for the given duration (publish retry backoff).
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task (one per in-flight publish).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
