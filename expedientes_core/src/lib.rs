//! Expedientes Core - Case File Lifecycle Model
//!
//! This library holds the pure parts of the case lifecycle pipeline:
//! 1. **Procedure graph**: which stage may follow which, and with what odds
//! 2. **Event generation**: coherent, order-respecting lifecycle events with
//!    amounts that never increase
//! 3. **Ingestion**: normalization of arbitrary bus payloads into append-only
//!    staging rows, with silent, counted drops
//!
//! Nothing here performs I/O. Randomness comes in through [`RandomSource`],
//! time comes in as an explicit `DateTime<Utc>`.

pub mod model;
pub mod draw;
pub mod graph;
pub mod generator;
pub mod projector;
pub mod normalizer;
pub mod metrics;
pub mod schema;

// Re-export key types for convenience
pub use model::{
    AmountEntry, CaseHistory, CaseRef, CaseRuntimeState, LifecycleEvent, ModelError,
    NormalizedRecord, ProcedureType, Stage, StageEntry,
};
pub use draw::{FixedDraws, RandomSource};
pub use generator::{EventGenerator, GeneratorConfig};
pub use projector::{project, BootstrapRow};
pub use normalizer::{normalize, DiscardedEntries, DropReason, NormalizeOutcome, Normalizer, NormalizerConfig};
pub use metrics::{IngestMetrics, IngestObserver, IngestSnapshot, NoopObserver};
