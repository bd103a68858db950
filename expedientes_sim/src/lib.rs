//! Expedientes Simulation Harness
//!
//! This crate holds the stateful half of the case lifecycle pipeline: the
//! runtime state store, the simulation driver, publishing, warehouse
//! adapters and the streaming ingestion job.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: every event and ingestion timestamp comes from the context
//! - **Randomness**: case picks, branch draws and decreases derive from one seed
//! - **Bus**: an in-process channel with injectable publish failures
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SimWorld                            │
//! │                                                              │
//! │  CaseRegistry ──► EventSimulator ──► Publisher ──► ChannelBus│
//! │       ▲                                               │      │
//! │       │ project                                       ▼      │
//! │  HistorySource                       IngestionPipeline       │
//! │                                     normalize ─► RecordSink  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use expedientes_sim::{MemoryTable, SimConfig, SimWorld};
//!
//! let mut world = SimWorld::new(SimConfig::default(), histories, MemoryTable::new());
//! let report = world.run_round(100).await?;
//! ```

mod context;
mod error;
pub mod bus;
pub mod registry;
pub mod driver;
pub mod publisher;
pub mod warehouse;
pub mod pipeline;
pub mod exporter;
mod world;

pub use context::SimContext;
pub use error::SimError;
pub use bus::{BusSubscription, ChannelBus};
pub use registry::CaseRegistry;
pub use driver::{resolve_seed, BatchOutcome, DriverConfig, EventSimulator};
pub use publisher::{confirm_all, PublishHandle, PublishReport, Publisher, PublisherConfig};
pub use warehouse::{HistorySource, JsonlHistory, JsonlTable, MemoryHistory, MemoryTable, RecordSink};
pub use pipeline::{IngestionPipeline, PipelineStats};
pub use exporter::BatchExport;
pub use world::{RoundReport, SimConfig, SimWorld};
