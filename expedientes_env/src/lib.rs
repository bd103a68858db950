//! Environment abstraction layer for the case lifecycle pipeline.
//!
//! This crate provides the "Sans-IO" seams that let the generator, the
//! simulation driver and the ingestion job run both against real
//! infrastructure and inside a deterministic simulation.
//!
//! # Intercepted I/O
//!
//! - Time (`system_time()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - Message bus (`publish()`)
//!
//! # Example
//!
//! ```ignore
//! use expedientes_env::{BusMessage, EventBus, PipelineContext};
//!
//! async fn emit<Ctx: PipelineContext, Bus: EventBus>(ctx: &Ctx, bus: &Bus, payload: Vec<u8>) {
//!     let id = bus.publish(BusMessage::json(payload)).await?;
//!     tracing::info!(%id, at = %ctx.system_time(), "published");
//! }
//! ```

mod context;
mod bus;
mod types;
mod error;
mod tokio_impl;

pub use context::PipelineContext;
pub use bus::EventBus;
pub use types::{BusMessage, MessageId, JSON_CONTENT_TYPE};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
