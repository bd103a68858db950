//! Message bus abstraction between the event generator and the ingestion job.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{BusMessage, MessageId};

/// Abstraction for publishing lifecycle events to a topic.
///
/// # Implementations
///
/// - **Production**: a managed pub/sub topic client
/// - **Simulation**: `ChannelBus`, an in-process tokio channel
///
/// # Message Flow
///
/// ```text
/// Simulator                  Bus                     Ingestion
///   |                         |                          |
///   |-- publish(message) ---->|                          |
///   |<-- MessageId -----------|                          |
///   |                         |-- message -------------->|
///   |                         |                          |-- normalize()
/// ```
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Publishes a message to the topic.
    ///
    /// # Returns
    /// * `Ok(MessageId)` - The bus accepted the message
    /// * `Err(EnvError::BusError)` - Transient failure, may be retried
    /// * `Err(EnvError::BusClosed)` - The topic is gone, retrying is pointless
    ///
    /// # Note
    /// Acceptance does not guarantee delivery to every subscriber.
    async fn publish(&self, message: BusMessage) -> Result<MessageId, EnvError>;

    /// Returns the topic name.
    fn topic(&self) -> &str;
}
