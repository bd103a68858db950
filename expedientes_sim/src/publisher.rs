//! Asynchronous event publishing.
//!
//! `dispatch` serializes an event and hands it to a task spawned through the
//! context, so the driver never waits on the bus. The returned
//! [`PublishHandle`] can be confirmed, cancelled, or simply dropped
//! (fire-and-forget).

use expedientes_core::{CaseRef, LifecycleEvent};
use expedientes_env::{BusMessage, EnvError, EventBus, MessageId, PipelineContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::SimError;

/// Message attribute carrying the case reference.
pub const REF_ATTRIBUTE: &str = "Ref";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Total tries per message, including the first
    pub max_attempts: u32,

    /// Base delay between tries; grows linearly with the attempt number
    pub retry_backoff: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl PublisherConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }
}

pub struct Publisher<C: PipelineContext> {
    context: Arc<C>,
    bus: Arc<dyn EventBus>,
    config: PublisherConfig,
}

impl<C: PipelineContext> Clone for Publisher<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            bus: Arc::clone(&self.bus),
            config: self.config.clone(),
        }
    }
}

impl<C: PipelineContext> Publisher<C> {
    pub fn new(context: Arc<C>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            context,
            bus,
            config: PublisherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn topic(&self) -> &str {
        self.bus.topic()
    }

    /// Serializes `event` and publishes it on a background task.
    ///
    /// Must be called from within a tokio runtime. Retry backoff sleeps on
    /// the context clock.
    pub fn dispatch(&self, event: &LifecycleEvent) -> Result<PublishHandle, SimError> {
        Handle::try_current().map_err(|_| SimError::NoRuntime)?;
        let message = BusMessage::json(event.to_payload()?)
            .with_attribute(REF_ATTRIBUTE, event.case_ref.as_str());

        let (result_tx, result_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let context = Arc::clone(&self.context);
        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();

        self.context.spawn("publish", async move {
            // A dropped handle closes `cancel_rx` without cancelling
            let result = tokio::select! {
                result = publish_with_retry(context.as_ref(), bus.as_ref(), message, &config) => result,
                Ok(()) = cancel_rx => Err(EnvError::Cancelled),
            };
            let _ = result_tx.send(result);
        });

        Ok(PublishHandle {
            case_ref: event.case_ref.clone(),
            result: result_rx,
            cancel: Some(cancel_tx),
        })
    }
}

async fn publish_with_retry<C: PipelineContext>(
    context: &C,
    bus: &dyn EventBus,
    message: BusMessage,
    config: &PublisherConfig,
) -> Result<MessageId, EnvError> {
    let mut attempt = 1;
    loop {
        match bus.publish(message.clone()).await {
            Ok(id) => {
                debug!(topic = bus.topic(), %id, attempt, "event published");
                return Ok(id);
            }
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                warn!(topic = bus.topic(), attempt, error = %e, "publish failed, retrying");
                context.sleep(config.retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(topic = bus.topic(), attempt, error = %e, "publish abandoned");
                return Err(e);
            }
        }
    }
}

/// Delivery handle for one dispatched event.
pub struct PublishHandle {
    case_ref: CaseRef,
    result: oneshot::Receiver<Result<MessageId, EnvError>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl PublishHandle {
    pub fn case_ref(&self) -> &CaseRef {
        &self.case_ref
    }

    /// Aborts the publish if it has not completed yet.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Waits for the bus to accept the message.
    pub async fn confirm(self) -> Result<MessageId, EnvError> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(EnvError::bus("publish task ended without a result")),
        }
    }
}

/// Outcome of confirming a set of handles.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: Vec<(CaseRef, MessageId)>,
    pub failed: Vec<(CaseRef, EnvError)>,
}

impl PublishReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Confirms every handle, in order.
pub async fn confirm_all(handles: Vec<PublishHandle>) -> PublishReport {
    let mut report = PublishReport::default();
    for handle in handles {
        let case_ref = handle.case_ref.clone();
        match handle.confirm().await {
            Ok(id) => report.delivered.push((case_ref, id)),
            Err(e) => report.failed.push((case_ref, e)),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelBus;
    use crate::context::SimContext;
    use chrono::{TimeZone, Utc};
    use expedientes_core::{Stage, StageEntry};

    fn event(id: &str) -> LifecycleEvent {
        LifecycleEvent {
            case_ref: CaseRef::new(id).unwrap(),
            amounts: vec![],
            stages: vec![StageEntry {
                estado: Stage::Demanda,
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            }],
        }
    }

    fn fast() -> PublisherConfig {
        PublisherConfig::default().with_retry_backoff(Duration::from_millis(1))
    }

    fn sim_publisher(bus: ChannelBus) -> Publisher<SimContext> {
        Publisher::new(SimContext::shared(1), Arc::new(bus)).with_config(fast())
    }

    #[tokio::test]
    async fn test_dispatch_and_confirm() {
        let (bus, mut sub) = ChannelBus::new("expedientes", 8, 5);
        let publisher = sim_publisher(bus);

        let handle = publisher.dispatch(&event("EXP-1")).unwrap();
        assert_eq!(handle.case_ref().as_str(), "EXP-1");
        let id = handle.confirm().await.unwrap();

        let (received, message) = sub.recv().await.unwrap();
        assert_eq!(received, id);
        assert_eq!(message.attributes.get(REF_ATTRIBUTE).map(String::as_str), Some("EXP-1"));

        let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(payload["Ref"], "EXP-1");
        assert_eq!(payload["Estado"][0]["estado"], "Demanda");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (bus, mut sub) = ChannelBus::new("t", 8, 0);
        bus.fail_next(2);
        let context = SimContext::shared(1);
        let publisher = Publisher::new(Arc::clone(&context), Arc::new(bus)).with_config(fast());

        let handle = publisher.dispatch(&event("EXP-2")).unwrap();
        assert!(handle.confirm().await.is_ok());
        assert!(sub.try_recv().is_some());

        // Backoff of 1ms then 2ms, slept on the virtual clock
        assert_eq!(context.elapsed(), Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (bus, _sub) = ChannelBus::new("t", 8, 0);
        bus.fail_next(5);
        let publisher = Publisher::new(SimContext::shared(1), Arc::new(bus)).with_config(fast().with_max_attempts(2));

        let err = publisher.dispatch(&event("EXP-3")).unwrap().confirm().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_closed_topic_is_not_retried() {
        let (bus, mut sub) = ChannelBus::new("t", 8, 0);
        sub.close();
        let publisher = sim_publisher(bus);

        let report = confirm_all(vec![
            publisher.dispatch(&event("EXP-4")).unwrap(),
            publisher.dispatch(&event("EXP-5")).unwrap(),
        ])
        .await;
        assert!(!report.all_delivered());
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(report.failed[0].1, EnvError::BusClosed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_handle() {
        // Capacity 1 and nobody reading: the second publish waits forever
        let (bus, _sub) = ChannelBus::new("t", 1, 0);
        let publisher = sim_publisher(bus);

        publisher.dispatch(&event("EXP-6")).unwrap().confirm().await.unwrap();
        let mut blocked = publisher.dispatch(&event("EXP-7")).unwrap();
        blocked.cancel();
        assert!(matches!(blocked.confirm().await, Err(EnvError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_handle_still_publishes() {
        let (bus, mut sub) = ChannelBus::new("t", 4, 0);
        let publisher = sim_publisher(bus);

        drop(publisher.dispatch(&event("EXP-9")).unwrap());
        let (_, message) = sub.recv().await.unwrap();
        assert_eq!(message.attributes.get(REF_ATTRIBUTE).map(String::as_str), Some("EXP-9"));
    }

    #[test]
    fn test_dispatch_outside_runtime() {
        let (bus, _sub) = ChannelBus::new("t", 1, 0);
        let publisher = Publisher::new(SimContext::shared(1), Arc::new(bus));
        assert!(matches!(publisher.dispatch(&event("EXP-8")), Err(SimError::NoRuntime)));
    }
}
