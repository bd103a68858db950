//! Streaming ingestion: bus messages in, staging rows out.
//!
//! Each payload is normalized, reported to the observer and, if kept,
//! appended to the sink. Nothing that happens to a single message stops the
//! stream: drops are counted by the observer, sink failures are logged and
//! counted here.

use expedientes_core::{IngestMetrics, IngestObserver, Normalizer, NormalizerConfig, NormalizeOutcome};
use expedientes_env::PipelineContext;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::BusSubscription;
use crate::warehouse::RecordSink;

/// Per-pipeline message counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub appended: u64,
    pub dropped: u64,
    pub append_failures: u64,
}

pub struct IngestionPipeline<S: RecordSink, C: PipelineContext> {
    context: Arc<C>,
    normalizer: Normalizer,
    sink: S,
    observer: Arc<dyn IngestObserver>,
    stats: PipelineStats,
}

impl<S: RecordSink, C: PipelineContext> IngestionPipeline<S, C> {
    /// Creates a pipeline reporting to a fresh [`IngestMetrics`].
    pub fn new(context: Arc<C>, sink: S) -> Self {
        Self {
            context,
            normalizer: Normalizer::default(),
            sink,
            observer: Arc::new(IngestMetrics::new()),
            stats: PipelineStats::default(),
        }
    }

    pub fn with_normalizer(mut self, config: NormalizerConfig) -> Self {
        self.normalizer = Normalizer::new(config);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Handles one raw payload. Returns true if a row was appended.
    pub fn process(&mut self, raw: &[u8]) -> bool {
        self.stats.received += 1;
        let outcome = self.normalizer.normalize(raw, self.context.system_time());
        self.observer.observe(&outcome);

        let NormalizeOutcome::Normalized { record, .. } = outcome else {
            self.stats.dropped += 1;
            return false;
        };

        match self.sink.append(&record) {
            Ok(()) => {
                self.stats.appended += 1;
                true
            }
            Err(e) => {
                self.stats.append_failures += 1;
                self.observer.on_append_failed(&record, &e.to_string());
                false
            }
        }
    }

    /// Processes a finite set of payloads, then flushes the sink.
    pub fn ingest_batch<I, B>(&mut self, payloads: I) -> PipelineStats
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for payload in payloads {
            self.process(payload.as_ref());
        }
        self.flush();
        self.stats
    }

    /// Processes whatever is already buffered on the subscription.
    pub fn drain(&mut self, subscription: &mut BusSubscription) -> PipelineStats {
        while let Some((id, message)) = subscription.try_recv() {
            debug!(%id, bytes = message.size(), "message received");
            self.process(&message.payload);
        }
        self.flush();
        self.stats
    }

    /// Processes messages until the subscription is closed and empty.
    pub async fn run(&mut self, subscription: &mut BusSubscription) -> PipelineStats {
        while let Some((id, message)) = subscription.recv().await {
            debug!(%id, bytes = message.size(), "message received");
            self.process(&message.payload);
        }
        self.flush();
        info!(
            received = self.stats.received,
            appended = self.stats.appended,
            dropped = self.stats.dropped,
            "ingestion stream closed"
        );
        self.stats
    }

    fn flush(&mut self) {
        if let Err(e) = self.sink.flush() {
            self.stats.append_failures += 1;
            warn!(error = %e, "flushing staging table failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelBus;
    use crate::context::SimContext;
    use crate::error::SimError;
    use crate::warehouse::MemoryTable;
    use chrono::{TimeZone, Utc};
    use expedientes_core::{NormalizedRecord, Stage};
    use expedientes_env::{BusMessage, EventBus};

    struct RejectAll;

    impl RecordSink for RejectAll {
        fn append(&mut self, _record: &NormalizedRecord) -> Result<(), SimError> {
            Err(SimError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
    }

    fn pipeline() -> (IngestionPipeline<MemoryTable, SimContext>, Arc<IngestMetrics>) {
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestionPipeline::new(SimContext::shared(1), MemoryTable::new())
            .with_observer(Arc::clone(&metrics) as Arc<dyn IngestObserver>);
        (pipeline, metrics)
    }

    #[test]
    fn test_batch_keeps_valid_and_counts_drops() {
        let (mut pipeline, metrics) = pipeline();
        let stats = pipeline.ingest_batch([
            r#"{"Ref":"abc","Cuantia":[{"importe":"x"}],"Estado":[{"estado":"Vista","timestamp":"2024-01-05T10:00:00Z"}]}"#,
            r#"{"Cuantia":[]}"#,
            "[1,2,3]",
            r#"{"Ref":"def"}"#,
        ]);

        assert_eq!(stats, PipelineStats { received: 4, appended: 2, dropped: 2, append_failures: 0 });

        let rows = pipeline.sink().rows();
        assert_eq!(rows[0].case_ref.as_str(), "abc");
        assert!(rows[0].amounts.is_empty());
        assert_eq!(rows[0].stages[0].estado, Stage::Vista);
        assert_eq!(rows[0].ingestion_timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(rows[1].is_empty());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.amounts_discarded, 1);
        assert_eq!(snapshot.dropped_missing_ref, 1);
        assert_eq!(snapshot.dropped_not_an_object, 1);
        assert_eq!(snapshot.empty_records, 1);
    }

    #[test]
    fn test_sink_failure_does_not_stop_stream() {
        let metrics = Arc::new(IngestMetrics::new());
        let mut pipeline = IngestionPipeline::new(SimContext::shared(1), RejectAll)
            .with_observer(Arc::clone(&metrics) as Arc<dyn IngestObserver>);

        let stats = pipeline.ingest_batch([r#"{"Ref":"a"}"#, r#"{"Ref":"b"}"#]);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.appended, 0);
        assert_eq!(stats.append_failures, 2);
        assert_eq!(metrics.snapshot().append_failures, 2);
    }

    #[tokio::test]
    async fn test_run_until_closed() {
        let (bus, mut sub) = ChannelBus::new("t", 8, 0);
        bus.publish(BusMessage::json(br#"{"Ref":"one"}"#.to_vec())).await.unwrap();
        bus.publish(BusMessage::json(b"\xff\xfe".to_vec())).await.unwrap();
        sub.close();

        let (mut pipeline, metrics) = pipeline();
        let stats = pipeline.run(&mut sub).await;
        assert_eq!(stats.received, 2);
        assert_eq!(stats.appended, 1);
        assert_eq!(metrics.snapshot().dropped_invalid_utf8, 1);
    }

    #[tokio::test]
    async fn test_drain_takes_only_buffered() {
        let (bus, mut sub) = ChannelBus::new("t", 8, 0);
        bus.publish(BusMessage::json(br#"{"Ref":"one"}"#.to_vec())).await.unwrap();

        let (mut pipeline, _) = pipeline();
        assert_eq!(pipeline.drain(&mut sub).appended, 1);
        assert_eq!(pipeline.drain(&mut sub).received, 1);
        assert_eq!(pipeline.into_sink().rows().len(), 1);
    }
}
