use crate::record::LogRecord;
use crate::sink::LogSink;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never forwarded, so the crate's own
/// diagnostics cannot loop back into the sink.
const SELF_TARGET: &str = "tracing_elastic_sink";

/// `tracing_subscriber` layer that observes events and forwards them to
/// an asynchronous [`LogSink`] via a bounded channel and background task.
///
/// An event is forwarded when its level is at or above `level` in
/// severity and the sink reports it as enabled. Network I/O is fully
/// decoupled from application threads; when the channel is full the event
/// is dropped and counted.
pub struct ElasticLayer {
    sender: mpsc::Sender<LogRecord>,
    sink: Arc<dyn LogSink>,
    level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
    /// Rejected by the sink.
    pub failed_events: Arc<AtomicU64>,
}

impl ElasticLayer {
    /// Create a new layer and spawn a background task that pulls
    /// [`LogRecord`]s from a bounded channel and sends them to `sink`.
    ///
    /// Once every handle to the layer is dropped the task drains the
    /// channel, closes the sink and exits; the returned handle resolves at
    /// that point.
    pub fn new(sink: Arc<dyn LogSink>, buffer: usize, level: Level) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let failed_events = Arc::new(AtomicU64::new(0));
        let failed_events_bg = Arc::clone(&failed_events);
        let sink_bg = Arc::clone(&sink);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink_bg.send(&record).await {
                    failed_events_bg.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "log sink send failed");
                }
            }
            if let Err(e) = sink_bg.close().await {
                warn!(error = %e, "log sink close failed");
            }
        });

        (
            Self {
                sender: tx,
                sink,
                level,
                total_events: Arc::new(AtomicU64::new(0)),
                enqueued_events: Arc::new(AtomicU64::new(0)),
                dropped_events: Arc::new(AtomicU64::new(0)),
                failed_events,
            },
            handle,
        )
    }
}

impl<S> Layer<S> for ElasticLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(SELF_TARGET) {
            return;
        }
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if *meta.level() > self.level || !self.sink.enabled(meta.level()) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            fields,
            message,
        };

        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Splits an event into its `message` and the remaining fields of the
/// indexed document's `data` object.
pub(crate) struct FieldVisitor<'a> {
    pub(crate) fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub(crate) message: &'a mut Option<String>,
}

impl FieldVisitor<'_> {
    fn insert(&mut self, field: &Field, value: impl Into<serde_json::Value>) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn text(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            *self.message = Some(value);
        } else {
            self.insert(field, value);
        }
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, value.to_string());
    }

    // format_args!-style messages arrive here as `message`.
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.text(field, format!("{:?}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<LogRecord>>,
        closed: AtomicBool,
        fail: bool,
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
            if self.fail {
                return Err("sink down".into());
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn close(&self) -> Result<(), BoxError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn enabled(&self, level: &Level) -> bool {
            *level != Level::WARN
        }
    }

    #[tokio::test]
    async fn forwards_events_at_or_above_level() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, handle) = ElasticLayer::new(sink.clone(), 64, Level::INFO);
        let total = Arc::clone(&layer.total_events);
        let enqueued = Arc::clone(&layer.enqueued_events);

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::error!(target: "app", order_id = 42, retry = false, "payment failed: {}", "card expired");
            tracing::warn!(target: "app", "filtered by the sink");
            tracing::info!(target: "app", latency_ms = 12.5, "request served");
            tracing::debug!(target: "app", "below threshold");
        });
        handle.await.unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, "ERROR");
        assert_eq!(records[0].message.as_deref(), Some("payment failed: card expired"));
        assert_eq!(records[0].fields["order_id"], 42);
        assert_eq!(records[0].fields["retry"], false);
        assert_eq!(records[1].fields["latency_ms"], 12.5);
        assert!(records[1].line.is_some());
        assert_eq!(total.load(Ordering::Relaxed), 4);
        assert_eq!(enqueued.load(Ordering::Relaxed), 2);
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn ignores_events_from_this_crate() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, handle) = ElasticLayer::new(sink.clone(), 64, Level::TRACE);
        let total = Arc::clone(&layer.total_events);

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::error!(target: "tracing_elastic_sink::bulk", "internal diagnostic");
            tracing::error!(target: "app", "user event");
        });
        handle.await.unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "app");
        assert_eq!(total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn counts_sink_failures() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let (layer, handle) = ElasticLayer::new(sink.clone(), 64, Level::ERROR);
        let failed = Arc::clone(&layer.failed_events);

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::error!(target: "app", "one");
            tracing::error!(target: "app", "two");
        });
        handle.await.unwrap();

        assert_eq!(failed.load(Ordering::Relaxed), 2);
        assert!(sink.closed.load(Ordering::SeqCst));
    }
}
