use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;
use tracing::Level;

/// Error type used at the trait seams of this crate.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Asynchronous destination for [`LogRecord`]s produced by the logging layer.
///
/// Implementations are responsible for transporting records to a concrete
/// backend. The layer calls `send` from a background task and never awaits
/// it on the application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a single log record.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was handed off (indexed, spawned or
    ///   buffered, depending on the delivery strategy).
    /// - `Err(..)` if delivery failed. The layer counts and logs the
    ///   failure; records are never retried.
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError>;

    /// Flush any buffered records, if the sink implements buffering.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release resources once no more records will be sent.
    ///
    /// Called by the layer's background task after its channel closes.
    /// Default implementation is a no-op.
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Whether records at `level` should be forwarded to this sink at all.
    fn enabled(&self, _level: &Level) -> bool {
        true
    }
}
