//! Buffered writer that coalesces many small writes into periodic or
//! manually triggered flushes.
//!
//! A single coordinator task owns the byte buffer and serializes appends,
//! manual flushes, timer ticks and shutdown. Callers talk to it through a
//! single-slot command channel and wait for an acknowledgement, so `write`
//! returns once the payload has been appended (not once it is flushed).
//! At most one flush runs at any time.

use crate::sink::BoxError;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error};

/// Receives the accumulated buffer on every flush.
///
/// The buffer is cleared by the writer after this returns, whatever the
/// outcome. An `Err` is handed to the writer's [`ErrorHandler`]; the data is
/// not retried.
#[async_trait]
pub trait FlushHandler: Send + Sync + 'static {
    async fn flush(&self, data: &[u8]) -> Result<(), BoxError>;
}

/// Adapter turning an async closure into a [`FlushHandler`]. See [`flush_fn`].
pub struct FlushFn<F>(F);

/// Wrap `f` so it can be used as a [`FlushHandler`]. The closure receives an
/// owned copy of the buffer.
pub fn flush_fn<F, Fut>(f: F) -> FlushFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FlushFn(f)
}

#[async_trait]
impl<F, Fut> FlushHandler for FlushFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn flush(&self, data: &[u8]) -> Result<(), BoxError> {
        (self.0)(data.to_vec()).await
    }
}

/// Observes failed flushes. Called with the buffer that could not be
/// flushed and the wrapped error; it cannot stop the writer.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, data: &[u8], err: &FlushError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&[u8], &FlushError) + Send + Sync + 'static,
{
    fn handle(&self, data: &[u8], err: &FlushError) {
        self(data, err)
    }
}

/// Discards flush errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoErrorHandler;

impl ErrorHandler for NoErrorHandler {
    fn handle(&self, _data: &[u8], _err: &FlushError) {}
}

/// Error returned by a [`FlushHandler`], as seen by the [`ErrorHandler`].
#[derive(thiserror::Error, Debug)]
#[error("bulk flush failed: {source}")]
pub struct FlushError {
    #[source]
    source: BoxError,
}

impl FlushError {
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.source
    }
}

/// Operation attempted on a writer that has already been closed.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedWriterError {
    #[error("writing on a closed bulk writer")]
    Write,
    #[error("flushing a closed bulk writer")]
    Flush,
    #[error("closing a closed bulk writer")]
    Close,
}

enum Command {
    Append(Vec<u8>, oneshot::Sender<()>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to a buffered bulk writer.
///
/// Must be created inside a Tokio runtime. Dropping the last handle without
/// calling [`close`](BulkWriter::close) still flushes whatever is buffered,
/// but nobody waits for it.
pub struct BulkWriter {
    commands: mpsc::Sender<Command>,
    closed: AtomicBool,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl BulkWriter {
    /// Create a writer whose flush errors are discarded.
    ///
    /// A zero `flush_interval` disables automatic flushing: data is only
    /// flushed by [`flush`](BulkWriter::flush) and [`close`](BulkWriter::close).
    pub fn new(flush_interval: Duration, flusher: impl FlushHandler) -> Self {
        Self::with_error_handler(flush_interval, flusher, NoErrorHandler)
    }

    /// Create a writer that reports failed flushes to `error_handler`.
    pub fn with_error_handler(
        flush_interval: Duration,
        flusher: impl FlushHandler,
        error_handler: impl ErrorHandler,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let coordinator = Coordinator {
            buf: Vec::new(),
            flusher: Box::new(flusher),
            error_handler: Box::new(error_handler),
        };
        let handle = tokio::spawn(coordinator.run(rx, flush_interval));

        BulkWriter {
            commands: tx,
            closed: AtomicBool::new(false),
            coordinator: Mutex::new(Some(handle)),
        }
    }

    /// Append `data` to the buffer.
    ///
    /// Waits until the coordinator has taken the payload, which may mean
    /// waiting for an in-progress flush. Returns `data.len()`.
    pub async fn write(&self, data: &[u8]) -> Result<usize, ClosedWriterError> {
        if self.is_closed() {
            return Err(ClosedWriterError::Write);
        }
        let (accepted, ack) = oneshot::channel();
        self.commands
            .send(Command::Append(data.to_vec(), accepted))
            .await
            .map_err(|_| ClosedWriterError::Write)?;
        // A dropped acknowledgement means shutdown won the race.
        ack.await.map_err(|_| ClosedWriterError::Write)?;
        Ok(data.len())
    }

    /// Request an immediate flush of everything written so far.
    ///
    /// Returns once the request is accepted; the flush itself runs on the
    /// coordinator. An empty buffer is not flushed.
    pub async fn flush(&self) -> Result<(), ClosedWriterError> {
        if self.is_closed() {
            return Err(ClosedWriterError::Flush);
        }
        let (accepted, ack) = oneshot::channel();
        self.commands
            .send(Command::Flush(accepted))
            .await
            .map_err(|_| ClosedWriterError::Flush)?;
        ack.await.map_err(|_| ClosedWriterError::Flush)
    }

    /// Close the writer, flushing any buffered data.
    ///
    /// Later calls to `write`, `flush` and `close` fail with
    /// [`ClosedWriterError`]. Waits until the final flush has completed and
    /// the coordinator has stopped.
    pub async fn close(&self) -> Result<(), ClosedWriterError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ClosedWriterError::Close);
        }
        // Fails only if the coordinator already died; the join below reports it.
        let _ = self.commands.send(Command::Shutdown).await;

        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                error!(error = %e, "bulk writer coordinator terminated abnormally");
            }
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for BulkWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkWriter")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct Coordinator {
    buf: Vec<u8>,
    flusher: Box<dyn FlushHandler>,
    error_handler: Box<dyn ErrorHandler>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, flush_interval: Duration) {
        let mut ticker = (!flush_interval.is_zero()).then(|| {
            let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Append(data, accepted)) => {
                        self.buf.extend_from_slice(&data);
                        let _ = accepted.send(());
                    }
                    Some(Command::Flush(accepted)) => {
                        let _ = accepted.send(());
                        self.flush().await;
                    }
                    Some(Command::Shutdown) | None => {
                        commands.close();
                        self.flush().await;
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => self.flush().await,
            }
        }
        debug!("bulk writer coordinator stopped");
    }

    async fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        debug!(bytes = self.buf.len(), "flushing bulk buffer");
        if let Err(source) = self.flusher.flush(&self.buf).await {
            let err = FlushError { source };
            debug!(bytes = self.buf.len(), error = %err, "bulk flush failed, dropping buffer");
            self.error_handler.handle(&self.buf, &err);
        }
        self.buf.clear();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
