use crate::bulk::{flush_fn, BulkWriter, ClosedWriterError, FlushError};
use crate::client::{ClientError, ElasticClient};
use crate::record::{IndexDocument, LogRecord};
use crate::registry::BulkRegistry;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{warn, Level};

/// Produces the index name for the next request. Called per document in
/// sync/async mode and per flush in bulk mode, so time-based names work.
pub type IndexNameFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Flush interval used by [`ElasticHook::new_bulk`].
pub const DEFAULT_BULK_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

const BULK_ACTION: &[u8] = b"{\"index\":{}}\n";

const ALL_LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];

/// How [`ElasticHook::fire`] delivers a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireMode {
    /// Index the document and wait for the response.
    Sync,
    /// Spawn the index request and return immediately.
    Async,
    /// Append to a [`BulkWriter`] flushed to `_bulk`.
    Bulk,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown delivery mode: {0}")]
pub struct ParseFireModeError(String);

impl FromStr for FireMode {
    type Err = ParseFireModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(FireMode::Sync),
            "async" => Ok(FireMode::Async),
            "bulk" => Ok(FireMode::Bulk),
            _ => Err(ParseFireModeError(s.to_string())),
        }
    }
}

/// Error type returned when building or firing an [`ElasticHook`].
#[derive(thiserror::Error, Debug)]
pub enum HookError {
    #[error("cannot create index {index}: {source}")]
    CannotCreateIndex {
        index: String,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Writer(#[from] ClosedWriterError),
}

enum Delivery {
    Sync,
    Async { in_flight: Mutex<JoinSet<()>> },
    Bulk { writer: Arc<BulkWriter>, owned: bool },
}

/// Forwards log records to a search index.
///
/// Construction makes sure the target index exists, creating it when
/// missing. Records are turned into [`IndexDocument`]s and delivered
/// according to the hook's [`FireMode`].
pub struct ElasticHook {
    client: ElasticClient,
    host: String,
    index: IndexNameFn,
    levels: Vec<Level>,
    delivery: Delivery,
}

fn fixed_index(name: impl Into<String>) -> IndexNameFn {
    let name = name.into();
    Arc::new(move || name.clone())
}

fn levels_up_to(threshold: Level) -> Vec<Level> {
    ALL_LEVELS.into_iter().filter(|level| *level <= threshold).collect()
}

impl ElasticHook {
    /// Synchronous hook writing into a fixed index.
    ///
    /// **Parameters**
    /// - `client`: transport to the cluster.
    /// - `host`: value of the `host` field of every document.
    /// - `level`: least severe level forwarded (e.g. `INFO` keeps
    ///   `ERROR`, `WARN` and `INFO`).
    /// - `index`: target index name.
    pub async fn new(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: impl Into<String>,
    ) -> Result<Self, HookError> {
        Self::with_index_fn(client, host, level, fixed_index(index)).await
    }

    /// Like [`ElasticHook::new`], but requests are spawned and not awaited.
    pub async fn new_async(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: impl Into<String>,
    ) -> Result<Self, HookError> {
        Self::async_with_index_fn(client, host, level, fixed_index(index)).await
    }

    /// Like [`ElasticHook::new`], but records are buffered and shipped
    /// through `_bulk` every [`DEFAULT_BULK_FLUSH_INTERVAL`].
    pub async fn new_bulk(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: impl Into<String>,
    ) -> Result<Self, HookError> {
        Self::bulk_with_index_fn(client, host, level, fixed_index(index), DEFAULT_BULK_FLUSH_INTERVAL).await
    }

    /// Synchronous hook whose index name is computed by `index`, which is
    /// useful for time-based indices.
    pub async fn with_index_fn(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: IndexNameFn,
    ) -> Result<Self, HookError> {
        Self::build(client, host.into(), level, index, |_, _| Delivery::Sync).await
    }

    pub async fn async_with_index_fn(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: IndexNameFn,
    ) -> Result<Self, HookError> {
        Self::build(client, host.into(), level, index, |_, _| Delivery::Async {
            in_flight: Mutex::default(),
        })
        .await
    }

    /// Bulk hook with a private writer. A zero `flush_interval` disables
    /// timed flushes; call [`ElasticHook::flush`] or [`ElasticHook::close`].
    pub async fn bulk_with_index_fn(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: IndexNameFn,
        flush_interval: Duration,
    ) -> Result<Self, HookError> {
        Self::build(client, host.into(), level, index, |client, index| Delivery::Bulk {
            writer: Arc::new(bulk_writer(client, index, flush_interval)),
            owned: true,
        })
        .await
    }

    /// Bulk hook sharing one writer per destination through `registry`.
    ///
    /// The destination is the cluster URL plus the index name at
    /// construction time. The first hook for a destination decides the
    /// writer's flush interval and index function. Closing the hook leaves
    /// the shared writer open; call [`BulkRegistry::close_all`] instead.
    pub async fn bulk_shared(
        client: ElasticClient,
        host: impl Into<String>,
        level: Level,
        index: IndexNameFn,
        flush_interval: Duration,
        registry: &BulkRegistry,
    ) -> Result<Self, HookError> {
        Self::build(client, host.into(), level, index, |client, index| {
            let destination = format!("{}/{}", client.base_url(), index());
            Delivery::Bulk {
                writer: registry.get_or_create(&destination, || bulk_writer(client, index, flush_interval)),
                owned: false,
            }
        })
        .await
    }

    async fn build(
        client: ElasticClient,
        host: String,
        level: Level,
        index: IndexNameFn,
        delivery: impl FnOnce(&ElasticClient, &IndexNameFn) -> Delivery,
    ) -> Result<Self, HookError> {
        ensure_index(&client, &index()).await?;
        let delivery = delivery(&client, &index);
        Ok(ElasticHook {
            client,
            host,
            index,
            levels: levels_up_to(level),
            delivery,
        })
    }

    /// Levels this hook accepts, most severe first.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn is_enabled(&self, level: &Level) -> bool {
        self.levels.contains(level)
    }

    pub fn mode(&self) -> FireMode {
        match self.delivery {
            Delivery::Sync => FireMode::Sync,
            Delivery::Async { .. } => FireMode::Async,
            Delivery::Bulk { .. } => FireMode::Bulk,
        }
    }

    /// Deliver `record` according to the hook's mode.
    pub async fn fire(&self, record: &LogRecord) -> Result<(), HookError> {
        let doc = IndexDocument::new(&self.host, record);
        match &self.delivery {
            Delivery::Sync => {
                let body = serde_json::to_vec(&doc).map_err(ClientError::from)?;
                self.client.index_document(&(self.index)(), body).await?;
            }
            Delivery::Async { in_flight } => {
                let body = serde_json::to_vec(&doc).map_err(ClientError::from)?;
                let client = self.client.clone();
                let index = (self.index)();
                let mut in_flight = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                // Reap finished requests so the set only holds pending ones.
                while in_flight.try_join_next().is_some() {}
                in_flight.spawn(async move {
                    if let Err(e) = client.index_document(&index, body).await {
                        warn!(index = %index, error = %e, "async index request failed");
                    }
                });
            }
            Delivery::Bulk { writer, .. } => {
                let mut line = BULK_ACTION.to_vec();
                serde_json::to_writer(&mut line, &doc).map_err(ClientError::from)?;
                line.push(b'\n');
                writer.write(&line).await?;
            }
        }
        Ok(())
    }

    /// Request a flush of buffered records. No-op outside bulk mode.
    pub async fn flush(&self) -> Result<(), HookError> {
        if let Delivery::Bulk { writer, .. } = &self.delivery {
            writer.flush().await?;
        }
        Ok(())
    }

    /// Wait for outstanding deliveries.
    ///
    /// Async hooks wait for every request spawned so far. Bulk hooks close a
    /// privately owned writer and wait for its final flush; shared writers
    /// are left open. No-op for sync hooks.
    pub async fn close(&self) -> Result<(), HookError> {
        match &self.delivery {
            Delivery::Async { in_flight } => {
                let mut pending = std::mem::take(&mut *in_flight.lock().unwrap_or_else(PoisonError::into_inner));
                while let Some(joined) = pending.join_next().await {
                    if let Err(e) = joined {
                        warn!(error = %e, "async index request task failed");
                    }
                }
            }
            Delivery::Bulk { writer, owned: true } => writer.close().await?,
            Delivery::Bulk { owned: false, .. } | Delivery::Sync => {}
        }
        Ok(())
    }
}

impl fmt::Debug for ElasticHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticHook")
            .field("base_url", &self.client.base_url())
            .field("host", &self.host)
            .field("levels", &self.levels)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

async fn ensure_index(client: &ElasticClient, index: &str) -> Result<(), HookError> {
    if client.index_exists(index).await? {
        return Ok(());
    }
    client
        .create_index(index)
        .await
        .map_err(|source| HookError::CannotCreateIndex {
            index: index.to_string(),
            source,
        })
}

fn bulk_writer(client: &ElasticClient, index: &IndexNameFn, flush_interval: Duration) -> BulkWriter {
    let client = client.clone();
    let index = Arc::clone(index);
    BulkWriter::with_error_handler(
        flush_interval,
        flush_fn(move |data: Vec<u8>| {
            let client = client.clone();
            let index = index();
            async move { client.bulk(&index, data).await.map_err(BoxError::from) }
        }),
        |data: &[u8], err: &FlushError| {
            warn!(bytes = data.len(), error = %err, "dropping log records after failed bulk request");
        },
    )
}

#[async_trait]
impl LogSink for ElasticHook {
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        Ok(self.fire(record).await?)
    }

    async fn flush(&self) -> Result<(), BoxError> {
        Ok(ElasticHook::flush(self).await?)
    }

    async fn close(&self) -> Result<(), BoxError> {
        Ok(ElasticHook::close(self).await?)
    }

    fn enabled(&self, level: &Level) -> bool {
        self.is_enabled(level)
    }
}
