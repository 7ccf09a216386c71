use crate::layer::ElasticLayer;
use crate::sink::LogSink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Logging layer configuration.
///
/// **Fields**
/// - `channel_buffer`: maximum number of [`LogRecord`](crate::record::LogRecord)s
///   queued before new ones are dropped.
/// - `level`: least severe level the layer forwards. The sink may narrow
///   it further (an [`ElasticHook`](crate::hook::ElasticHook) applies its
///   own level set).
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   stacked on top so events are also printed to the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            level: Level::TRACE,
            enable_stdout: true,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to install global subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install a global `tracing` subscriber forwarding events to `sink`.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`ElasticLayer`] (and optionally
/// the `fmt` layer) as the global default subscriber. Must be called
/// inside a Tokio runtime. Because the global subscriber is never dropped,
/// applications should call the sink's `flush`/`close` themselves before
/// exiting.
///
/// **Returns**
/// - The handle of the layer's background task.
pub fn init_tracing_with_config(
    sink: Arc<dyn LogSink>,
    config: LayerConfig,
) -> Result<JoinHandle<()>, InitError> {
    let (layer, handle) = ElasticLayer::new(sink, config.channel_buffer, config.level);

    let fmt_layer = config.enable_stdout.then(tracing_subscriber::fmt::layer);
    let subscriber = Registry::default().with(layer).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(handle)
}

/// Initialize tracing with [`LayerConfig::default`].
pub fn init_tracing(sink: Arc<dyn LogSink>) -> Result<JoinHandle<()>, InitError> {
    init_tracing_with_config(sink, LayerConfig::default())
}
