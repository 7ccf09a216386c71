use std::sync::Arc;

use tracing::{error, info};
use tracing_elastic_sink::{
    dsn::{make_hook, parse_dsn},
    env::{env_or, ELASTIC_SINK_DSN_ENV},
    init::{init_tracing_with_config, LayerConfig},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example DSN: elasticsearch://localhost:9200/logs?mode=async&level=warn
    let dsn = env_or(ELASTIC_SINK_DSN_ENV, "elasticsearch://localhost:9200/logs?mode=bulk&flush_ms=500");

    let settings = parse_dsn(&dsn)?;
    let hook = Arc::new(make_hook(&settings).await?);

    init_tracing_with_config(
        hook.clone(),
        LayerConfig {
            enable_stdout: false,
            ..LayerConfig::default()
        },
    )?;

    info!("dsn example started");
    error!(index = %settings.index, "simulated error sent via {:?} delivery", settings.mode);

    hook.flush().await?;
    hook.close().await?;
    Ok(())
}
