use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn, Level};

use tracing_elastic_sink::init::init_tracing;
use tracing_elastic_sink::{ElasticClient, ElasticHook, IndexNameFn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = ElasticClient::new("http://127.0.0.1:9200");

    // One index per day, resolved again on every bulk flush.
    let index: IndexNameFn = Arc::new(|| format!("app-logs-{}", Utc::now().format("%Y.%m.%d")));
    let hook = Arc::new(
        ElasticHook::bulk_with_index_fn(client, "checkout-1", Level::INFO, index, Duration::from_secs(1)).await?,
    );
    init_tracing(hook.clone())?;

    info!("starting service");
    for order in 0..10 {
        warn!(order, "payment provider slow");
    }
    error!(order = 11, reason = "card expired", "checkout failed");

    sleep(Duration::from_secs(2)).await;

    // The global subscriber is never dropped, so close explicitly.
    hook.close().await?;
    Ok(())
}
