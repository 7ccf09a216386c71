use crate::client::ElasticClient;
use crate::hook::{ElasticHook, FireMode, HookError};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::Level;

/// Everything needed to build an [`ElasticHook`], gathered from a DSN or
/// the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSettings {
    /// Base HTTP URL of the cluster.
    pub url: String,
    pub index: String,
    /// Value of the `host` field in every document.
    pub host: String,
    pub level: Level,
    pub mode: FireMode,
    /// Bulk mode only; zero disables timed flushes.
    pub flush_interval: Duration,
}

impl Default for HookSettings {
    fn default() -> Self {
        HookSettings {
            url: "http://127.0.0.1:9200".to_string(),
            index: "logs".to_string(),
            host: "localhost".to_string(),
            level: Level::INFO,
            mode: FireMode::Sync,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Error type returned when parsing a DSN or environment settings.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DsnError {
    #[error("DSN is missing a scheme")]
    MissingScheme,

    #[error("unknown or unsupported DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("DSN is missing a host")]
    MissingHost,

    #[error("unknown DSN parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Parse a DSN string into [`HookSettings`].
///
/// Examples:
/// - "elasticsearch://127.0.0.1:9200/logs"
/// - "opensearch://search:9200/app-logs?mode=bulk&flush_ms=500"
/// - "https://es.internal:9243/audit?level=warn&host=billing"
///
/// `elasticsearch`, `elastic`, `es` and `opensearch` schemes talk plain
/// HTTP; use `https://` for TLS. A missing index falls back to `logs`.
pub fn parse_dsn(dsn: &str) -> Result<HookSettings, DsnError> {
    let (scheme, rest) = dsn.split_once("://").ok_or(DsnError::MissingScheme)?;
    let http_scheme = match scheme.to_ascii_lowercase().as_str() {
        "elasticsearch" | "elastic" | "es" | "opensearch" | "http" => "http",
        "https" => "https",
        _ => return Err(DsnError::UnknownScheme(scheme.to_string())),
    };

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let (authority, path) = location.split_once('/').unwrap_or((location, ""));
    if authority.is_empty() {
        return Err(DsnError::MissingHost);
    }

    let mut settings = HookSettings {
        url: format!("{}://{}", http_scheme, authority),
        ..HookSettings::default()
    };
    if let Some(index) = path.split('/').find(|segment| !segment.is_empty()) {
        settings.index = index.to_string();
    }

    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value).map_err(|_| invalid(key, value))?;
        apply_param(&mut settings, key, &value)?;
    }

    Ok(settings)
}

fn invalid(key: &str, value: &str) -> DsnError {
    DsnError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Apply a single named setting. Shared by DSN query parameters and
/// environment variables.
pub(crate) fn apply_param(settings: &mut HookSettings, key: &str, value: &str) -> Result<(), DsnError> {
    match key {
        "index" if !value.is_empty() => settings.index = value.to_string(),
        "host" if !value.is_empty() => settings.host = value.to_string(),
        "level" => settings.level = Level::from_str(value).map_err(|_| invalid(key, value))?,
        "mode" => settings.mode = FireMode::from_str(value).map_err(|_| invalid(key, value))?,
        "flush_ms" => {
            let ms: u64 = value.parse().map_err(|_| invalid(key, value))?;
            settings.flush_interval = Duration::from_millis(ms);
        }
        "index" | "host" => return Err(invalid(key, value)),
        _ => return Err(DsnError::UnknownParameter(key.to_string())),
    }
    Ok(())
}

/// Build an [`ElasticHook`] from settings. Bulk hooks get a private writer.
pub async fn make_hook(settings: &HookSettings) -> Result<ElasticHook, HookError> {
    let client = ElasticClient::new(settings.url.clone());
    let index = settings.index.clone();
    let index_fn = std::sync::Arc::new(move || index.clone());
    let host = settings.host.clone();

    match settings.mode {
        FireMode::Sync => ElasticHook::with_index_fn(client, host, settings.level, index_fn).await,
        FireMode::Async => ElasticHook::async_with_index_fn(client, host, settings.level, index_fn).await,
        FireMode::Bulk => {
            ElasticHook::bulk_with_index_fn(client, host, settings.level, index_fn, settings.flush_interval).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_dsn_uses_defaults() {
        let settings = parse_dsn("elasticsearch://127.0.0.1:9200/app-logs").unwrap();
        assert_eq!(settings.url, "http://127.0.0.1:9200");
        assert_eq!(settings.index, "app-logs");
        assert_eq!(settings.mode, FireMode::Sync);
        assert_eq!(settings.level, Level::INFO);
        assert_eq!(settings.host, "localhost");
    }

    #[test]
    fn query_parameters_override_defaults() {
        let settings =
            parse_dsn("opensearch://search:9200/audit?mode=bulk&level=warn&host=billing%20api&flush_ms=250").unwrap();
        assert_eq!(settings.url, "http://search:9200");
        assert_eq!(settings.index, "audit");
        assert_eq!(settings.mode, FireMode::Bulk);
        assert_eq!(settings.level, Level::WARN);
        assert_eq!(settings.host, "billing api");
        assert_eq!(settings.flush_interval, Duration::from_millis(250));
    }

    #[test]
    fn https_scheme_is_kept_and_index_defaults() {
        let settings = parse_dsn("HTTPS://es.internal:9243").unwrap();
        assert_eq!(settings.url, "https://es.internal:9243");
        assert_eq!(settings.index, "logs");
    }

    #[test]
    fn rejects_bad_dsns() {
        assert_eq!(parse_dsn("127.0.0.1:9200/logs"), Err(DsnError::MissingScheme));
        assert_eq!(
            parse_dsn("kafka://broker/topic"),
            Err(DsnError::UnknownScheme("kafka".to_string()))
        );
        assert_eq!(parse_dsn("es:///logs"), Err(DsnError::MissingHost));
        assert_eq!(
            parse_dsn("es://h/logs?batch=10"),
            Err(DsnError::UnknownParameter("batch".to_string()))
        );
        assert!(matches!(
            parse_dsn("es://h/logs?mode=fast"),
            Err(DsnError::InvalidValue { key, .. }) if key == "mode"
        ));
        assert!(matches!(
            parse_dsn("es://h/logs?flush_ms=-1"),
            Err(DsnError::InvalidValue { key, .. }) if key == "flush_ms"
        ));
    }

    #[tokio::test]
    async fn make_hook_builds_requested_mode() {
        let mut server = mockito::Server::new_async().await;
        let _head = server.mock("HEAD", "/svc").with_status(200).create_async().await;

        let settings = HookSettings {
            url: server.url(),
            index: "svc".to_string(),
            mode: FireMode::Bulk,
            flush_interval: Duration::ZERO,
            level: Level::ERROR,
            ..HookSettings::default()
        };
        let hook = make_hook(&settings).await.unwrap();

        assert_eq!(hook.mode(), FireMode::Bulk);
        assert_eq!(hook.levels(), &[Level::ERROR]);
        hook.close().await.unwrap();
    }
}
