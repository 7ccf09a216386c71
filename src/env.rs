//! Environment variable names used by this crate for convenient
//! configuration of hooks from services.
//!
//! These are purely helpers; the hook and writer types remain decoupled
//! from environment access.

use crate::dsn::{apply_param, parse_dsn, DsnError, HookSettings};

/// Full DSN, e.g. `elasticsearch://127.0.0.1:9200/logs?mode=bulk`. When set,
/// the individual variables below are ignored.
pub const ELASTIC_SINK_DSN_ENV: &str = "ELASTIC_SINK_DSN";

/// Base HTTP URL, e.g. `http://127.0.0.1:9200`.
pub const ELASTIC_SINK_URL_ENV: &str = "ELASTIC_SINK_URL";

/// Target index name.
pub const ELASTIC_SINK_INDEX_ENV: &str = "ELASTIC_SINK_INDEX";

/// Value of the `host` field in every document.
pub const ELASTIC_SINK_HOST_ENV: &str = "ELASTIC_SINK_HOST";

/// Least severe level forwarded (`error`, `warn`, `info`, `debug`, `trace`).
pub const ELASTIC_SINK_LEVEL_ENV: &str = "ELASTIC_SINK_LEVEL";

/// Delivery mode: `sync`, `async` or `bulk`.
pub const ELASTIC_SINK_MODE_ENV: &str = "ELASTIC_SINK_MODE";

/// Bulk flush interval in milliseconds; `0` disables timed flushes.
pub const ELASTIC_SINK_FLUSH_INTERVAL_MS_ENV: &str = "ELASTIC_SINK_FLUSH_INTERVAL_MS";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl HookSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, DsnError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DsnError> {
        if let Some(dsn) = lookup(ELASTIC_SINK_DSN_ENV) {
            return parse_dsn(&dsn);
        }

        let mut settings = HookSettings::default();
        if let Some(url) = lookup(ELASTIC_SINK_URL_ENV) {
            settings.url = url.trim_end_matches('/').to_string();
        }
        for (var, key) in [
            (ELASTIC_SINK_INDEX_ENV, "index"),
            (ELASTIC_SINK_HOST_ENV, "host"),
            (ELASTIC_SINK_LEVEL_ENV, "level"),
            (ELASTIC_SINK_MODE_ENV, "mode"),
            (ELASTIC_SINK_FLUSH_INTERVAL_MS_ENV, "flush_ms"),
        ] {
            if let Some(value) = lookup(var) {
                apply_param(&mut settings, key, &value)?;
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::FireMode;
    use std::collections::HashMap;
    use tokio::time::Duration;
    use tracing::Level;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn individual_variables() {
        let settings = HookSettings::from_lookup(lookup(&[
            (ELASTIC_SINK_URL_ENV, "http://es:9200/"),
            (ELASTIC_SINK_INDEX_ENV, "orders"),
            (ELASTIC_SINK_MODE_ENV, "async"),
            (ELASTIC_SINK_LEVEL_ENV, "debug"),
            (ELASTIC_SINK_FLUSH_INTERVAL_MS_ENV, "0"),
        ]))
        .unwrap();

        assert_eq!(settings.url, "http://es:9200");
        assert_eq!(settings.index, "orders");
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.mode, FireMode::Async);
        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.flush_interval, Duration::ZERO);
    }

    #[test]
    fn dsn_takes_precedence() {
        let settings = HookSettings::from_lookup(lookup(&[
            (ELASTIC_SINK_DSN_ENV, "es://search:9200/app?mode=bulk"),
            (ELASTIC_SINK_INDEX_ENV, "ignored"),
        ]))
        .unwrap();

        assert_eq!(settings.url, "http://search:9200");
        assert_eq!(settings.index, "app");
        assert_eq!(settings.mode, FireMode::Bulk);
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(HookSettings::from_lookup(|_| None).unwrap(), HookSettings::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = HookSettings::from_lookup(lookup(&[(ELASTIC_SINK_LEVEL_ENV, "loud")])).unwrap_err();
        assert!(matches!(err, DsnError::InvalidValue { key, .. } if key == "level"));
    }
}
