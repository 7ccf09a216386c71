use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Normalized log event captured from `tracing`.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub message: Option<String>,
}

impl LogRecord {
    /// Build a record stamped with the current time and no source location.
    pub fn new(level: impl Into<String>, target: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level: level.into(),
            target: target.into(),
            module_path: None,
            file: None,
            line: None,
            fields: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// JSON document stored in the search index for every record.
#[derive(Debug, Serialize)]
pub struct IndexDocument<'a> {
    pub host: &'a str,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub message: &'a str,
    pub data: &'a BTreeMap<String, serde_json::Value>,
    pub level: String,
    pub target: &'a str,
}

impl<'a> IndexDocument<'a> {
    pub fn new(host: &'a str, record: &'a LogRecord) -> Self {
        IndexDocument {
            host,
            timestamp: record.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            message: record.message.as_deref().unwrap_or_default(),
            data: &record.fields,
            level: record.level.to_ascii_uppercase(),
            target: &record.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn document_uses_utc_timestamp_and_upper_level() {
        let mut record = LogRecord::new("warn", "app::db", "slow query").with_field("ms", 1200);
        record.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();

        let doc = serde_json::to_value(IndexDocument::new("api-1", &record)).unwrap();

        assert_eq!(doc["host"], "api-1");
        assert_eq!(doc["@timestamp"], "2024-03-01T12:30:05Z");
        assert_eq!(doc["message"], "slow query");
        assert_eq!(doc["level"], "WARN");
        assert_eq!(doc["target"], "app::db");
        assert_eq!(doc["data"]["ms"], 1200);
    }

    #[test]
    fn missing_message_serializes_as_empty_string() {
        let mut record = LogRecord::new("ERROR", "app", "");
        record.message = None;

        let doc = serde_json::to_value(IndexDocument::new("h", &record)).unwrap();
        assert_eq!(doc["message"], "");
        assert!(doc["data"].as_object().unwrap().is_empty());
    }
}
