//! Log record normalization -- raw JSON in, canonical `LogRecord` out.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MalformedRecord {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("unparseable timestamp '{0}'")]
    BadTimestamp(String),
    #[error("unknown log level '{0}'")]
    BadLevel(String),
    #[error("response_time_ms must be a non-negative number, got {0}")]
    BadResponseTime(f64),
}

/// Ordered log severity levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" | "FATAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Synthetic ground-truth labels, present only on labeled input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub is_anomaly: bool,
    pub anomaly_type: String,
    pub score: f64,
}

/// Canonical log record. Immutable after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub source: String,
    pub level: LogLevel,
    pub message: String,
    pub response_time_ms: Option<f64>,
    pub ground_truth: Option<GroundTruth>,
}

impl LogRecord {
    /// ERROR and CRITICAL records count toward error statistics.
    pub fn is_error(&self) -> bool {
        self.level >= LogLevel::Error
    }
}

/// Parse an ISO-8601 timestamp. Timezone-naive inputs are treated as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn str_field<'a>(raw: &'a Value, key: &'static str) -> Result<&'a str, MalformedRecord> {
    raw.get(key)
        .and_then(Value::as_str)
        .ok_or(MalformedRecord::MissingField(key))
}

/// Normalize one raw structured message into a `LogRecord`.
///
/// Pure function: no side effects, the caller decides drop-and-count vs.
/// propagate. Ground-truth labels are read from the optional `_labels`
/// object emitted by the synthetic log generator.
pub fn normalize(raw: &Value) -> Result<LogRecord, MalformedRecord> {
    if !raw.is_object() {
        return Err(MalformedRecord::NotAnObject);
    }

    let ts_str = str_field(raw, "timestamp")?;
    let timestamp = parse_timestamp(ts_str)
        .ok_or_else(|| MalformedRecord::BadTimestamp(ts_str.to_string()))?;

    let level_str = str_field(raw, "level")?;
    let level = LogLevel::parse(level_str)
        .ok_or_else(|| MalformedRecord::BadLevel(level_str.to_string()))?;

    let service = str_field(raw, "service")?.to_string();
    let source = raw
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or(service.as_str())
        .to_string();
    let message = raw
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let response_time_ms = match raw.get("response_time_ms").and_then(Value::as_f64) {
        Some(v) if v < 0.0 || !v.is_finite() => {
            return Err(MalformedRecord::BadResponseTime(v))
        }
        other => other,
    };

    let ground_truth = raw.get("_labels").and_then(Value::as_object).map(|labels| {
        GroundTruth {
            is_anomaly: labels
                .get("is_anomaly")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            anomaly_type: labels
                .get("anomaly_type")
                .and_then(Value::as_str)
                .unwrap_or("none")
                .to_string(),
            score: labels
                .get("anomaly_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        }
    });

    Ok(LogRecord {
        timestamp,
        service,
        source,
        level,
        message,
        response_time_ms,
        ground_truth,
    })
}
