//! Alert publication sinks.
//!
//! The emitter talks to a sink through the `AlertSink` trait so the
//! production SQLite sink and the test doubles are interchangeable. The
//! dead-letter path is part of the same trait: a sink that can accept an
//! alert must also be able to park one that exhausted its retries.

use crate::emit::Alert;
use crate::storage::Pool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("sink rejected alert: {0}")]
    Rejected(String),
}

#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    /// Publish one alert. Must be idempotent for a repeated `alert_id`.
    async fn publish(&self, alert: &Alert) -> Result<(), PublishError>;

    /// Park an alert that could not be published, with the final failure
    /// reason. This is a terminal, inspectable state -- not a crash.
    async fn dead_letter(&self, alert: &Alert, failure_reason: &str)
        -> Result<(), PublishError>;
}

/// Production sink: alerts land in the `alerts` table, dead letters in
/// `dead_letters`. `INSERT OR IGNORE` on the primary key makes re-emission
/// of the same deterministic alert id a no-op.
pub struct SqliteSink {
    pool: Pool,
}

impl SqliteSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AlertSink for SqliteSink {
    async fn publish(&self, alert: &Alert) -> Result<(), PublishError> {
        let pool = self.pool.clone();
        let alert = alert.clone();
        tokio::task::spawn_blocking(move || -> Result<(), PublishError> {
            let conn = pool
                .get()
                .map_err(|e| PublishError::Unavailable(e.to_string()))?;
            let alert_json = serde_json::to_string(&alert)
                .map_err(|e| PublishError::Rejected(e.to_string()))?;
            conn.execute(
                "INSERT OR IGNORE INTO alerts
                 (alert_id, detected_at, window_start, window_end, group_key, severity, reason, degraded, alert_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    alert.alert_id.to_string(),
                    alert.detected_at.to_rfc3339(),
                    alert.window_start.to_rfc3339(),
                    alert.window_end.to_rfc3339(),
                    alert.group_key.as_str(),
                    alert.severity.to_string(),
                    alert.reason.to_string(),
                    alert.degraded as i64,
                    alert_json,
                ],
            )
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| PublishError::Unavailable(e.to_string()))?
    }

    async fn dead_letter(
        &self,
        alert: &Alert,
        failure_reason: &str,
    ) -> Result<(), PublishError> {
        let pool = self.pool.clone();
        let alert = alert.clone();
        let failure_reason = failure_reason.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), PublishError> {
            let conn = pool
                .get()
                .map_err(|e| PublishError::Unavailable(e.to_string()))?;
            let alert_json = serde_json::to_string(&alert)
                .map_err(|e| PublishError::Rejected(e.to_string()))?;
            conn.execute(
                "INSERT INTO dead_letters (alert_id, group_key, alert_json, failure_reason)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    alert.alert_id.to_string(),
                    alert.group_key.as_str(),
                    alert_json,
                    failure_reason,
                ],
            )
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| PublishError::Unavailable(e.to_string()))?
    }
}

/// Fetch the most recent published alerts, newest first.
pub fn recent_alerts(pool: &Pool, limit: usize) -> anyhow::Result<Vec<serde_json::Value>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT alert_json FROM alerts ORDER BY created_at DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;

    let mut alerts = Vec::new();
    for json in rows.flatten() {
        if let Ok(v) = serde_json::from_str(&json) {
            alerts.push(v);
        }
    }
    Ok(alerts)
}

/// Count rows in the dead-letter table.
pub fn dead_letter_count(pool: &Pool) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    let count = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
    Ok(count)
}
