//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS alerts (
            alert_id TEXT PRIMARY KEY,
            detected_at TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            group_key TEXT NOT NULL,
            severity TEXT NOT NULL,
            reason TEXT NOT NULL,
            degraded INTEGER NOT NULL DEFAULT 0,
            alert_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY,
            alert_id TEXT NOT NULL,
            group_key TEXT NOT NULL,
            alert_json TEXT NOT NULL,
            failure_reason TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_group ON alerts(group_key);
        CREATE INDEX IF NOT EXISTS idx_dead_letters_created ON dead_letters(created_at);",
    )?;

    Ok(())
}
