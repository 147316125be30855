//! End-to-end pipeline tests: NDJSON in, alerts out.

use logwarden::aggregate::GroupKey;
use logwarden::config::Config;
use logwarden::emit::{alert_id, Emitter};
use logwarden::metrics::PipelineMetrics;
use logwarden::pipeline::Pipeline;
use logwarden::retrieval::{
    Remediation, RemediationQuery, RetrievalError, RetrievalGateway,
};
use logwarden::sink::{dead_letter_count, recent_alerts, SqliteSink};
use logwarden::storage::open_memory_pool;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn test_config() -> Config {
    Config {
        window_secs: 60,
        grace_secs: 0,
        idle_close_secs: 0,
        close_scan_secs: 1,
        ..Config::default()
    }
}

fn write_ndjson(lines: &[serde_json::Value]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn burst(
    service: &str,
    minute: &str,
    infos: usize,
    errors: usize,
) -> Vec<serde_json::Value> {
    let mut lines = Vec::new();
    for i in 0..infos {
        lines.push(json!({
            "timestamp": format!("2026-01-15T10:{minute}:{:02}.{:03}Z", i / 20, i % 20 * 50),
            "level": "INFO",
            "service": service,
            "message": "request handled",
            "response_time_ms": 120.0
        }));
    }
    for i in 0..errors {
        lines.push(json!({
            "timestamp": format!("2026-01-15T10:{minute}:{:02}.{:03}Z", 30 + i / 20, i % 20 * 50),
            "level": "ERROR",
            "service": service,
            "message": "db timeout",
            "response_time_ms": 2400.0
        }));
    }
    lines
}

#[tokio::test]
async fn test_error_burst_produces_single_absolute_threshold_alert() {
    let file = write_ndjson(&burst("auth-service", "30", 50, 6));
    let alerts = logwarden::process_file(test_config(), file.path().to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert["group_key"], "auth-service");
    assert_eq!(alert["reason"], "absolute_threshold");
    assert_eq!(alert["severity"], "critical");
    assert_eq!(alert["metrics"]["count"], 56);
    assert_eq!(alert["metrics"]["error_count"], 6);
    let rate = alert["metrics"]["error_rate"].as_f64().unwrap();
    assert!((rate - 6.0 / 56.0).abs() < 1e-6);
    // No retrieval endpoint configured: delivered degraded.
    assert_eq!(alert["degraded"], true);
    assert!(alert["remediation_text"].is_null());
}

#[tokio::test]
async fn test_ground_truth_label_wins_without_errors() {
    let mut lines = burst("payment", "31", 100, 0);
    lines.push(json!({
        "timestamp": "2026-01-15T10:31:45Z",
        "level": "INFO",
        "service": "payment",
        "message": "latency creeping",
        "_labels": {"is_anomaly": true, "anomaly_type": "latency_degradation", "anomaly_score": 0.7}
    }));
    let file = write_ndjson(&lines);
    let alerts = logwarden::process_file(test_config(), file.path().to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["reason"], "ground_truth");
    assert_eq!(alerts[0]["metrics"]["anomaly_flag_count"], 1);
}

#[tokio::test]
async fn test_quiet_stream_produces_no_alerts() {
    let file = write_ndjson(&burst("search", "32", 80, 1));
    let alerts = logwarden::process_file(test_config(), file.path().to_str().unwrap())
        .await
        .unwrap();
    assert!(alerts.is_empty());
}

#[tokio::test]
async fn test_alert_id_is_stable_across_runs() {
    let file = write_ndjson(&burst("auth-service", "33", 10, 8));
    let path = file.path().to_str().unwrap();

    let first = logwarden::process_file(test_config(), path).await.unwrap();
    let second = logwarden::process_file(test_config(), path).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["alert_id"], second[0]["alert_id"]);

    // And the id matches the deterministic derivation.
    let start = chrono::DateTime::parse_from_rfc3339(first[0]["window_start"].as_str().unwrap())
        .unwrap()
        .with_timezone(&chrono::Utc);
    let end = chrono::DateTime::parse_from_rfc3339(first[0]["window_end"].as_str().unwrap())
        .unwrap()
        .with_timezone(&chrono::Utc);
    let expected = alert_id(&GroupKey::from("auth-service"), start, end);
    assert_eq!(first[0]["alert_id"], expected.to_string());
}

#[tokio::test]
async fn test_separate_windows_alert_independently() {
    let mut lines = burst("auth-service", "34", 0, 6);
    lines.extend(burst("auth-service", "35", 0, 6));
    let file = write_ndjson(&lines);
    let alerts = logwarden::process_file(test_config(), file.path().to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(alerts.len(), 2);
    assert_ne!(alerts[0]["alert_id"], alerts[1]["alert_id"]);
    assert!(alerts[0]["window_start"] != alerts[1]["window_start"]);
}

#[tokio::test]
async fn test_serve_fails_when_db_directory_cannot_be_created() {
    let config = Config {
        db_path: "/dev/null/sub/logwarden.db".to_string(),
        ..Config::default()
    };
    let err = logwarden::serve(config, "-").await.unwrap_err();
    assert!(err.to_string().contains("database directory"));
}

/// Gateway that always times out, as if the retrieval service hung.
struct HangingGateway;

#[async_trait::async_trait]
impl RetrievalGateway for HangingGateway {
    async fn fetch(&self, _query: &RemediationQuery) -> Result<Remediation, RetrievalError> {
        Err(RetrievalError::Timeout(Duration::from_millis(50)))
    }
}

/// Gateway that answers from a canned runbook.
struct RunbookGateway;

#[async_trait::async_trait]
impl RetrievalGateway for RunbookGateway {
    async fn fetch(&self, query: &RemediationQuery) -> Result<Remediation, RetrievalError> {
        Ok(Remediation {
            text: format!("Check connection pool for {}.", query.group_key),
            sources: vec!["runbooks/db.md".to_string()],
        })
    }
}

async fn run_pipeline_with_gateway(
    gateway: Arc<dyn RetrievalGateway>,
    lines: Vec<serde_json::Value>,
) -> (Vec<serde_json::Value>, Arc<PipelineMetrics>, logwarden::storage::Pool) {
    let config = test_config();
    let pool = open_memory_pool().unwrap();
    let metrics = Arc::new(PipelineMetrics::default());
    let emitter = Arc::new(Emitter::new(
        gateway,
        Arc::new(SqliteSink::new(pool.clone())),
        config.retry_policy(),
        Arc::clone(&metrics),
    ));
    let pipeline = Pipeline::new(&config, emitter, Arc::clone(&metrics));

    let (tx, rx) = mpsc::channel(64);
    for line in lines {
        tx.send(line).await.unwrap();
    }
    drop(tx);
    pipeline.run(rx).await.unwrap();

    let mut alerts = recent_alerts(&pool, 100).unwrap();
    alerts.reverse();
    (alerts, metrics, pool)
}

#[tokio::test]
async fn test_retrieval_timeout_still_delivers_degraded_alert() {
    let (alerts, metrics, _pool) =
        run_pipeline_with_gateway(Arc::new(HangingGateway), burst("auth-service", "36", 0, 6))
            .await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["degraded"], true);
    assert!(alerts[0]["remediation_text"].is_null());
    let snap = metrics.snapshot();
    assert_eq!(snap.alerts_published, 1);
    assert_eq!(snap.alerts_degraded, 1);
}

#[tokio::test]
async fn test_healthy_retrieval_enriches_alert() {
    let (alerts, metrics, pool) =
        run_pipeline_with_gateway(Arc::new(RunbookGateway), burst("auth-service", "37", 0, 6))
            .await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["degraded"], false);
    assert_eq!(
        alerts[0]["remediation_text"],
        "Check connection pool for auth-service."
    );
    assert_eq!(alerts[0]["remediation_sources"][0], "runbooks/db.md");
    assert_eq!(metrics.snapshot().alerts_degraded, 0);
    assert_eq!(dead_letter_count(&pool).unwrap(), 0);
}

#[tokio::test]
async fn test_late_record_is_dropped_after_window_closes() {
    let config = test_config();
    let pool = open_memory_pool().unwrap();
    let metrics = Arc::new(PipelineMetrics::default());
    let emitter = Arc::new(Emitter::new(
        Arc::new(RunbookGateway),
        Arc::new(SqliteSink::new(pool.clone())),
        config.retry_policy(),
        Arc::clone(&metrics),
    ));
    let pipeline = Pipeline::new(&config, emitter, Arc::clone(&metrics));

    let (tx, rx) = mpsc::channel(64);
    let runner = tokio::spawn(async move { pipeline.run(rx).await });

    for line in burst("auth-service", "38", 0, 6) {
        tx.send(line).await.unwrap();
    }
    // A much later record advances the event-time watermark past the
    // burst window.
    tx.send(json!({
        "timestamp": "2026-01-15T10:45:00Z",
        "level": "INFO",
        "service": "auth-service",
        "message": "heartbeat"
    }))
    .await
    .unwrap();

    // Let a close scan fire with the advanced watermark.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // This maps into the already-closed burst window.
    tx.send(json!({
        "timestamp": "2026-01-15T10:38:10Z",
        "level": "ERROR",
        "service": "auth-service",
        "message": "straggler"
    }))
    .await
    .unwrap();
    drop(tx);
    runner.await.unwrap().unwrap();

    let snap = metrics.snapshot();
    assert_eq!(snap.late_arrivals, 1);
    // Exactly one alert for the burst window; the straggler neither
    // re-opened nor re-classified it.
    let alerts = recent_alerts(&pool, 100).unwrap();
    assert_eq!(
        alerts
            .iter()
            .filter(|a| a["reason"] == "absolute_threshold")
            .count(),
        1
    );
}
