//! Alert emission -- deterministic ids, remediation enrichment, publish
//! with bounded retry, dead-letter on exhaustion.
//!
//! Per verdict the emitter walks Classified -> Retrieving ->
//! (Enriched | Degraded) -> Publishing -> (Published | DeadLettered).
//! Retrieval failure only degrades the alert; publish failure is the one
//! path that can end in the dead-letter table.

use crate::aggregate::GroupKey;
use crate::classify::{MetricsSnapshot, TriggerReason, Verdict};
use crate::metrics::PipelineMetrics;
use crate::retrieval::{RemediationQuery, RetrievalGateway};
use crate::sink::AlertSink;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("verdict was not triggered; nothing to emit")]
    NotTriggered,
    #[error("alert {alert_id} dead-lettered after {attempts} attempts: {reason}")]
    DeadLettered {
        alert_id: Uuid,
        attempts: u32,
        reason: String,
    },
    #[error("alert {alert_id} could not be dead-lettered: {reason}")]
    DeadLetterFailed { alert_id: Uuid, reason: String },
}

/// Alert severity, ordered by operator urgency. Serializes in the same
/// lowercase form the sink stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    fn for_reason(reason: TriggerReason) -> Self {
        match reason {
            TriggerReason::GroundTruth | TriggerReason::AbsoluteThreshold => Self::Critical,
            TriggerReason::RateThreshold => Self::Warning,
            TriggerReason::None => Self::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Durable output unit. Never mutated after publish.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub detected_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub group_key: GroupKey,
    pub severity: Severity,
    pub reason: TriggerReason,
    pub metrics: MetricsSnapshot,
    pub remediation_text: Option<String>,
    pub remediation_sources: Option<Vec<String>>,
    pub degraded: bool,
}

/// Derive the alert id from the window identity alone, so a crash-restart
/// replay of the same window re-emits the same id and downstream consumers
/// de-duplicate on it.
pub fn alert_id(group_key: &GroupKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Uuid {
    let name = format!(
        "{}|{}|{}",
        group_key,
        start.timestamp_millis(),
        end.timestamp_millis()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Bounded exponential backoff for publish retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): base * 2^(attempt-1), capped
    /// at `max_delay`, with up to 25% added jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        capped.mul_f64(1.0 + jitter)
    }
}

pub struct Emitter {
    gateway: Arc<dyn RetrievalGateway>,
    sink: Arc<dyn AlertSink>,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl Emitter {
    pub fn new(
        gateway: Arc<dyn RetrievalGateway>,
        sink: Arc<dyn AlertSink>,
        retry: RetryPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            gateway,
            sink,
            retry,
            metrics,
        }
    }

    /// Turn a triggered verdict into a published (or dead-lettered) alert.
    pub async fn emit(&self, verdict: &Verdict) -> Result<Alert, EmitError> {
        if !verdict.triggered {
            return Err(EmitError::NotTriggered);
        }

        let id = alert_id(&verdict.group_key, verdict.window_start, verdict.window_end);

        // Retrieving. A failed or timed-out lookup degrades the alert,
        // it never delays or suppresses it.
        let query = RemediationQuery::from_verdict(verdict);
        let (remediation_text, remediation_sources, degraded) =
            match self.gateway.fetch(&query).await {
                Ok(remediation) => {
                    debug!(alert_id = %id, sources = remediation.sources.len(), "remediation retrieved");
                    (Some(remediation.text), Some(remediation.sources), false)
                }
                Err(e) => {
                    warn!(alert_id = %id, group_key = %verdict.group_key, error = %e, "retrieval failed; emitting degraded alert");
                    PipelineMetrics::incr(&self.metrics.alerts_degraded);
                    (None, None, true)
                }
            };

        let alert = Alert {
            alert_id: id,
            detected_at: Utc::now(),
            window_start: verdict.window_start,
            window_end: verdict.window_end,
            group_key: verdict.group_key.clone(),
            severity: Severity::for_reason(verdict.reason),
            reason: verdict.reason,
            metrics: verdict.metrics.clone(),
            remediation_text,
            remediation_sources,
            degraded,
        };

        // Publishing.
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.sink.publish(&alert).await {
                Ok(()) => {
                    info!(
                        alert_id = %id,
                        group_key = %alert.group_key,
                        severity = %alert.severity,
                        reason = %alert.reason,
                        degraded = alert.degraded,
                        attempt,
                        "alert published"
                    );
                    PipelineMetrics::incr(&self.metrics.alerts_published);
                    return Ok(alert);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.retry.max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(alert_id = %id, attempt, error = %last_error, ?delay, "publish failed; retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        // DeadLettered.
        warn!(alert_id = %id, group_key = %alert.group_key, error = %last_error, "publish retries exhausted; dead-lettering");
        PipelineMetrics::incr(&self.metrics.alerts_dead_lettered);
        self.sink
            .dead_letter(&alert, &last_error)
            .await
            .map_err(|e| EmitError::DeadLetterFailed {
                alert_id: id,
                reason: e.to_string(),
            })?;

        Err(EmitError::DeadLettered {
            alert_id: id,
            attempts: self.retry.max_attempts,
            reason: last_error,
        })
    }
}
