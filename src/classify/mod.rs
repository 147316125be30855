//! Window classification -- pure threshold rules over closed windows.

use crate::aggregate::{GroupKey, Window};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a window triggered, in evaluation order. First match wins, so the
/// same window always classifies the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    GroundTruth,
    AbsoluteThreshold,
    RateThreshold,
    None,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GroundTruth => write!(f, "ground_truth"),
            Self::AbsoluteThreshold => write!(f, "absolute_threshold"),
            Self::RateThreshold => write!(f, "rate_threshold"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Detection thresholds. Validated at startup, constant afterwards.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Errors per window that trigger regardless of volume.
    pub abs_error_threshold: u64,
    /// Error fraction (0, 1] that triggers on non-empty windows.
    pub rate_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            abs_error_threshold: 5,
            rate_threshold: 0.10,
        }
    }
}

/// Point-in-time metrics carried from a window onto its verdict and alert.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub anomaly_flag_count: u64,
    pub max_anomaly_score: f64,
    pub avg_response_time_ms: Option<f64>,
}

impl MetricsSnapshot {
    fn of(window: &Window) -> Self {
        Self {
            count: window.count,
            error_count: window.error_count,
            error_rate: window.error_rate(),
            anomaly_flag_count: window.anomaly_flag_count,
            max_anomaly_score: window.max_anomaly_score,
            avg_response_time_ms: window.avg_response_time(),
        }
    }
}

/// Classification result for one closed window.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub group_key: GroupKey,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub triggered: bool,
    pub reason: TriggerReason,
    pub metrics: MetricsSnapshot,
}

/// Evaluate one closed window. Pure and idempotent: windows are immutable
/// once closed, so reclassification always yields the same verdict.
///
/// Rule order: ground-truth flags, then the absolute error threshold, then
/// the error-rate threshold. Empty windows never trigger.
pub fn classify(window: &Window, thresholds: &Thresholds) -> Verdict {
    let reason = if window.anomaly_flag_count > 0 {
        TriggerReason::GroundTruth
    } else if window.error_count >= thresholds.abs_error_threshold {
        TriggerReason::AbsoluteThreshold
    } else if window.count > 0 && window.error_rate() > thresholds.rate_threshold {
        TriggerReason::RateThreshold
    } else {
        TriggerReason::None
    };

    Verdict {
        group_key: window.group_key.clone(),
        window_start: window.start,
        window_end: window.end,
        triggered: reason != TriggerReason::None,
        reason,
        metrics: MetricsSnapshot::of(window),
    }
}
