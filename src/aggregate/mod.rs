//! Tumbling-window aggregation keyed by service.
//!
//! The aggregator is the single owner of the live-window map. Windows are
//! epoch-aligned (`index = floor(ts_ms / duration_ms)`), so boundaries are
//! stable across restarts. A window closes once the watermark has passed
//! its end by the configured grace period; a closed window is never
//! re-opened -- later records for it are rejected as late arrivals.

use crate::record::LogRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("late arrival for {group_key} window {window_index} (closed through {closed_through})")]
pub struct LateArrival {
    pub group_key: GroupKey,
    pub window_index: i64,
    pub closed_through: i64,
}

/// Stream partitioning dimension. Currently the service name; any stable,
/// deterministic function of the record would do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn of(record: &LogRecord) -> Self {
        Self(record.service.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Aggregate statistics for one tumbling interval of one group.
#[derive(Debug, Clone, Serialize)]
pub struct Window {
    pub group_key: GroupKey,
    pub index: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: u64,
    pub error_count: u64,
    pub anomaly_flag_count: u64,
    pub max_anomaly_score: f64,
    pub sum_response_time: f64,
    pub response_time_samples: u64,
}

impl Window {
    fn new(group_key: GroupKey, index: i64, duration_ms: i64) -> Self {
        let start_ms = index * duration_ms;
        Self {
            group_key,
            index,
            start: DateTime::from_timestamp_millis(start_ms).unwrap_or_default(),
            end: DateTime::from_timestamp_millis(start_ms + duration_ms).unwrap_or_default(),
            count: 0,
            error_count: 0,
            anomaly_flag_count: 0,
            max_anomaly_score: 0.0,
            sum_response_time: 0.0,
            response_time_samples: 0,
        }
    }

    fn fold(&mut self, record: &LogRecord) {
        self.count += 1;
        if record.is_error() {
            self.error_count += 1;
        }
        if let Some(gt) = &record.ground_truth {
            if gt.is_anomaly {
                self.anomaly_flag_count += 1;
            }
            if gt.score > self.max_anomaly_score {
                self.max_anomaly_score = gt.score;
            }
        }
        if let Some(rt) = record.response_time_ms {
            self.sum_response_time += rt;
            self.response_time_samples += 1;
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }

    pub fn avg_response_time(&self) -> Option<f64> {
        if self.response_time_samples == 0 {
            None
        } else {
            Some(self.sum_response_time / self.response_time_samples as f64)
        }
    }
}

/// Monotonic event-time marker: no more data earlier than this is expected.
#[derive(Debug, Clone, Copy)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn new() -> Self {
        Self(DateTime::<Utc>::MIN_UTC)
    }

    /// Advance-only. Out-of-order timestamps never move the mark backward.
    pub fn observe(&mut self, ts: DateTime<Utc>) {
        if ts > self.0 {
            self.0 = ts;
        }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WindowAggregator {
    duration_ms: i64,
    grace: chrono::Duration,
    live: HashMap<(GroupKey, i64), Window>,
    /// Highest window index already closed, per group. Records at or below
    /// this index are late.
    closed_through: HashMap<GroupKey, i64>,
}

impl WindowAggregator {
    pub fn new(duration: Duration, grace: Duration) -> Self {
        Self {
            duration_ms: duration.as_millis() as i64,
            grace: chrono::Duration::milliseconds(grace.as_millis() as i64),
            live: HashMap::new(),
            closed_through: HashMap::new(),
        }
    }

    pub fn window_index(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp_millis().div_euclid(self.duration_ms)
    }

    pub fn live_window_count(&self) -> usize {
        self.live.len()
    }

    /// Fold one record into its window. O(1) amortized, never blocks.
    pub fn ingest(&mut self, record: &LogRecord) -> Result<(), LateArrival> {
        let group_key = GroupKey::of(record);
        let index = self.window_index(record.timestamp);

        if let Some(&closed) = self.closed_through.get(&group_key) {
            if index <= closed {
                return Err(LateArrival {
                    group_key,
                    window_index: index,
                    closed_through: closed,
                });
            }
        }

        let duration_ms = self.duration_ms;
        self.live
            .entry((group_key.clone(), index))
            .or_insert_with(|| Window::new(group_key, index, duration_ms))
            .fold(record);
        Ok(())
    }

    /// Remove and return every window whose end has passed
    /// `watermark - grace`, in ascending index order per group.
    pub fn close_ready(&mut self, watermark: Watermark) -> Vec<Window> {
        // A watermark near MIN_UTC (no data observed yet) closes nothing.
        let Some(cutoff) = watermark.instant().checked_sub_signed(self.grace) else {
            return Vec::new();
        };
        let ready: Vec<(GroupKey, i64)> = self
            .live
            .iter()
            .filter(|(_, w)| w.end <= cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        let mut closed: Vec<Window> = ready
            .into_iter()
            .filter_map(|k| self.live.remove(&k))
            .collect();
        closed.sort_by(|a, b| (&a.group_key, a.index).cmp(&(&b.group_key, b.index)));

        for w in &closed {
            let mark = self.closed_through.entry(w.group_key.clone()).or_insert(w.index);
            if w.index > *mark {
                *mark = w.index;
            }
        }
        closed
    }

    /// Shutdown flush: close everything still live, regardless of watermark.
    pub fn drain(&mut self) -> Vec<Window> {
        let mut remaining: Vec<Window> = self.live.drain().map(|(_, w)| w).collect();
        remaining.sort_by(|a, b| (&a.group_key, a.index).cmp(&(&b.group_key, b.index)));
        for w in &remaining {
            let mark = self.closed_through.entry(w.group_key.clone()).or_insert(w.index);
            if w.index > *mark {
                *mark = w.index;
            }
        }
        remaining
    }
}
