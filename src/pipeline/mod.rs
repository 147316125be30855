//! Stream pipeline wiring: source channel -> aggregator -> classifier ->
//! emitter.
//!
//! One task owns the live-window map; ingestion and the periodic close
//! scan are serialized through its `select!` loop, so no lock is needed
//! around aggregator state. Emission (the only suspending stage) runs in
//! spawned tasks behind a semaphore, so a slow retrieval or sink never
//! blocks ingestion or unrelated alerts.

use crate::aggregate::{Watermark, Window, WindowAggregator};
use crate::classify::{classify, Thresholds};
use crate::config::Config;
use crate::emit::{EmitError, Emitter};
use crate::metrics::PipelineMetrics;
use crate::record::normalize;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct Pipeline {
    aggregator: WindowAggregator,
    watermark: Watermark,
    thresholds: Thresholds,
    emitter: Arc<Emitter>,
    metrics: Arc<PipelineMetrics>,
    emission_slots: Arc<Semaphore>,
    emissions: JoinSet<()>,
    close_scan: Duration,
    idle_close: Duration,
}

impl Pipeline {
    pub fn new(config: &Config, emitter: Arc<Emitter>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            aggregator: WindowAggregator::new(config.window_duration(), config.grace_period()),
            watermark: Watermark::new(),
            thresholds: config.thresholds(),
            emitter,
            metrics,
            emission_slots: Arc::new(Semaphore::new(config.retrieval_concurrency)),
            emissions: JoinSet::new(),
            close_scan: Duration::from_secs(config.close_scan_secs),
            idle_close: Duration::from_secs(config.idle_close_secs),
        }
    }

    /// Consume raw records until the channel closes, then drain every open
    /// window through classification and emission.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Value>) -> Result<()> {
        let mut scan = tokio::time::interval(self.close_scan);
        scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(raw) => self.handle_record(&raw),
                    None => break,
                },
                _ = scan.tick() => {
                    self.scan_closeable();
                }
            }
        }

        info!("source exhausted; draining open windows");
        let remaining = self.aggregator.drain();
        self.dispatch_closed(remaining);

        // Let in-flight emissions finish before reporting completion.
        while self.emissions.join_next().await.is_some() {}

        let snap = self.metrics.snapshot();
        info!(
            records = snap.records_ingested,
            malformed = snap.dropped_malformed,
            late = snap.late_arrivals,
            windows = snap.windows_closed,
            published = snap.alerts_published,
            degraded = snap.alerts_degraded,
            dead_lettered = snap.alerts_dead_lettered,
            "pipeline drained"
        );
        Ok(())
    }

    fn handle_record(&mut self, raw: &Value) {
        let record = match normalize(raw) {
            Ok(record) => record,
            Err(e) => {
                // Malformed input is dropped and counted, never fatal.
                debug!(error = %e, "dropped malformed record");
                PipelineMetrics::incr(&self.metrics.dropped_malformed);
                return;
            }
        };

        self.watermark.observe(record.timestamp);

        match self.aggregator.ingest(&record) {
            Ok(()) => PipelineMetrics::incr(&self.metrics.records_ingested),
            Err(late) => {
                debug!(group_key = %late.group_key, window = late.window_index, "dropped late arrival");
                PipelineMetrics::incr(&self.metrics.late_arrivals);
            }
        }
    }

    /// Close-scan tick: reap finished emission tasks, advance the
    /// wall-clock assist (if enabled), close every ready window and hand
    /// the results to classification.
    fn scan_closeable(&mut self) {
        // Completed tasks would otherwise accumulate in the set for the
        // life of the daemon.
        while self.emissions.try_join_next().is_some() {}

        if !self.idle_close.is_zero() {
            let assist = Utc::now()
                - chrono::Duration::milliseconds(self.idle_close.as_millis() as i64);
            self.watermark.observe(assist);
        }
        let closed = self.aggregator.close_ready(self.watermark);
        self.dispatch_closed(closed);
    }

    fn dispatch_closed(&mut self, windows: Vec<Window>) {
        for window in windows {
            PipelineMetrics::incr(&self.metrics.windows_closed);
            let verdict = classify(&window, &self.thresholds);
            debug!(
                group_key = %verdict.group_key,
                window_start = %verdict.window_start,
                triggered = verdict.triggered,
                reason = %verdict.reason,
                count = verdict.metrics.count,
                errors = verdict.metrics.error_count,
                "window classified"
            );
            if !verdict.triggered {
                continue;
            }

            let emitter = Arc::clone(&self.emitter);
            let slots = Arc::clone(&self.emission_slots);
            self.emissions.spawn(async move {
                // Semaphore never closes while the pipeline is alive.
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                match emitter.emit(&verdict).await {
                    Ok(_) => {}
                    Err(EmitError::DeadLettered { alert_id, attempts, .. }) => {
                        warn!(%alert_id, attempts, "alert routed to dead letters");
                    }
                    Err(e) => {
                        warn!(error = %e, "emission failed");
                    }
                }
            });
        }
    }
}
