//! Retrieval gateway adapter.
//!
//! The retrieval engine itself (vector store, LLM) is an external
//! collaborator. This module owns only the boundary: a pluggable trait, an
//! HTTP adapter speaking the retrieval server's wire format, and the hard
//! timeout that keeps the detection path independent of retrieval latency.

use crate::classify::Verdict;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),
    #[error("retrieval service unavailable: {0}")]
    Unavailable(String),
    #[error("unusable retrieval response: {0}")]
    BadResponse(String),
}

/// Request sent to the retrieval boundary.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationQuery {
    pub group_key: String,
    pub metrics_summary: String,
    pub query_text: String,
}

impl RemediationQuery {
    /// Build a retrieval query from a triggered verdict. Phrasing keys on
    /// the trigger reason and observed latency so the document search
    /// lands on the relevant runbook sections.
    pub fn from_verdict(verdict: &Verdict) -> Self {
        let m = &verdict.metrics;
        let mut parts = vec![format!(
            "How to handle {} in {} service?",
            verdict.reason, verdict.group_key
        )];
        if m.error_count > 0 {
            parts.push(format!(
                "Remediation steps for high error rate ({} errors in {} logs).",
                m.error_count, m.count
            ));
        }
        if let Some(rt) = m.avg_response_time_ms {
            if rt > 1000.0 {
                parts.push(format!(
                    "What to do when {} has high latency ({rt:.0}ms)?",
                    verdict.group_key
                ));
            }
        }
        Self {
            group_key: verdict.group_key.to_string(),
            metrics_summary: format!(
                "count={} errors={} error_rate={:.3}",
                m.count, m.error_count, m.error_rate
            ),
            query_text: parts.join(" "),
        }
    }
}

/// Response from the retrieval boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub text: String,
    pub sources: Vec<String>,
}

/// Pluggable remediation lookup capability.
#[async_trait::async_trait]
pub trait RetrievalGateway: Send + Sync {
    async fn fetch(&self, query: &RemediationQuery) -> Result<Remediation, RetrievalError>;
}

/// Disabled retrieval: every lookup reports unavailable, so alerts are
/// emitted degraded. Used when no endpoint is configured and in tests.
pub struct NullGateway;

#[async_trait::async_trait]
impl RetrievalGateway for NullGateway {
    async fn fetch(&self, _query: &RemediationQuery) -> Result<Remediation, RetrievalError> {
        Err(RetrievalError::Unavailable("retrieval disabled".to_string()))
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    query: &'a str,
    n_results: usize,
}

#[derive(Deserialize)]
struct WireResponse {
    answer: String,
    #[serde(default)]
    sources: Vec<String>,
}

/// HTTP adapter for the remediation retrieval server.
///
/// Wire contract: POST `{query, n_results}` to the endpoint, receive
/// `{answer, sources[]}`.
pub struct HttpRetrievalGateway {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    n_results: usize,
}

impl HttpRetrievalGateway {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
            n_results: 5,
        })
    }
}

#[async_trait::async_trait]
impl RetrievalGateway for HttpRetrievalGateway {
    async fn fetch(&self, query: &RemediationQuery) -> Result<Remediation, RetrievalError> {
        let body = WireRequest {
            query: &query.query_text,
            n_results: self.n_results,
        };

        // The client carries its own timeout; the outer one also covers
        // connection setup and body streaming.
        let request = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| RetrievalError::Timeout(self.timeout))?
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout(self.timeout)
                } else {
                    RetrievalError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RetrievalError::Unavailable(format!(
                "retrieval server returned {}",
                response.status()
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::BadResponse(e.to_string()))?;

        if wire.answer.trim().is_empty() {
            return Err(RetrievalError::BadResponse("empty answer".to_string()));
        }

        Ok(Remediation {
            text: wire.answer,
            sources: wire.sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GroupKey;
    use crate::classify::{MetricsSnapshot, TriggerReason, Verdict};
    use chrono::Utc;

    fn verdict(avg_rt: Option<f64>) -> Verdict {
        Verdict {
            group_key: GroupKey::from("payment"),
            window_start: Utc::now(),
            window_end: Utc::now(),
            triggered: true,
            reason: TriggerReason::AbsoluteThreshold,
            metrics: MetricsSnapshot {
                count: 56,
                error_count: 6,
                error_rate: 6.0 / 56.0,
                anomaly_flag_count: 0,
                max_anomaly_score: 0.0,
                avg_response_time_ms: avg_rt,
            },
        }
    }

    #[test]
    fn test_query_mentions_service_and_errors() {
        let q = RemediationQuery::from_verdict(&verdict(None));
        assert!(q.query_text.contains("payment"));
        assert!(q.query_text.contains("absolute_threshold"));
        assert!(q.query_text.contains("6 errors in 56 logs"));
        assert_eq!(q.group_key, "payment");
    }

    #[test]
    fn test_query_adds_latency_phrase_above_one_second() {
        let q = RemediationQuery::from_verdict(&verdict(Some(2300.0)));
        assert!(q.query_text.contains("high latency (2300ms)"));
        let quiet = RemediationQuery::from_verdict(&verdict(Some(120.0)));
        assert!(!quiet.query_text.contains("high latency"));
    }

    #[tokio::test]
    async fn test_null_gateway_is_unavailable() {
        let gw = NullGateway;
        let err = gw
            .fetch(&RemediationQuery::from_verdict(&verdict(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)));
    }
}
