//! Best-effort reporting of match outcomes to the external results service.
//!
//! The report is dispatched on a detached task so the room's tick loop and
//! cleanup never wait on it; a failure is observed in the logs only.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Terminal result for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Won,
    Lost,
    /// Grace window lapsed without reconnection
    Dropped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub uuid: Uuid,
    pub outcome: Outcome,
    pub score: f32,
}

/// Payload posted when a match concludes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub session_id: String,
    pub status: &'static str,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<PlayerResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("results service returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Client for the external results service
#[derive(Clone)]
pub struct ResultsReporter {
    client: Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl ResultsReporter {
    pub fn new(endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            token,
        }
    }

    /// A reporter that never sends anything.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Fire-and-forget dispatch; returns immediately.
    pub fn dispatch(&self, report: MatchReport) {
        let Some(endpoint) = self.endpoint.clone() else {
            debug!(
                session_id = %report.session_id,
                "Results service not configured, skipping report"
            );
            return;
        };

        let reporter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = reporter.post(&endpoint, &report).await {
                warn!(
                    session_id = %report.session_id,
                    error = %e,
                    "Failed to report match result"
                );
            }
        });
    }

    async fn post(&self, endpoint: &str, report: &MatchReport) -> Result<(), ReportError> {
        let mut request = self.client.post(endpoint).json(report);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Api { status, body });
        }

        debug!(session_id = %report.session_id, "Match result reported");
        Ok(())
    }
}
