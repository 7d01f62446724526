//! Operational alerts.
//!
//! Raised when the scheduler cannot do what the schedule asks: nothing ready
//! to show, a switcher that refuses, a transition that can no longer run.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use playout_models::{RoomId, TransitionId};

use crate::error::{SchedulerError, SchedulerResult};
use crate::metrics::names;

const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Neither primary nor fallback content was ready at the due time.
    NoReadyContent,
    SwitchFailed,
    /// A pending transition fell behind one that already executed.
    MissedTransition,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::NoReadyContent => "no_ready_content",
            AlertKind::SwitchFailed => "switch_failed",
            AlertKind::MissedTransition => "missed_transition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub room_id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_id: Option<TransitionId>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, room_id: RoomId, transition_id: Option<TransitionId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            room_id,
            transition_id,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, alert: &Alert) -> SchedulerResult<()>;
}

/// Logs alerts and keeps the most recent ones in memory.
#[derive(Debug, Default)]
pub struct LogAlerter {
    recent: Mutex<VecDeque<Alert>>,
}

impl LogAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Alert> {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }
}

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, alert: &Alert) -> SchedulerResult<()> {
        counter!(names::ALERTS_TOTAL, "kind" => alert.kind.as_str()).increment(1);
        match alert.kind {
            AlertKind::SwitchFailed => error!(
                room_id = %alert.room_id,
                transition_id = ?alert.transition_id,
                kind = alert.kind.as_str(),
                "ALERT: {}", alert.message
            ),
            _ => warn!(
                room_id = %alert.room_id,
                transition_id = ?alert.transition_id,
                kind = alert.kind.as_str(),
                "ALERT: {}", alert.message
            ),
        }

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == HISTORY_LIMIT {
            recent.pop_front();
        }
        recent.push_back(alert.clone());
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook, logging them as well.
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: url::Url,
    log: LogAlerter,
}

impl WebhookAlerter {
    pub fn new(url: &str, timeout: Duration) -> SchedulerResult<Self> {
        let url = url::Url::parse(url).map_err(|e| SchedulerError::config_error(format!("invalid webhook url: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            log: LogAlerter::new(),
        })
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn alert(&self, alert: &Alert) -> SchedulerResult<()> {
        self.log.alert(alert).await?;
        let response = self.client.post(self.url.clone()).json(alert).send().await?;
        if !response.status().is_success() {
            return Err(SchedulerError::AlertFailed(format!("webhook returned {}", response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_log_alerter_keeps_recent() {
        let alerter = LogAlerter::new();
        for i in 0..(HISTORY_LIMIT + 3) {
            alerter
                .alert(&Alert::new(AlertKind::NoReadyContent, "room".into(), None, format!("#{i}")))
                .await
                .unwrap();
        }
        let recent = alerter.recent();
        assert_eq!(recent.len(), HISTORY_LIMIT);
        assert_eq!(recent[0].message, "#3");
    }

    #[tokio::test]
    async fn test_webhook_receives_alert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "kind": "no_ready_content", "room_id": "room-9" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let alerter = WebhookAlerter::new(&server.uri(), Duration::from_secs(2)).unwrap();
        alerter
            .alert(&Alert::new(AlertKind::NoReadyContent, "room-9".into(), None, "nothing ready"))
            .await
            .unwrap();
    }
}
