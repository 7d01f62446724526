//! Video switcher clients.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use playout_models::{BroadcastContentItem, BroadcastContentItemId, BroadcastInput, RoomId};

use crate::error::{SchedulerError, SchedulerResult};

/// Puts content on air in a room. Implementations must be idempotent: the
/// same switch may be requested twice after a crash.
#[async_trait]
pub trait VideoSwitcher: Send + Sync {
    async fn switch(&self, room_id: &RoomId, item: &BroadcastContentItem) -> SchedulerResult<()>;
}

/// Body posted to the switcher endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRequest {
    pub room_id: RoomId,
    pub broadcast_content_id: BroadcastContentItemId,
    pub input: BroadcastInput,
}

/// Switcher reached over HTTP.
pub struct HttpSwitcher {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpSwitcher {
    pub fn new(endpoint: &str, timeout: Duration) -> SchedulerResult<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| SchedulerError::config_error(format!("invalid switcher url {endpoint}: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl VideoSwitcher for HttpSwitcher {
    async fn switch(&self, room_id: &RoomId, item: &BroadcastContentItem) -> SchedulerResult<()> {
        let input = item
            .input
            .clone()
            .ok_or_else(|| SchedulerError::switch_failed(room_id, format!("{} has no input", item.id)))?;
        let body = SwitchRequest {
            room_id: room_id.clone(),
            broadcast_content_id: item.id.clone(),
            input,
        };

        let response = self.client.post(self.endpoint.clone()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SchedulerError::switch_failed(room_id, format!("{status}: {text}")));
        }
        debug!(room_id = %room_id, broadcast_content_id = %item.id, "Switcher accepted");
        Ok(())
    }
}

/// One switch seen by [`LoggingSwitcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchRecord {
    pub room_id: RoomId,
    pub broadcast_content_id: BroadcastContentItemId,
    pub at: DateTime<Utc>,
}

/// Dry-run switcher: logs and remembers every switch.
#[derive(Debug, Default)]
pub struct LoggingSwitcher {
    history: Mutex<Vec<SwitchRecord>>,
}

impl LoggingSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<SwitchRecord> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl VideoSwitcher for LoggingSwitcher {
    async fn switch(&self, room_id: &RoomId, item: &BroadcastContentItem) -> SchedulerResult<()> {
        info!(room_id = %room_id, broadcast_content_id = %item.id, "Switching (dry run)");
        self.history.lock().unwrap_or_else(|e| e.into_inner()).push(SwitchRecord {
            room_id: room_id.clone(),
            broadcast_content_id: item.id.clone(),
            at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_models::InputType;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ready_item() -> BroadcastContentItem {
        let mut item = BroadcastContentItem::pending("conf".into(), "content".into(), InputType::Mp4);
        item.input = Some(BroadcastInput::Mp4 {
            s3_url: "s3://media/a.mp4".into(),
        });
        item
    }

    #[tokio::test]
    async fn test_http_switcher_posts_room_and_input() {
        let server = MockServer::start().await;
        let item = ready_item();
        Mock::given(method("POST"))
            .and(path("/switch"))
            .and(body_partial_json(serde_json::json!({
                "roomId": "room-1",
                "broadcastContentId": item.id.as_str(),
                "input": { "type": "MP4", "s3_url": "s3://media/a.mp4" }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let switcher = HttpSwitcher::new(&format!("{}/switch", server.uri()), Duration::from_secs(2)).unwrap();
        switcher.switch(&"room-1".into(), &item).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_switcher_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let switcher = HttpSwitcher::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = switcher.switch(&"room-1".into(), &ready_item()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SwitchFailed { .. }));
        assert!(err.to_string().contains("busy"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_logging_switcher_records_history() {
        let switcher = LoggingSwitcher::new();
        let item = ready_item();
        switcher.switch(&"room-1".into(), &item).await.unwrap();
        let history = switcher.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].broadcast_content_id, item.id);
    }
}
