//! Conference content as read from the content store, and the render
//! sources derived from it.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConferenceId, ContentItemId, ModelError, ModelResult};

/// Content type of a content item, stored as `content_type_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Abstract,
    Text,
    Link,
    ImageFile,
    PaperFile,
    VideoFile,
    VideoUrl,
    VideoBroadcast,
    VideoTitles,
    VideoCountdown,
    VideoFiller,
    VideoPrepublish,
}

impl ContentType {
    /// Types that must be rendered into a broadcast MP4 before going on air.
    pub fn requires_broadcast_render(&self) -> bool {
        matches!(
            self,
            ContentType::VideoBroadcast
                | ContentType::VideoTitles
                | ContentType::VideoCountdown
                | ContentType::VideoFiller
        )
    }
}

/// Conference-level template used to draw titles and countdown clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenderTemplate {
    pub background_color: String,
    pub text_color: String,
    pub font_size: u32,
    pub title_duration_seconds: u32,
    pub countdown_seconds: u32,
}

impl Default for RenderTemplate {
    fn default() -> Self {
        Self {
            background_color: "black".into(),
            text_color: "white".into(),
            font_size: 64,
            title_duration_seconds: 5,
            countdown_seconds: 10,
        }
    }
}

/// Root aggregate. Only the fields rendering depends on are modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Conference {
    pub id: ConferenceId,
    pub name: String,
    /// Absent until an organizer configures broadcast templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_template: Option<RenderTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentItem {
    pub id: ContentItemId,
    pub conference_id: ConferenceId,
    pub content_type_name: ContentType,
    pub name: String,
    /// Type-specific payload (uploaded file url, titles text, ...)
    #[serde(default)]
    pub data: Value,
    /// Uploadable requirement this item is fulfilled by, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_content_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
    }
}

/// What the encoder has to produce for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderSource {
    /// Re-encode an uploaded video into broadcast format.
    Transcode { source_url: String },
    /// Draw a static titles card.
    TitleCard {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        template: RenderTemplate,
    },
    /// Draw a seconds countdown.
    Countdown { seconds: u32, template: RenderTemplate },
}

impl RenderSource {
    /// Work out the render source for `item`.
    ///
    /// Fails with [`ModelError::RenderConfig`] when the item or the
    /// conference lacks what the render needs.
    pub fn resolve(item: &ContentItem, conference: &Conference) -> ModelResult<Self> {
        match item.content_type_name {
            ContentType::VideoBroadcast | ContentType::VideoFiller => {
                let source_url = item.data_str("s3_url").ok_or_else(|| match &item.required_content_id {
                    Some(required) => ModelError::render_config(format!(
                        "content item {} ({}) is still awaiting an upload for {required}",
                        item.id, item.name
                    )),
                    None => ModelError::render_config(format!(
                        "content item {} ({}) has no uploaded source video",
                        item.id, item.name
                    )),
                })?;
                url::Url::parse(source_url).map_err(|e| {
                    ModelError::render_config(format!("content item {} has an invalid source url: {e}", item.id))
                })?;
                Ok(RenderSource::Transcode {
                    source_url: source_url.to_string(),
                })
            }
            ContentType::VideoTitles => {
                let template = required_template(item, conference)?;
                let title = item.data_str("title").unwrap_or(&item.name).to_string();
                if title.trim().is_empty() {
                    return Err(ModelError::render_config(format!("titles item {} has no text", item.id)));
                }
                Ok(RenderSource::TitleCard {
                    title,
                    subtitle: item.data_str("subtitle").map(str::to_string),
                    template,
                })
            }
            ContentType::VideoCountdown => {
                let template = required_template(item, conference)?;
                let seconds = match item.data.get("seconds") {
                    None | Some(Value::Null) => template.countdown_seconds,
                    Some(v) => v
                        .as_u64()
                        .and_then(|s| u32::try_from(s).ok())
                        .filter(|s| *s > 0)
                        .ok_or_else(|| {
                            ModelError::render_config(format!("countdown item {} has invalid seconds: {v}", item.id))
                        })?,
                };
                Ok(RenderSource::Countdown { seconds, template })
            }
            other => Err(ModelError::render_config(format!(
                "content type {other:?} is not rendered for broadcast"
            ))),
        }
    }
}

fn required_template(item: &ContentItem, conference: &Conference) -> ModelResult<RenderTemplate> {
    conference.render_template.clone().ok_or_else(|| {
        ModelError::render_config(format!(
            "conference {} has no broadcast render template configured, required by {} ({})",
            conference.id, item.id, item.name
        ))
    })
}
