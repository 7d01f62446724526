//! Broadcast content items: the units a video switcher can put on air.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{BroadcastContentItemId, ConferenceId, ContentItem, ContentItemId, ModelError, ModelResult};

/// Discriminant of [`BroadcastInput`], stored as `input_type_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputType {
    Mp4,
    Png,
    Jpeg,
    Gif,
    RtmpPush,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Mp4 => "MP4",
            InputType::Png => "PNG",
            InputType::Jpeg => "JPEG",
            InputType::Gif => "GIF",
            InputType::RtmpPush => "RTMP_PUSH",
        }
    }
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Playable input of a broadcast content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastInput {
    Mp4 { s3_url: String },
    Png { s3_url: String },
    Jpeg { s3_url: String },
    Gif { s3_url: String },
    RtmpPush { rtmp_input_name: String },
}

impl BroadcastInput {
    pub fn input_type(&self) -> InputType {
        match self {
            BroadcastInput::Mp4 { .. } => InputType::Mp4,
            BroadcastInput::Png { .. } => InputType::Png,
            BroadcastInput::Jpeg { .. } => InputType::Jpeg,
            BroadcastInput::Gif { .. } => InputType::Gif,
            BroadcastInput::RtmpPush { .. } => InputType::RtmpPush,
        }
    }

    /// Check that file-backed inputs point at a parseable URL.
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            BroadcastInput::Mp4 { s3_url }
            | BroadcastInput::Png { s3_url }
            | BroadcastInput::Jpeg { s3_url }
            | BroadcastInput::Gif { s3_url } => url::Url::parse(s3_url)
                .map(|_| ())
                .map_err(|e| ModelError::render_config(format!("invalid media url {s3_url}: {e}"))),
            BroadcastInput::RtmpPush { rtmp_input_name } if rtmp_input_name.trim().is_empty() => {
                Err(ModelError::render_config("RTMP input name is empty"))
            }
            BroadcastInput::RtmpPush { .. } => Ok(()),
        }
    }
}

/// Renderable/playable unit tied 1:1 to a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BroadcastContentItem {
    pub id: BroadcastContentItemId,
    pub conference_id: ConferenceId,
    pub content_item_id: ContentItemId,
    pub input_type_name: InputType,
    /// `None` until a render (or an operator) supplies the media
    pub input: Option<BroadcastInput>,
    pub updated_at: DateTime<Utc>,
}

impl BroadcastContentItem {
    /// A placeholder awaiting rendered media of `input_type`.
    pub fn pending(conference_id: ConferenceId, content_item_id: ContentItemId, input_type: InputType) -> Self {
        Self {
            id: BroadcastContentItemId::new(),
            conference_id,
            content_item_id,
            input_type_name: input_type,
            input: None,
            updated_at: Utc::now(),
        }
    }

    /// Ready to go on air: input present and its shape matches `input_type_name`.
    pub fn is_ready(&self) -> bool {
        self.input
            .as_ref()
            .is_some_and(|input| input.input_type() == self.input_type_name)
    }

    /// Ready, and not older than the content it was rendered from.
    pub fn is_current_for(&self, item: &ContentItem) -> bool {
        self.content_item_id == item.id && self.is_ready() && self.updated_at >= item.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentType;
    use chrono::Duration;
    use serde_json::json;

    fn mp4() -> BroadcastInput {
        BroadcastInput::Mp4 {
            s3_url: "https://media.example.com/a.mp4".into(),
        }
    }

    #[test]
    fn test_readiness_requires_matching_shape() {
        let mut item = BroadcastContentItem::pending("c".into(), "ci".into(), InputType::Mp4);
        assert!(!item.is_ready());

        item.input = Some(BroadcastInput::Png {
            s3_url: "https://media.example.com/a.png".into(),
        });
        assert!(!item.is_ready());

        item.input = Some(mp4());
        assert!(item.is_ready());
    }

    #[test]
    fn test_input_wire_shape() {
        let value = serde_json::to_value(mp4()).unwrap();
        assert_eq!(value, json!({ "type": "MP4", "s3_url": "https://media.example.com/a.mp4" }));

        let rtmp: BroadcastInput =
            serde_json::from_value(json!({ "type": "RTMP_PUSH", "rtmp_input_name": "rtmpA" })).unwrap();
        assert_eq!(rtmp.input_type(), InputType::RtmpPush);
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(mp4().validate().is_ok());
        assert!(BroadcastInput::Gif { s3_url: "not a url".into() }.validate().is_err());
        assert!(BroadcastInput::RtmpPush {
            rtmp_input_name: " ".into()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_current_for_compares_timestamps() {
        let content = ContentItem {
            id: "ci".into(),
            conference_id: "c".into(),
            content_type_name: ContentType::VideoBroadcast,
            name: "Keynote".into(),
            data: json!({}),
            required_content_id: None,
            updated_at: Utc::now(),
        };
        let mut item = BroadcastContentItem::pending("c".into(), "ci".into(), InputType::Mp4);
        item.input = Some(mp4());
        item.updated_at = content.updated_at + Duration::seconds(1);
        assert!(item.is_current_for(&content));

        item.updated_at = content.updated_at - Duration::seconds(1);
        assert!(!item.is_current_for(&content));
    }
}
