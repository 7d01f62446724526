//! Prepare jobs and render jobs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    BroadcastContentItemId, ConferenceId, ContentItemId, JobStatus, ModelError, ModelResult, PrepareJobId,
    RenderJobId, RenderSource,
};

/// One "prepare this conference's broadcast assets" run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConferencePrepareJob {
    pub id: PrepareJobId,
    pub conference_id: ConferenceId,
    #[serde(rename = "job_status_name")]
    pub status: JobStatus,
    /// Operator-facing explanation, set when the job fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConferencePrepareJob {
    pub fn new(conference_id: ConferenceId) -> Self {
        let now = Utc::now();
        Self {
            id: PrepareJobId::new(),
            conference_id,
            status: JobStatus::New,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting steps outside the job lifecycle.
    pub fn apply_status(&mut self, next: JobStatus, message: Option<String>) -> ModelResult<()> {
        self.status = self.status.transition(next)?;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Parameters a render job is created with, stored under `data.params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderParams {
    pub content_item_id: ContentItemId,
    pub source: RenderSource,
}

/// One unit of rendering work within a prepare job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRenderJob {
    pub id: RenderJobId,
    pub conference_id: ConferenceId,
    #[serde(rename = "conference_prepare_job_id")]
    pub prepare_job_id: PrepareJobId,
    pub broadcast_content_item_id: BroadcastContentItemId,
    #[serde(rename = "job_status_name")]
    pub status: JobStatus,
    /// Job parameters plus metadata appended by the worker. Keys are never overwritten.
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Earlier failed job for the same broadcast item that this one replaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_job_id: Option<RenderJobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRenderJob {
    pub fn new(
        prepare_job: &ConferencePrepareJob,
        broadcast_content_item_id: BroadcastContentItemId,
        params: &RenderParams,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RenderJobId::new(),
            conference_id: prepare_job.conference_id.clone(),
            prepare_job_id: prepare_job.id.clone(),
            broadcast_content_item_id,
            status: JobStatus::New,
            data: json!({ "params": params }),
            message: None,
            supersedes_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn superseding(mut self, previous: Option<RenderJobId>) -> Self {
        self.supersedes_job_id = previous;
        self
    }

    /// Decode the parameters stored when the job was created.
    pub fn params(&self) -> ModelResult<RenderParams> {
        let raw = self
            .data
            .get("params")
            .cloned()
            .ok_or_else(|| ModelError::malformed_data(format!("render job {} has no params", self.id)))?;
        serde_json::from_value(raw).map_err(|e| ModelError::malformed_data(e.to_string()))
    }

    pub fn apply_status(&mut self, next: JobStatus, message: Option<String>) -> ModelResult<()> {
        self.status = self.status.transition(next)?;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn merge_data(&mut self, patch: Value) {
        merge_data_append(&mut self.data, patch);
    }
}

/// Merge `patch` into `target` without overwriting anything already present.
///
/// Objects merge key by key and recurse into nested objects. A key that
/// already holds a non-object value keeps it. A `null` target takes the patch.
pub fn merge_data_append(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_data_append(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot @ Value::Null, value) => *slot = value,
        _ => {}
    }
}
