//! Rooms, events, transitions and executed transitions.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    BroadcastContentItemId, ConferenceId, ContentGroupId, EventId, ExecutedTransitionId, RoomId, TransitionId,
};

/// Operating mode of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomMode {
    Prerecorded,
    Presentation,
    QAndA,
    Breakout,
    VideoChat,
    Shuffle,
    None,
}

impl RoomMode {
    /// Whether the playout scheduler drives the room in this mode.
    /// Every other mode is under live or human control.
    pub fn is_automated_playout(&self) -> bool {
        matches!(self, RoomMode::Prerecorded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Room {
    pub id: RoomId,
    pub conference_id: ConferenceId,
    pub name: String,
    #[serde(rename = "current_mode_name")]
    pub current_mode: RoomMode,
}

/// A scheduled slot in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub id: EventId,
    pub conference_id: ConferenceId,
    pub room_id: RoomId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    #[serde(rename = "intended_room_mode_name")]
    pub intended_room_mode: RoomMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_group_id: Option<ContentGroupId>,
}

impl Event {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::seconds(self.duration_seconds.max(0))
    }

    /// Half-open: live from `start_time` up to, not including, `end_time`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time()
    }
}

/// A planned switch of a room's on-air content. Mutable until executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    pub id: TransitionId,
    pub conference_id: ConferenceId,
    pub event_id: EventId,
    pub room_id: RoomId,
    pub broadcast_content_id: BroadcastContentItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_broadcast_content_id: Option<BroadcastContentItemId>,
    pub time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Transition {
    /// Total execution order within a room.
    pub fn schedule_key(&self) -> (DateTime<Utc>, &TransitionId) {
        (self.time, &self.id)
    }

    /// Does `self` win over `other` when both are due at the same instant?
    /// The most recently created one wins; equal creation times go to the
    /// smaller id.
    pub fn wins_tie_over(&self, other: &Transition) -> bool {
        (std::cmp::Reverse(self.created_at), &self.id) < (std::cmp::Reverse(other.created_at), &other.id)
    }
}

/// Immutable record that a switch was carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutedTransition {
    pub id: ExecutedTransitionId,
    /// Unique: a transition executes at most once
    pub transition_id: TransitionId,
    pub conference_id: ConferenceId,
    pub event_id: EventId,
    pub room_id: RoomId,
    /// Content actually shown (primary or fallback)
    pub broadcast_content_id: BroadcastContentItemId,
    /// Scheduled time of the transition
    pub time: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
    pub used_fallback: bool,
}

impl ExecutedTransition {
    pub fn record(transition: &Transition, shown: BroadcastContentItemId, executed_at: DateTime<Utc>) -> Self {
        let used_fallback = shown != transition.broadcast_content_id;
        Self {
            id: ExecutedTransitionId::new(),
            transition_id: transition.id.clone(),
            conference_id: transition.conference_id.clone(),
            event_id: transition.event_id.clone(),
            room_id: transition.room_id.clone(),
            broadcast_content_id: shown,
            time: transition.time,
            executed_at,
            used_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(id: &str, created_offset: i64) -> Transition {
        let base = Utc::now();
        Transition {
            id: id.into(),
            conference_id: "c".into(),
            event_id: "e".into(),
            room_id: "r".into(),
            broadcast_content_id: "a".into(),
            fallback_broadcast_content_id: None,
            time: base,
            created_at: base + Duration::seconds(created_offset),
        }
    }

    #[test]
    fn test_only_prerecorded_is_automated() {
        assert!(RoomMode::Prerecorded.is_automated_playout());
        assert!(!RoomMode::Presentation.is_automated_playout());
        assert!(!RoomMode::QAndA.is_automated_playout());
        assert!(!RoomMode::Breakout.is_automated_playout());
        assert_eq!(serde_json::to_string(&RoomMode::QAndA).unwrap(), "\"Q_AND_A\"");
    }

    #[test]
    fn test_event_window_is_half_open() {
        let start = Utc::now();
        let event = Event {
            id: "e".into(),
            conference_id: "c".into(),
            room_id: "r".into(),
            name: "Talk".into(),
            start_time: start,
            duration_seconds: 60,
            intended_room_mode: RoomMode::Prerecorded,
            content_group_id: None,
        };
        assert!(event.is_live_at(start));
        assert!(event.is_live_at(start + Duration::seconds(59)));
        assert!(!event.is_live_at(start + Duration::seconds(60)));
        assert!(!event.is_live_at(start - Duration::seconds(1)));
    }

    #[test]
    fn test_tie_break_prefers_latest_created_then_smaller_id() {
        let old = transition("a", 0);
        let newer = transition("b", 5);
        assert!(newer.wins_tie_over(&old));
        assert!(!old.wins_tie_over(&newer));

        let mut x = transition("x", 0);
        let mut y = transition("y", 0);
        y.created_at = x.created_at;
        x.time = y.time;
        assert!(x.wins_tie_over(&y));
        assert!(!y.wins_tie_over(&x));
    }

    #[test]
    fn test_record_marks_fallback() {
        let t = transition("t", 0);
        let primary = ExecutedTransition::record(&t, "a".into(), Utc::now());
        assert!(!primary.used_fallback);
        let fallback = ExecutedTransition::record(&t, "b".into(), Utc::now());
        assert!(fallback.used_fallback);
        assert_eq!(fallback.transition_id, t.id);
        assert_eq!(fallback.time, t.time);
    }
}
