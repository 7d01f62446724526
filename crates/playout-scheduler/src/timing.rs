//! Pure schedule evaluation.
//!
//! Works out which event a room is in, whether the scheduler should drive
//! it, and in which order pending transitions run. Nothing here touches the
//! store, so every rule is testable with plain values.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use playout_models::{Event, ExecutedTransition, Transition};

/// The event live in a room at `now`. Events are not expected to overlap;
/// if they do, the one that started last wins.
pub fn active_event(events: &[Event], now: DateTime<Utc>) -> Option<&Event> {
    events
        .iter()
        .filter(|e| e.is_live_at(now))
        .max_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| b.id.cmp(&a.id)))
}

/// Start of the first event after `now`.
pub fn next_event_start(events: &[Event], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    events.iter().map(|e| e.start_time).filter(|start| *start > now).min()
}

/// Only automated-playout events are driven by the scheduler.
pub fn drives_playout(event: &Event) -> bool {
    event.intended_room_mode.is_automated_playout()
}

pub fn is_due(transition: &Transition, now: DateTime<Utc>, tolerance: Duration) -> bool {
    transition.time <= now + to_chrono(tolerance)
}

/// When to wake up for `transition`.
pub fn wake_at(transition: &Transition, tolerance: Duration) -> DateTime<Utc> {
    transition.time - to_chrono(tolerance)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Pending transitions sorted into what runs and what never will.
#[derive(Debug, Default, Clone)]
pub struct TransitionPlan {
    /// At most one per instant, in time order.
    pub queue: Vec<Transition>,
    /// Lost a same-instant tie, or their instant already had a switch.
    pub superseded: Vec<Transition>,
    /// Scheduled before a switch that already happened.
    pub missed: Vec<Transition>,
}

/// Order pending transitions against what the room has already executed.
///
/// Executed transitions go on air in non-decreasing time order, so a pending
/// transition earlier than the last executed one can no longer run. Among
/// transitions sharing an instant only the winner of
/// [`Transition::wins_tie_over`] runs.
pub fn plan_transitions(pending: Vec<Transition>, executed: &[ExecutedTransition]) -> TransitionPlan {
    let last_executed = executed.iter().map(|e| e.time).max();
    let executed_instants: BTreeSet<_> = executed.iter().map(|e| e.time).collect();

    let mut plan = TransitionPlan::default();
    let mut by_instant: BTreeMap<DateTime<Utc>, Vec<Transition>> = BTreeMap::new();
    for transition in pending {
        if last_executed.is_some_and(|last| transition.time < last) {
            plan.missed.push(transition);
        } else if executed_instants.contains(&transition.time) {
            plan.superseded.push(transition);
        } else {
            by_instant.entry(transition.time).or_default().push(transition);
        }
    }

    for (_, mut group) in by_instant {
        let mut best = 0;
        for (i, candidate) in group.iter().enumerate().skip(1) {
            if candidate.wins_tie_over(&group[best]) {
                best = i;
            }
        }
        plan.queue.push(group.swap_remove(best));
        plan.superseded.extend(group);
    }
    plan
}
