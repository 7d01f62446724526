//! Per-room scheduler actor.
//!
//! Each room is owned by one [`RoomScheduler`] task. It sleeps until the next
//! transition is due (or the poll interval passes), re-reads the schedule,
//! runs whatever is due and goes back to sleep. Schedule edits wake it early
//! through its [`RoomHandle`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use playout_models::{BroadcastContentItem, Event, EventId, ExecutedTransition, RoomId, Transition, TransitionId};
use playout_store::Store;

use crate::alert::{Alert, AlertKind, Alerter};
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::SchedulerResult;
use crate::metrics::names;
use crate::switcher::VideoSwitcher;
use crate::timing;

const MIN_WAIT: Duration = Duration::from_millis(10);

/// What one evaluation of a room did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Event live at evaluation time, driven or not
    pub active_event: Option<EventId>,
    pub executed: Vec<ExecutedTransition>,
    /// Due, but neither primary nor fallback was ready
    pub unready: Vec<TransitionId>,
    pub missed: Vec<TransitionId>,
    pub superseded: Vec<TransitionId>,
    /// When the room needs looking at again
    pub next_wake: Option<DateTime<Utc>>,
}

enum Step {
    Executed(ExecutedTransition),
    AlreadyExecuted,
    Unready,
    /// Edited or deleted since it was listed.
    Changed,
    SwitchFailed,
}

#[derive(Debug)]
pub enum RoomCommand {
    /// The schedule changed; re-read it now.
    Reload,
    Stop,
}

/// Address of a running room scheduler.
pub struct RoomHandle {
    room_id: RoomId,
    commands: mpsc::Sender<RoomCommand>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Wake the scheduler. A full mailbox already holds a pending reload.
    pub fn notify(&self) {
        let _ = self.commands.try_send(RoomCommand::Reload);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.commands.send(RoomCommand::Stop).await;
        if let Err(e) = self.task.await {
            warn!(room_id = %self.room_id, "Room scheduler ended abnormally: {}", e);
        }
    }
}

pub struct RoomScheduler {
    room_id: RoomId,
    store: Arc<dyn Store>,
    switcher: Arc<dyn VideoSwitcher>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    tolerance: Duration,
    poll_interval: Duration,
    alerted: HashSet<(TransitionId, AlertKind)>,
}

impl RoomScheduler {
    pub fn new(
        room_id: RoomId,
        store: Arc<dyn Store>,
        switcher: Arc<dyn VideoSwitcher>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            room_id,
            store,
            switcher,
            alerter,
            clock,
            tolerance: config.tolerance,
            poll_interval: config.poll_interval,
            alerted: HashSet::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Evaluate the room once and execute every transition that is due.
    pub async fn run_due(&mut self) -> SchedulerResult<RunReport> {
        let now = self.clock.now();
        let events = self.store.list_events_for_room(&self.room_id).await?;
        let mut report = RunReport::default();

        let Some(event) = timing::active_event(&events, now).cloned() else {
            report.next_wake = timing::next_event_start(&events, now);
            return Ok(report);
        };
        report.active_event = Some(event.id.clone());
        if !timing::drives_playout(&event) {
            debug!(room_id = %self.room_id, event_id = %event.id, "Event is not automated playout");
            report.next_wake = Some(event.end_time());
            return Ok(report);
        }
        self.reconcile_mode(&event).await?;

        let executed = self.store.list_executed_transitions(&self.room_id).await?;
        let executed_ids: HashSet<TransitionId> = executed.iter().map(|e| e.transition_id.clone()).collect();
        let pending: Vec<Transition> = self
            .store
            .list_transitions_for_room(&self.room_id)
            .await?
            .into_iter()
            .filter(|t| t.event_id == event.id && !executed_ids.contains(&t.id))
            .collect();
        let plan = timing::plan_transitions(pending, &executed);

        for transition in &plan.missed {
            report.missed.push(transition.id.clone());
            counter!(names::TRANSITIONS_SKIPPED_TOTAL, "reason" => "missed").increment(1);
            let message = format!(
                "transition {} at {} precedes a switch that already happened and will not run",
                transition.id, transition.time
            );
            self.raise_once(AlertKind::MissedTransition, transition, message).await;
        }
        for transition in &plan.superseded {
            debug!(transition_id = %transition.id, "Superseded by another transition at {}", transition.time);
            report.superseded.push(transition.id.clone());
        }

        for transition in plan.queue {
            if !timing::is_due(&transition, now, self.tolerance) {
                report.next_wake = Some(timing::wake_at(&transition, self.tolerance));
                break;
            }
            match self.execute(&transition).await? {
                Step::Executed(row) => report.executed.push(row),
                Step::AlreadyExecuted => {}
                Step::Unready => report.unready.push(transition.id.clone()),
                Step::Changed => {
                    report.next_wake = Some(now);
                    break;
                }
                Step::SwitchFailed => break,
            }
        }

        if report.next_wake.is_none() {
            report.next_wake = Some(event.end_time());
        }
        Ok(report)
    }

    async fn execute(&mut self, transition: &Transition) -> SchedulerResult<Step> {
        // Operators may have edited or deleted it since the listing.
        match self.store.get_transition(&transition.id).await? {
            Some(current) if current == *transition => {}
            _ => return Ok(Step::Changed),
        }

        let Some(item) = self.select_content(transition).await? else {
            counter!(names::TRANSITIONS_SKIPPED_TOTAL, "reason" => "no_ready_content").increment(1);
            let message = format!(
                "transition {}: neither {} nor fallback {} is ready",
                transition.id,
                transition.broadcast_content_id,
                transition
                    .fallback_broadcast_content_id
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("(none)")
            );
            self.raise_once(AlertKind::NoReadyContent, transition, message).await;
            return Ok(Step::Unready);
        };

        if let Err(e) = self.switcher.switch(&self.room_id, &item).await {
            let message = format!("transition {}: {}", transition.id, e);
            self.raise_once(AlertKind::SwitchFailed, transition, message).await;
            return Ok(Step::SwitchFailed);
        }

        let executed_at = self.clock.now();
        let row = ExecutedTransition::record(transition, item.id.clone(), executed_at);
        if !self.store.record_executed_transition(row.clone()).await? {
            info!(transition_id = %transition.id, "Transition was already recorded");
            return Ok(Step::AlreadyExecuted);
        }

        counter!(
            names::TRANSITIONS_EXECUTED_TOTAL,
            "used_fallback" => if row.used_fallback { "true" } else { "false" }
        )
        .increment(1);
        histogram!(names::SWITCH_LAG_SECONDS)
            .record((executed_at - transition.time).num_milliseconds().max(0) as f64 / 1000.0);
        info!(
            room_id = %self.room_id,
            transition_id = %transition.id,
            broadcast_content_id = %row.broadcast_content_id,
            used_fallback = row.used_fallback,
            "Executed transition"
        );
        Ok(Step::Executed(row))
    }

    /// Primary if ready, else the fallback if ready.
    async fn select_content(&self, transition: &Transition) -> SchedulerResult<Option<BroadcastContentItem>> {
        let primary = self.store.get_broadcast_item(&transition.broadcast_content_id).await?;
        if let Some(item) = primary.filter(BroadcastContentItem::is_ready) {
            return Ok(Some(item));
        }
        let Some(fallback_id) = &transition.fallback_broadcast_content_id else {
            return Ok(None);
        };
        let fallback = self.store.get_broadcast_item(fallback_id).await?;
        if let Some(item) = fallback.filter(BroadcastContentItem::is_ready) {
            warn!(
                transition_id = %transition.id,
                "Primary {} not ready, using fallback {}", transition.broadcast_content_id, fallback_id
            );
            return Ok(Some(item));
        }
        Ok(None)
    }

    async fn reconcile_mode(&self, event: &Event) -> SchedulerResult<()> {
        let room = self.store.get_room(&self.room_id).await?;
        if room.current_mode != event.intended_room_mode {
            info!(
                room_id = %self.room_id,
                event_id = %event.id,
                "Room mode {:?} -> {:?}", room.current_mode, event.intended_room_mode
            );
            self.store.set_room_mode(&self.room_id, event.intended_room_mode).await?;
        }
        Ok(())
    }

    async fn raise_once(&mut self, kind: AlertKind, transition: &Transition, message: String) {
        if !self.alerted.insert((transition.id.clone(), kind)) {
            return;
        }
        let alert = Alert::new(kind, self.room_id.clone(), Some(transition.id.clone()), message);
        if let Err(e) = self.alerter.alert(&alert).await {
            error!(room_id = %self.room_id, "Failed to deliver alert: {}", e);
        }
    }

    fn wait_until(&self, next_wake: Option<DateTime<Utc>>) -> Duration {
        let wait = match next_wake {
            Some(at) => (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
            None => self.poll_interval,
        };
        wait.clamp(MIN_WAIT, self.poll_interval.max(MIN_WAIT))
    }

    /// Run as a task until stopped.
    pub fn spawn(self) -> RoomHandle {
        let (commands, mailbox) = mpsc::channel(8);
        let room_id = self.room_id.clone();
        let span = info_span!("room", room_id = %room_id);
        let task = tokio::spawn(self.run(mailbox).instrument(span));
        RoomHandle {
            room_id,
            commands,
            task,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<RoomCommand>) {
        info!("Room scheduler started");
        loop {
            let wait = match self.run_due().await {
                Ok(report) => self.wait_until(report.next_wake),
                Err(e) => {
                    error!("Room evaluation failed: {}", e);
                    self.poll_interval
                }
            };
            tokio::select! {
                command = mailbox.recv() => match command {
                    Some(RoomCommand::Reload) => debug!("Schedule changed"),
                    Some(RoomCommand::Stop) | None => break,
                },
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!("Room scheduler stopped");
    }
}
