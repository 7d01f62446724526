//! Room scheduler supervision.
//!
//! Keeps one [`RoomScheduler`] running for every room this instance holds the
//! lease for, renews leases, restarts schedulers that died and forwards
//! schedule change notifications to the owning room.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::StreamExt;
use metrics::gauge;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use playout_models::RoomId;
use playout_queue::{ChangeKind, ScheduleChange, ScheduleChannel, ScheduleStream};
use playout_store::Store;

use crate::alert::Alerter;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::SchedulerResult;
use crate::lease::RoomLease;
use crate::metrics::names;
use crate::room::{RoomHandle, RoomScheduler};
use crate::switcher::VideoSwitcher;

pub struct Supervisor {
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    channel: Arc<dyn ScheduleChannel>,
    lease: Arc<dyn RoomLease>,
    switcher: Arc<dyn VideoSwitcher>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    rooms: HashMap<RoomId, RoomHandle>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        channel: Arc<dyn ScheduleChannel>,
        lease: Arc<dyn RoomLease>,
        switcher: Arc<dyn VideoSwitcher>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            channel,
            lease,
            switcher,
            alerter,
            clock,
            rooms: HashMap::new(),
        }
    }

    /// Rooms with a running scheduler on this instance.
    pub fn owned_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<_> = self.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Reconcile running schedulers with the room list and the leases.
    ///
    /// A room whose lease cannot be confirmed is treated as lost: its
    /// scheduler stops and the remaining rooms are still renewed.
    pub async fn refresh_rooms(&mut self) -> SchedulerResult<()> {
        let rooms = self.store.list_rooms().await?;
        let listed: HashSet<RoomId> = rooms.iter().map(|r| r.id.clone()).collect();

        let gone: Vec<RoomId> = self.rooms.keys().filter(|id| !listed.contains(*id)).cloned().collect();
        for room_id in gone {
            info!(room_id = %room_id, "Room removed, stopping its scheduler");
            self.stop_room(&room_id).await;
        }

        for room in rooms {
            let held = match self
                .lease
                .acquire(&room.id, &self.config.instance_id, self.config.lease_ttl)
                .await
            {
                Ok(held) => held,
                Err(e) => {
                    warn!(room_id = %room.id, "Could not confirm room lease: {}", e);
                    false
                }
            };
            let crashed = self.rooms.get(&room.id).is_some_and(RoomHandle::is_finished);
            if crashed {
                warn!(room_id = %room.id, "Room scheduler exited, restarting");
                self.rooms.remove(&room.id);
            }

            match (held, self.rooms.contains_key(&room.id)) {
                (true, false) => {
                    info!(room_id = %room.id, "Acquired room, starting scheduler");
                    let handle = RoomScheduler::new(
                        room.id.clone(),
                        Arc::clone(&self.store),
                        Arc::clone(&self.switcher),
                        Arc::clone(&self.alerter),
                        Arc::clone(&self.clock),
                        &self.config,
                    )
                    .spawn();
                    self.rooms.insert(room.id.clone(), handle);
                }
                (false, true) => {
                    warn!(room_id = %room.id, "Lost room lease, stopping scheduler");
                    if let Some(handle) = self.rooms.remove(&room.id) {
                        handle.stop().await;
                    }
                }
                (false, false) => debug!(room_id = %room.id, "Room is driven by another instance"),
                (true, true) => {}
            }
        }

        gauge!(names::ROOMS_OWNED).set(self.rooms.len() as f64);
        Ok(())
    }

    /// Forward a change to the room's scheduler. Returns false when the room
    /// is not driven here.
    pub async fn route(&mut self, change: &ScheduleChange) -> bool {
        if let Some(handle) = self.rooms.get(&change.room_id) {
            handle.notify();
            return true;
        }
        if change.kind == ChangeKind::RoomUpdated {
            if let Err(e) = self.refresh_rooms().await {
                warn!("Room refresh after change failed: {}", e);
            }
        }
        false
    }

    async fn stop_room(&mut self, room_id: &RoomId) {
        if let Some(handle) = self.rooms.remove(room_id) {
            handle.stop().await;
        }
        if let Err(e) = self.lease.release(room_id, &self.config.instance_id).await {
            warn!(room_id = %room_id, "Failed to release room lease: {}", e);
        }
    }

    /// Stop every room scheduler and give up the leases.
    pub async fn stop_all(&mut self) {
        let rooms: Vec<RoomId> = self.rooms.keys().cloned().collect();
        for room_id in rooms {
            self.stop_room(&room_id).await;
        }
        gauge!(names::ROOMS_OWNED).set(0.0);
    }

    async fn subscribe(&self) -> ScheduleStream {
        match self.channel.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                // Rooms still poll; the next refresh tick retries.
                warn!("Schedule change subscription failed: {}", e);
                Box::pin(futures_util::stream::pending())
            }
        }
    }

    /// Supervise until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        info!(instance_id = %self.config.instance_id, "Starting room supervisor");
        let mut changes = self.subscribe().await;
        let mut interval = tokio::time::interval(self.config.room_refresh_interval);
        let mut subscribed = true;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.refresh_rooms().await {
                        warn!("Room refresh failed: {}", e);
                    }
                    if !subscribed {
                        changes = self.subscribe().await;
                        subscribed = true;
                    }
                }
                change = changes.next() => match change {
                    Some(change) => {
                        self.route(&change).await;
                    }
                    None => {
                        warn!("Schedule change stream ended");
                        changes = Box::pin(futures_util::stream::pending());
                        subscribed = false;
                    }
                }
            }
        }

        info!("Stopping room schedulers");
        self.stop_all().await;
        Ok(())
    }
}
