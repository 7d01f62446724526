//! End to end: prepare a conference, render its broadcast items with a fake
//! encoder, then play the room schedule.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use playout_media::{Encoder, MediaError, MediaResult, RenderOutput, RenderRequest};
use playout_models::{
    BroadcastContentItem, Conference, ContentItem, ContentItemId, ContentType, Event, JobStatus, RenderSource,
    RenderTemplate, Room, RoomMode, Transition, TransitionId,
};
use playout_queue::LocalRenderQueue;
use playout_scheduler::{LogAlerter, LoggingSwitcher, ManualClock, RoomScheduler, SchedulerConfig};
use playout_store::{ContentStore, JobStore, MemoryStore, ScheduleStore};
use playout_worker::{PrepareOrchestrator, RenderContext, RenderOutcome, WorkerConfig};

/// Encoder that "renders" instantly. Countdowns fail when `fail_countdowns`
/// is set.
struct FakeEncoder {
    fail_countdowns: bool,
}

impl FakeEncoder {
    fn new(fail_countdowns: bool) -> Self {
        Self { fail_countdowns }
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn render(&self, request: &RenderRequest) -> MediaResult<RenderOutput> {
        if self.fail_countdowns && matches!(request.source, RenderSource::Countdown { .. }) {
            return Err(MediaError::unsupported_source("countdown renderer offline"));
        }
        Ok(RenderOutput {
            s3_url: format!("https://media.example.com/{}/{}.mp4", request.conference_id, request.job_id),
            duration_seconds: 5.0,
            width: 1920,
            height: 1080,
            size_bytes: 1024,
        })
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Conf {
    store: Arc<MemoryStore>,
    conference: Conference,
    titles: ContentItem,
    countdown: ContentItem,
}

async fn seed() -> Conf {
    let store = Arc::new(MemoryStore::new());
    let conference = Conference {
        id: "conf".into(),
        name: "RustConf".into(),
        render_template: Some(RenderTemplate::default()),
    };
    store.put_conference(conference.clone()).await.unwrap();

    let mut items = Vec::new();
    for (kind, data) in [
        (ContentType::VideoTitles, json!({"title": "Opening keynote"})),
        (ContentType::VideoCountdown, json!({"seconds": 10})),
    ] {
        let item = ContentItem {
            id: ContentItemId::new(),
            conference_id: conference.id.clone(),
            content_type_name: kind,
            name: "Opening".into(),
            data,
            required_content_id: None,
            updated_at: Utc::now(),
        };
        store.put_content_item(item.clone()).await.unwrap();
        items.push(item);
    }
    let countdown = items.pop().unwrap();
    let titles = items.pop().unwrap();

    store
        .put_room(Room {
            id: "room".into(),
            conference_id: conference.id.clone(),
            name: "Main stage".into(),
            current_mode: RoomMode::Presentation,
        })
        .await
        .unwrap();
    store
        .put_event(Event {
            id: "keynote".into(),
            conference_id: conference.id.clone(),
            room_id: "room".into(),
            name: "Keynote".into(),
            start_time: t0(),
            duration_seconds: 3600,
            intended_room_mode: RoomMode::Prerecorded,
            content_group_id: None,
        })
        .await
        .unwrap();

    Conf {
        store,
        conference,
        titles,
        countdown,
    }
}

/// Prepare the conference and run every render job once.
async fn prepare_and_render(conf: &Conf, encoder: FakeEncoder) -> JobStatus {
    let orchestrator = PrepareOrchestrator::new(conf.store.clone(), Arc::new(LocalRenderQueue::new()));
    let outcome = orchestrator.prepare(&conf.conference.id).await.unwrap();
    assert_eq!(outcome.render_jobs.len(), 2);

    let worker = RenderContext::new(
        &WorkerConfig::default(),
        conf.store.clone(),
        Arc::new(encoder),
        orchestrator,
        "worker-1",
    );
    for job in &outcome.render_jobs {
        let result = worker.process(&job.id).await.unwrap();
        assert!(matches!(
            result,
            RenderOutcome::Completed(_) | RenderOutcome::Failed(_) | RenderOutcome::Abandoned(_)
        ));
    }

    conf.store.get_prepare_job(&outcome.job.id).await.unwrap().status
}

async fn broadcast_item(conf: &Conf, item: &ContentItem) -> BroadcastContentItem {
    conf.store.find_broadcast_item(&item.id).await.unwrap().unwrap()
}

async fn schedule(conf: &Conf, id: &str, offset_secs: i64, primary: &BroadcastContentItem, fallback: Option<&BroadcastContentItem>) {
    conf.store
        .upsert_transition(Transition {
            id: id.into(),
            conference_id: conf.conference.id.clone(),
            event_id: "keynote".into(),
            room_id: "room".into(),
            broadcast_content_id: primary.id.clone(),
            fallback_broadcast_content_id: fallback.map(|f| f.id.clone()),
            time: t0() + Duration::seconds(offset_secs),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

fn scheduler(conf: &Conf, clock: Arc<ManualClock>, switcher: Arc<LoggingSwitcher>, alerter: Arc<LogAlerter>) -> RoomScheduler {
    RoomScheduler::new(
        "room".into(),
        conf.store.clone(),
        switcher,
        alerter,
        clock,
        &SchedulerConfig::default(),
    )
}

#[tokio::test]
async fn test_rendered_content_goes_on_air_in_order() {
    let conf = seed().await;
    let encoder = FakeEncoder::new(false);
    assert_eq!(prepare_and_render(&conf, encoder).await, JobStatus::Completed);

    let titles = broadcast_item(&conf, &conf.titles).await;
    let countdown = broadcast_item(&conf, &conf.countdown).await;
    assert!(titles.is_ready() && countdown.is_ready());

    schedule(&conf, "t1", 0, &countdown, None).await;
    schedule(&conf, "t2", 60, &titles, Some(&countdown)).await;

    let clock = Arc::new(ManualClock::new(t0()));
    let switcher = Arc::new(LoggingSwitcher::new());
    let alerter = Arc::new(LogAlerter::new());
    let mut room = scheduler(&conf, clock.clone(), switcher.clone(), alerter.clone());

    let report = room.run_due().await.unwrap();
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.next_wake, Some(t0() + Duration::seconds(60) - Duration::milliseconds(500)));

    clock.advance(Duration::seconds(60));
    let report = room.run_due().await.unwrap();
    assert_eq!(report.executed.len(), 1);

    let audit = conf.store.list_executed_transitions(&"room".into()).await.unwrap();
    let shown: Vec<_> = audit.iter().map(|e| (e.transition_id.clone(), e.broadcast_content_id.clone())).collect();
    assert_eq!(
        shown,
        vec![
            (TransitionId::from("t1"), countdown.id.clone()),
            (TransitionId::from("t2"), titles.id.clone()),
        ]
    );
    assert!(audit.iter().all(|e| !e.used_fallback));
    assert_eq!(switcher.history().len(), 2);
    assert!(alerter.recent().is_empty());

    let room_record = conf.store.get_room(&"room".into()).await.unwrap();
    assert_eq!(room_record.current_mode, RoomMode::Prerecorded);
}

#[tokio::test]
async fn test_failed_render_falls_back_on_air() {
    let conf = seed().await;
    assert_eq!(prepare_and_render(&conf, FakeEncoder::new(true)).await, JobStatus::Failed);

    let titles = broadcast_item(&conf, &conf.titles).await;
    let countdown = broadcast_item(&conf, &conf.countdown).await;
    assert!(!countdown.is_ready());

    schedule(&conf, "t1", 0, &countdown, Some(&titles)).await;

    let clock = Arc::new(ManualClock::new(t0()));
    let switcher = Arc::new(LoggingSwitcher::new());
    let alerter = Arc::new(LogAlerter::new());
    let mut room = scheduler(&conf, clock, switcher.clone(), alerter);

    // The titles render may have been abandoned after its sibling failed.
    let report = room.run_due().await.unwrap();
    if titles.is_ready() {
        assert_eq!(report.executed.len(), 1);
        assert!(report.executed[0].used_fallback);
        assert_eq!(report.executed[0].broadcast_content_id, titles.id);
    } else {
        assert!(report.executed.is_empty());
        assert_eq!(report.unready, vec![TransitionId::from("t1")]);
    }

    // Re-running never duplicates the audit row.
    room.run_due().await.unwrap();
    let audit = conf.store.list_executed_transitions(&"room".into()).await.unwrap();
    assert!(audit.len() <= 1);
}
