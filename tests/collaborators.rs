use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use slotbook::clock::FixedClock;
use slotbook::collab::{
    spawn_calendar_sync, spawn_notifier, CalendarSync, CollabError, LogNotifier, MeetingDetails,
    Notifier,
};
use slotbook::engine::{Engine, EngineOptions};
use slotbook::model::*;
use slotbook::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

fn start_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let options = EngineOptions {
        clock: Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        )),
        ..Default::default()
    };
    Arc::new(Engine::new(dir.join(name), Arc::new(NotifyHub::new()), options).unwrap())
}

fn request(owner: UserId, hour: u32) -> BookingRequest {
    BookingRequest {
        requester: Ulid::new(),
        owner,
        date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        start: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(hour, 30, 0).unwrap(),
        purpose: "Quarterly review".into(),
        timezone: "UTC".into(),
        notes: Some("bring numbers".into()),
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<(&'static str, Ulid)>>,
}

impl RecordingNotifier {
    fn seen(&self) -> Vec<(&'static str, Ulid)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, event: &BookingEvent) -> Result<(), CollabError> {
        self.seen.lock().unwrap().push((event.label(), event.booking().id));
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn deliver(&self, _event: &BookingEvent) -> Result<(), CollabError> {
        Err(CollabError::Unavailable("smtp down".into()))
    }
}

struct FakeCalendar {
    fail: bool,
    cancelled: Mutex<Vec<Ulid>>,
}

impl FakeCalendar {
    fn new(fail: bool) -> Self {
        Self { fail, cancelled: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl CalendarSync for FakeCalendar {
    fn name(&self) -> &'static str {
        "fake-calendar"
    }

    async fn create_event(&self, booking: &Booking) -> Result<Option<MeetingDetails>, CollabError> {
        if self.fail {
            return Err(CollabError::Rejected("quota exceeded".into()));
        }
        Ok(Some(MeetingDetails {
            link: format!("https://meet.example/{}", booking.id),
            event_ref: Some(format!("evt-{}", booking.id)),
        }))
    }

    async fn cancel_event(&self, booking: &Booking) -> Result<(), CollabError> {
        self.cancelled.lock().unwrap().push(booking.id);
        Ok(())
    }
}

// ── Notifiers ────────────────────────────────────────────────

#[tokio::test]
async fn notifier_sees_every_committed_change() {
    let engine = start_engine("notifier.wal");
    let recorder = Arc::new(RecordingNotifier::default());
    spawn_notifier(&engine.notify, recorder.clone());

    let owner = Ulid::new();
    let b = engine.create_booking(request(owner, 9)).await.unwrap();
    let requester = Actor::new(b.requester, Role::Requester);
    engine.cancel_booking(b.id, &requester).await.unwrap();

    eventually("two notifications", || recorder.seen().len() == 2).await;
    assert_eq!(recorder.seen(), vec![("created", b.id), ("cancelled", b.id)]);
}

#[tokio::test]
async fn failing_notifier_does_not_affect_the_ledger() {
    let engine = start_engine("failing_notifier.wal");
    spawn_notifier(&engine.notify, Arc::new(FailingNotifier));
    spawn_notifier(&engine.notify, Arc::new(LogNotifier));
    let recorder = Arc::new(RecordingNotifier::default());
    spawn_notifier(&engine.notify, recorder.clone());

    let owner = Ulid::new();
    let first = engine.create_booking(request(owner, 9)).await.unwrap();
    let second = engine.create_booking(request(owner, 10)).await.unwrap();

    eventually("both creations", || recorder.seen().len() == 2).await;
    assert_eq!(engine.agenda_for_owner(owner, first.date), vec![first, second]);
}

// ── Calendar sync ────────────────────────────────────────────

#[tokio::test]
async fn calendar_link_is_attached_after_creation() {
    let engine = start_engine("calendar.wal");
    let calendar = Arc::new(FakeCalendar::new(false));
    spawn_calendar_sync(&engine, calendar.clone());

    let owner = Ulid::new();
    let b = engine.create_booking(request(owner, 9)).await.unwrap();
    assert_eq!(b.meeting_link, None);

    eventually("meeting link", || {
        engine.get_booking(b.id).unwrap().meeting_link.is_some()
    })
    .await;
    let stored = engine.get_booking(b.id).unwrap();
    assert_eq!(stored.meeting_link, Some(format!("https://meet.example/{}", b.id)));
    assert_eq!(stored.external_event_ref, Some(format!("evt-{}", b.id)));

    let requester = Actor::new(b.requester, Role::Requester);
    engine.cancel_booking(b.id, &requester).await.unwrap();
    eventually("calendar cancellation", || {
        calendar.cancelled.lock().unwrap().contains(&b.id)
    })
    .await;
}

#[tokio::test]
async fn calendar_failure_leaves_booking_in_place() {
    let engine = start_engine("calendar_failure.wal");
    spawn_calendar_sync(&engine, Arc::new(FakeCalendar::new(true)));
    let recorder = Arc::new(RecordingNotifier::default());
    spawn_notifier(&engine.notify, recorder.clone());

    let owner = Ulid::new();
    let b = engine.create_booking(request(owner, 9)).await.unwrap();

    eventually("creation notice", || recorder.seen().len() == 1).await;
    // Give the calendar task a chance to run and fail.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = engine.get_booking(b.id).unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.meeting_link, None);
}

#[tokio::test]
async fn booking_events_serialize_for_delivery() {
    let engine = start_engine("json.wal");
    let mut rx = engine.notify.subscribe();
    let b = engine.create_booking(request(Ulid::new(), 9)).await.unwrap();

    let event = rx.recv().await.unwrap();
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "created");
    assert_eq!(json["booking"]["status"], "confirmed");
    assert_eq!(json["booking"]["id"], b.id.to_string());
    assert_eq!(json["booking"]["span"]["start"], "09:00:00");
}
