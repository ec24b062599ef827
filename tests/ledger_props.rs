//! Random create / cancel / reschedule sequences against a real engine.
//! Whatever the sequence, live bookings never overlap, the slot view agrees
//! with the ledger, and a restart replays to the same state.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use proptest::prelude::*;
use ulid::Ulid;

use slotbook::clock::FixedClock;
use slotbook::engine::{Engine, EngineError, EngineOptions};
use slotbook::model::*;
use slotbook::notify::NotifyHub;

#[derive(Debug, Clone)]
enum Op {
    Create { day: u8, slot: u8, len: u8 },
    Cancel { pick: usize },
    Reschedule { pick: usize, day: u8, slot: u8, len: u8 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..2, 0u8..16, 1u8..4).prop_map(|(day, slot, len)| Op::Create { day, slot, len }),
        1 => any::<usize>().prop_map(|pick| Op::Cancel { pick }),
        2 => (any::<usize>(), 0u8..2, 0u8..16, 1u8..4)
            .prop_map(|(pick, day, slot, len)| Op::Reschedule { pick, day, slot, len }),
    ]
}

fn config() -> ProptestConfig {
    ProptestConfig::with_cases(48)
}

fn date(day: u8) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap() + TimeDelta::days(i64::from(day))
}

/// 15-minute grid from 09:00; `len` grid steps long.
fn interval(slot: u8, len: u8) -> (NaiveTime, NaiveTime) {
    let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap() + TimeDelta::minutes(15 * i64::from(slot));
    (start, start + TimeDelta::minutes(15 * i64::from(len)))
}

fn options() -> EngineOptions {
    EngineOptions {
        clock: Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        )),
        ..Default::default()
    }
}

fn wal_path() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_props");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}.wal", Ulid::new()))
}

fn assert_no_live_overlap(engine: &Engine, owner: UserId) {
    for day in 0..2 {
        let live = engine.agenda_for_owner(owner, date(day));
        for pair in live.windows(2) {
            assert!(
                pair[0].span.end <= pair[1].span.start,
                "live bookings overlap: {:?} and {:?}",
                pair[0].span,
                pair[1].span
            );
        }
    }
}

fn assert_slots_agree(engine: &Engine, owner: UserId) {
    for day in 0..2 {
        let live = engine.agenda_for_owner(owner, date(day));
        for slot in engine.available_slots(owner, date(day)) {
            let span = Span::new(slot.start, slot.end);
            let occupied = live.iter().any(|b| b.span.overlaps(&span));
            assert_eq!(slot.available, !occupied, "slot {span:?} disagrees with ledger");
            if let Some(id) = slot.booking_id {
                assert!(live.iter().any(|b| b.id == id && b.span.overlaps(&span)));
            }
        }
    }
}

async fn run(ops: Vec<Op>) {
    let path = wal_path();
    let owner = Ulid::new();
    let admin = Actor::new(owner, Role::Admin);
    let requester = Actor::new(Ulid::new(), Role::Requester);

    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), options()).unwrap();
    for day in 0..2 {
        engine
            .put_window(
                &admin,
                WindowDraft {
                    owner,
                    date: date(day),
                    start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                    slot_minutes: 30,
                    active: true,
                },
            )
            .await
            .unwrap();
    }

    let mut created: Vec<Ulid> = Vec::new();
    for op in ops {
        match op {
            Op::Create { day, slot, len } => {
                let (start, end) = interval(slot, len);
                let req = BookingRequest {
                    requester: requester.id,
                    owner,
                    date: date(day),
                    start,
                    end,
                    purpose: "prop".into(),
                    timezone: "UTC".into(),
                    notes: None,
                };
                match engine.create_booking(req).await {
                    Ok(b) => created.push(b.id),
                    Err(e) => assert!(e.is_conflict(), "unexpected create error: {e}"),
                }
            }
            Op::Cancel { pick } if !created.is_empty() => {
                let id = created[pick % created.len()];
                if let Err(e) = engine.cancel_booking(id, &requester).await {
                    assert!(e.is_conflict(), "unexpected cancel error: {e}");
                }
            }
            Op::Reschedule { pick, day, slot, len } if !created.is_empty() => {
                let id = created[pick % created.len()];
                let before = engine.get_booking(id).unwrap();
                let (start, end) = interval(slot, len);
                match engine.reschedule_booking(id, &requester, date(day), start, end).await {
                    Ok(after) => {
                        assert_eq!(after.date, date(day));
                        assert_eq!(engine.get_booking(id).unwrap(), after);
                    }
                    Err(EngineError::Conflict(_)) => {
                        assert_eq!(engine.get_booking(id).unwrap(), before);
                    }
                    Err(e) => panic!("unexpected reschedule error: {e}"),
                }
            }
            Op::Cancel { .. } | Op::Reschedule { .. } => {}
        }
        assert_no_live_overlap(&engine, owner);
    }
    assert_slots_agree(&engine, owner);

    // Every booking ever created is still on record exactly once.
    let all = engine.list_bookings(&BookingFilter { owner: Some(owner), ..Default::default() });
    assert_eq!(all.len(), created.len());

    let replayed = Engine::new(path, Arc::new(NotifyHub::new()), options()).unwrap();
    assert_eq!(
        replayed.list_bookings(&BookingFilter { owner: Some(owner), ..Default::default() }),
        all
    );
}

proptest! {
    #![proptest_config(config())]

    #[test]
    fn live_bookings_never_overlap(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(run(ops));
    }
}
