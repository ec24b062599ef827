//! Slot generation: cut an availability window into fixed-length candidates.

use crate::model::*;

/// Cut `window` into back-to-back slots of its configured length.
///
/// Starts at the window start and stops as soon as the next slot would run
/// past the window end, so a trailing remainder never becomes a short slot.
/// A slot that would wrap past midnight is treated the same way.
pub fn generate(window: &AvailabilityWindow) -> Vec<Slot> {
    let step = window.slot_duration.as_delta();
    let mut slots = Vec::new();
    let mut cursor = window.span.start;

    loop {
        let (next, wrapped) = cursor.overflowing_add_signed(step);
        if wrapped != 0 || next > window.span.end {
            break;
        }
        slots.push(Slot {
            span: Span::new(cursor, next),
            window_id: window.id,
        });
        cursor = next;
    }

    slots
}

/// Generate slots for several windows of the same owner/date and merge them
/// into start-time order. Overlapping windows produce overlapping candidates;
/// that is left for the admin to fix.
pub fn generate_merged<'a>(windows: impl IntoIterator<Item = &'a AvailabilityWindow>) -> Vec<Slot> {
    let mut slots: Vec<Slot> = windows.into_iter().flat_map(generate).collect();
    slots.sort_by_key(|s| (s.span.start, s.span.end));
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;
    use ulid::Ulid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime, minutes: u32) -> AvailabilityWindow {
        AvailabilityWindow {
            id: Ulid::new(),
            owner: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            span: Span::new(start, end),
            slot_duration: SlotDuration::from_minutes(minutes).unwrap(),
            active: true,
        }
    }

    #[test]
    fn one_hour_in_half_hours() {
        let w = window(t(9, 0), t(10, 0), 30);
        let spans: Vec<Span> = generate(&w).into_iter().map(|s| s.span).collect();
        assert_eq!(
            spans,
            vec![Span::new(t(9, 0), t(9, 30)), Span::new(t(9, 30), t(10, 0))]
        );
    }

    #[test]
    fn remainder_is_dropped() {
        // 09:00-10:50 with 30-minute slots: the last 20 minutes are unusable.
        let w = window(t(9, 0), t(10, 50), 30);
        let slots = generate(&w);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots.last().unwrap().span.end, t(10, 30));
    }

    #[test]
    fn window_shorter_than_duration_yields_nothing() {
        let w = window(t(9, 0), t(9, 45), 60);
        assert!(generate(&w).is_empty());
        assert_eq!(w.total_slots(), 0);
    }

    #[test]
    fn slots_carry_source_window() {
        let w = window(t(9, 0), t(10, 0), 15);
        assert!(generate(&w).iter().all(|s| s.window_id == w.id));
    }

    #[test]
    fn late_window_does_not_wrap_past_midnight() {
        let w = window(t(23, 0), NaiveTime::from_hms_opt(23, 59, 59).unwrap(), 30);
        let slots = generate(&w);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].span, Span::new(t(23, 0), t(23, 30)));
    }

    #[test]
    fn merged_windows_sorted_by_start() {
        let afternoon = window(t(14, 0), t(15, 0), 30);
        let morning = window(t(9, 0), t(10, 0), 60);
        let merged = generate_merged([&afternoon, &morning]);
        let starts: Vec<NaiveTime> = merged.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![t(9, 0), t(14, 0), t(14, 30)]);
    }

    #[test]
    fn overlapping_windows_yield_duplicate_candidates() {
        let a = window(t(9, 0), t(10, 0), 30);
        let b = window(t(9, 0), t(9, 30), 30);
        let merged = generate_merged([&a, &b]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], merged[1]);
    }

    fn arb_window() -> impl Strategy<Value = AvailabilityWindow> {
        (0u32..23 * 60, 1u32..12 * 60, prop::sample::select(vec![15u32, 30, 60])).prop_map(
            |(start_min, len_min, dur)| {
                let start = t(start_min / 60, start_min % 60);
                let end_min = (start_min + len_min).min(23 * 60 + 59);
                let end = t(end_min / 60, end_min % 60);
                window(start, end, dur)
            },
        )
    }

    proptest! {
        #[test]
        fn slots_have_exact_length(w in arb_window()) {
            for s in generate(&w) {
                prop_assert_eq!(s.span.duration(), w.slot_duration.as_delta());
            }
        }

        #[test]
        fn slots_tile_window_from_start(w in arb_window()) {
            let slots = generate(&w);
            let mut cursor = w.span.start;
            for s in &slots {
                prop_assert_eq!(s.span.start, cursor);
                prop_assert!(w.span.contains_span(&s.span));
                cursor = s.span.end;
            }
            // Whatever is left is too short for one more slot.
            prop_assert!(w.span.end - cursor < w.slot_duration.as_delta());
        }

        #[test]
        fn generation_is_deterministic(w in arb_window()) {
            prop_assert_eq!(generate(&w), generate(&w));
        }
    }
}
