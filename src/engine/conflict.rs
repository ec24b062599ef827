use ulid::Ulid;

use crate::model::*;

use super::error::ConflictKind;

// Every function here ignores cancelled bookings, whatever the caller passes in.

/// First live booking overlapping `span`, skipping `exclude`.
pub fn find_overlap<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    bookings
        .into_iter()
        .filter(|b| b.is_active() && Some(b.id) != exclude)
        .find(|b| b.span.overlaps(span))
}

/// True if `slot` overlaps any live booking.
pub fn is_occupied<'a>(bookings: impl IntoIterator<Item = &'a Booking>, slot: &Slot) -> bool {
    find_overlap(bookings, &slot.span, None).is_some()
}

/// Live booking covering exactly `span`, if any.
pub fn find_exact<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    span: &Span,
) -> Option<&'a Booking> {
    bookings
        .into_iter()
        .find(|b| b.is_active() && b.span == *span)
}

/// Booking to report against a slot: the exact match when there is one,
/// otherwise the first overlapping booking.
pub fn occupant(bookings: &[&Booking], slot: &Slot) -> Option<Ulid> {
    find_exact(bookings.iter().copied(), &slot.span)
        .or_else(|| find_overlap(bookings.iter().copied(), &slot.span, None))
        .map(|b| b.id)
}

pub(crate) fn overlap_conflict(booking: &Booking) -> ConflictKind {
    ConflictKind::Overlap {
        booking_id: booking.id,
        date: booking.date,
        start: booking.span.start,
        end: booking.span.end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booking(start: NaiveTime, end: NaiveTime, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            requester: Ulid::new(),
            owner: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            span: Span::new(start, end),
            timezone: "UTC".into(),
            status,
            purpose: "sync".into(),
            notes: None,
            meeting_link: None,
            external_event_ref: None,
        }
    }

    fn slot(start: NaiveTime, end: NaiveTime) -> Slot {
        Slot { span: Span::new(start, end), window_id: Ulid::new() }
    }

    #[test]
    fn adjacent_booking_does_not_occupy() {
        let b = booking(t(9, 0), t(9, 30), BookingStatus::Confirmed);
        assert!(!is_occupied([&b], &slot(t(9, 30), t(10, 0))));
        assert!(is_occupied([&b], &slot(t(9, 0), t(9, 30))));
    }

    #[test]
    fn partial_overlap_occupies() {
        let b = booking(t(9, 15), t(9, 45), BookingStatus::Pending);
        assert!(is_occupied([&b], &slot(t(9, 0), t(9, 30))));
        assert!(is_occupied([&b], &slot(t(9, 30), t(10, 0))));
    }

    #[test]
    fn cancelled_bookings_are_ignored() {
        let b = booking(t(9, 0), t(9, 30), BookingStatus::Cancelled);
        assert!(!is_occupied([&b], &slot(t(9, 0), t(9, 30))));
        assert!(find_exact([&b], &Span::new(t(9, 0), t(9, 30))).is_none());
    }

    #[test]
    fn exclude_skips_self() {
        let b = booking(t(9, 0), t(10, 0), BookingStatus::Confirmed);
        let span = Span::new(t(9, 30), t(10, 30));
        assert!(find_overlap([&b], &span, Some(b.id)).is_none());
        assert_eq!(find_overlap([&b], &span, None).unwrap().id, b.id);
    }

    #[test]
    fn occupant_prefers_exact_match() {
        let wide = booking(t(8, 45), t(9, 15), BookingStatus::Confirmed);
        let exact = booking(t(9, 0), t(9, 30), BookingStatus::Confirmed);
        let s = slot(t(9, 0), t(9, 30));
        assert_eq!(occupant(&[&wide, &exact], &s), Some(exact.id));
        assert_eq!(occupant(&[&wide], &s), Some(wide.id));
        assert_eq!(occupant(&[], &s), None);
    }

    #[test]
    fn overlap_conflict_names_interval() {
        let b = booking(t(9, 0), t(9, 30), BookingStatus::Confirmed);
        match overlap_conflict(&b) {
            ConflictKind::Overlap { booking_id, start, end, .. } => {
                assert_eq!(booking_id, b.id);
                assert_eq!((start, end), (t(9, 0), t(9, 30)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
