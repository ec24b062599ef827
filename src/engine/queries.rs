use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::slots::generate_merged;

use super::conflict::occupant;
use super::day::DayState;
use super::{Engine, EngineError};

// Reads work from committed snapshots and never wait on a writer.

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if from > to {
        return Err(EngineError::validation("date_range", "start date is after end date"));
    }
    if (to - from).num_days() > MAX_LIST_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

impl Engine {
    /// Slots for one owner and date, computed from active windows and
    /// marked against live bookings.
    pub fn available_slots(&self, owner: UserId, date: NaiveDate) -> Vec<SlotView> {
        let Some(day) = self.snapshot(DayKey::new(owner, date)) else {
            return Vec::new();
        };
        let live: Vec<&Booking> = day.active_bookings().collect();
        generate_merged(day.active_windows())
            .into_iter()
            .map(|slot| {
                let booking_id = occupant(&live, &slot);
                SlotView {
                    start: slot.span.start,
                    end: slot.span.end,
                    available: booking_id.is_none(),
                    booking_id,
                }
            })
            .collect()
    }

    pub fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        // The index can briefly point at the old day of a booking being moved.
        for _ in 0..MAX_LOCATE_ATTEMPTS {
            let key = self
                .booking_index
                .get(&id)
                .map(|e| *e.value())
                .ok_or(EngineError::NotFound(id))?;
            if let Some(b) = self.snapshot(key).and_then(|d| d.booking(id).cloned()) {
                return Ok(b);
            }
        }
        Err(EngineError::NotFound(id))
    }

    pub fn get_window(&self, id: Ulid) -> Result<AvailabilityWindow, EngineError> {
        for _ in 0..MAX_LOCATE_ATTEMPTS {
            let key = self
                .window_index
                .get(&id)
                .map(|e| *e.value())
                .ok_or(EngineError::NotFound(id))?;
            if let Some(w) = self.snapshot(key).and_then(|d| d.window(id).cloned()) {
                return Ok(w);
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Snapshots of an owner's days in `[from, to]`, in date order.
    fn owner_days(&self, owner: UserId, from: NaiveDate, to: NaiveDate) -> Vec<Arc<DayState>> {
        let dates: Vec<NaiveDate> = self
            .owner_dates
            .get(&owner)
            .map(|d| d.range(from..=to).copied().collect())
            .unwrap_or_default();
        dates
            .into_iter()
            .filter_map(|date| self.snapshot(DayKey::new(owner, date)))
            .collect()
    }

    /// All of an owner's windows in `[from, to]`, active or not, ordered by
    /// date then start.
    pub fn list_windows(
        &self,
        owner: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        self.collect_windows(owner, from, to, false)
    }

    /// Only the windows that currently produce slots.
    pub fn list_active_windows(
        &self,
        owner: UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        self.collect_windows(owner, from, to, true)
    }

    fn collect_windows(
        &self,
        owner: UserId,
        from: NaiveDate,
        to: NaiveDate,
        active_only: bool,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        check_range(from, to)?;
        let mut windows: Vec<AvailabilityWindow> = self
            .owner_days(owner, from, to)
            .iter()
            .flat_map(|day| day.windows.iter())
            .filter(|w| !active_only || w.active)
            .cloned()
            .collect();
        windows.sort_by_key(|w| (w.date, w.span.start));
        Ok(windows)
    }

    /// Bookings of any status matching `filter`, ordered by date then start.
    pub fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let days: Vec<Arc<DayState>> = match filter.owner {
            Some(owner) => {
                let from = filter.from.unwrap_or(NaiveDate::MIN);
                let to = filter.to.unwrap_or(NaiveDate::MAX);
                if from > to {
                    return Vec::new();
                }
                self.owner_days(owner, from, to)
            }
            None => self.days.iter().map(|e| e.value().snapshot()).collect(),
        };
        let mut bookings: Vec<Booking> = days
            .iter()
            .flat_map(|day| day.bookings.iter())
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| (b.date, b.span.start, b.id));
        bookings
    }

    pub fn booking_stats(&self, filter: &BookingFilter) -> BookingStats {
        let mut stats = BookingStats::default();
        for b in self.list_bookings(filter) {
            stats.record(b.status);
        }
        stats
    }

    /// A requester's live bookings from today on, soonest first.
    pub fn upcoming_for_requester(&self, requester: UserId, limit: usize) -> Vec<Booking> {
        let filter = BookingFilter {
            requester: Some(requester),
            from: Some(self.options.clock.today(requester)),
            ..Default::default()
        };
        self.list_bookings(&filter)
            .into_iter()
            .filter(|b| b.is_active())
            .take(limit)
            .collect()
    }

    /// An owner's live bookings on one date, by start time.
    pub fn agenda_for_owner(&self, owner: UserId, date: NaiveDate) -> Vec<Booking> {
        self.snapshot(DayKey::new(owner, date))
            .map(|day| day.active_bookings().cloned().collect())
            .unwrap_or_default()
    }
}
