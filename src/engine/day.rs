use chrono::NaiveTime;
use ulid::Ulid;

use crate::model::*;

/// Windows and bookings for one (owner, date). Both lists are kept sorted by
/// start time; bookings of every status are retained so cancelled ones stay
/// readable.
#[derive(Debug, Clone)]
pub struct DayState {
    pub key: DayKey,
    pub windows: Vec<AvailabilityWindow>,
    pub bookings: Vec<Booking>,
}

/// The exact-start uniqueness guard tripped: another live booking already
/// starts at this time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UniqueViolation {
    pub existing: Ulid,
    pub start: NaiveTime,
}

impl DayState {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            windows: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_active())
    }

    pub fn active_windows(&self) -> impl Iterator<Item = &AvailabilityWindow> {
        self.windows.iter().filter(|w| w.active)
    }

    /// Bookings (any status) whose span overlaps `query`.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn window(&self, id: Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Another active window starting at `start`, other than `exclude`.
    pub fn active_window_at(&self, start: NaiveTime, exclude: Option<Ulid>) -> Option<&AvailabilityWindow> {
        self.active_windows()
            .find(|w| w.span.start == start && Some(w.id) != exclude)
    }

    /// Check the exact-start uniqueness guard for `candidate`, ignoring the
    /// booking with the same id.
    pub(crate) fn unique_violation(&self, candidate: &Booking) -> Option<UniqueViolation> {
        if !candidate.is_active() {
            return None;
        }
        self.active_bookings()
            .find(|b| b.span.start == candidate.span.start && b.id != candidate.id)
            .map(|b| UniqueViolation { existing: b.id, start: b.span.start })
    }

    fn place_window(&mut self, window: AvailabilityWindow) {
        let pos = self
            .windows
            .partition_point(|w| w.span.start <= window.span.start);
        self.windows.insert(pos, window);
    }

    fn place_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    fn take_window(&mut self, id: Ulid) -> Option<AvailabilityWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    fn take_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Apply the part of `event` that concerns this day. Infallible: events
    /// are validated before they reach the WAL.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::WindowPut { window } => {
                if window.key() == self.key {
                    self.place_window(window.clone());
                }
            }
            Event::WindowUpdated { window, from } => {
                if *from == self.key {
                    self.take_window(window.id);
                }
                if window.key() == self.key {
                    self.take_window(window.id);
                    self.place_window(window.clone());
                }
            }
            Event::WindowRemoved { id, .. } => {
                self.take_window(*id);
            }
            Event::BookingCreated { booking } => {
                self.place_booking(booking.clone());
            }
            Event::BookingConfirmed { id, .. } => {
                if let Some(b) = self.booking_mut(*id) {
                    b.status = BookingStatus::Confirmed;
                }
            }
            Event::BookingCancelled { id, .. } => {
                if let Some(b) = self.booking_mut(*id) {
                    b.status = BookingStatus::Cancelled;
                }
            }
            Event::BookingRescheduled { booking, from } => {
                if *from == self.key {
                    self.take_booking(booking.id);
                }
                if booking.key() == self.key {
                    self.take_booking(booking.id);
                    self.place_booking(booking.clone());
                }
            }
            Event::MeetingLinkAttached { id, link, event_ref, .. } => {
                if let Some(b) = self.booking_mut(*id) {
                    b.meeting_link = Some(link.clone());
                    b.external_event_ref = event_ref.clone();
                }
            }
        }
    }
}
