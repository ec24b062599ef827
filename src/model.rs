use chrono::{NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque identity handed to us by the access collaborator.
pub type UserId = Ulid;

/// The unit of contention: one admin's bookings on one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey {
    pub owner: UserId,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(owner: UserId, date: NaiveDate) -> Self {
        Self { owner, date }
    }
}

/// Half-open interval `[start, end)` of naive local time within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Slot lengths an admin may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotDuration {
    Fifteen,
    Thirty,
    Sixty,
}

impl SlotDuration {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            15 => Some(Self::Fifteen),
            30 => Some(Self::Thirty),
            60 => Some(Self::Sixty),
            _ => None,
        }
    }

    pub fn minutes(self) -> u32 {
        match self {
            Self::Fifteen => 15,
            Self::Thirty => 30,
            Self::Sixty => 60,
        }
    }

    pub fn as_delta(self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.minutes()))
    }
}

/// An admin-published block of time that is cut into bookable slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub owner: UserId,
    pub date: NaiveDate,
    pub span: Span,
    pub slot_duration: SlotDuration,
    pub active: bool,
}

impl AvailabilityWindow {
    pub fn key(&self) -> DayKey {
        DayKey::new(self.owner, self.date)
    }

    pub fn total_slots(&self) -> usize {
        crate::slots::generate(self).len()
    }
}

/// Unvalidated window shape as submitted by an admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDraft {
    pub owner: UserId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub slot_minutes: u32,
    pub active: bool,
}

/// A candidate slot cut from a window. Never persisted.
#[derive(Debug, Clone, Copy, Eq, Serialize)]
pub struct Slot {
    pub span: Span,
    pub window_id: Ulid,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.span == other.span
    }
}

/// One row of the public "available slots" view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub available: bool,
    pub booking_id: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings occupy time; cancelled ones do not.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub requester: UserId,
    pub owner: UserId,
    pub date: NaiveDate,
    pub span: Span,
    /// Informational only; times are compared as the owner's naive local time.
    pub timezone: String,
    pub status: BookingStatus,
    pub purpose: String,
    pub notes: Option<String>,
    pub meeting_link: Option<String>,
    pub external_event_ref: Option<String>,
}

impl Booking {
    pub fn key(&self) -> DayKey {
        DayKey::new(self.owner, self.date)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// What a requester submits to reserve time with an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub requester: UserId,
    pub owner: UserId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub purpose: String,
    pub timezone: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Requester,
    Admin,
    SuperAdmin,
}

/// Caller identity and role, trusted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::SuperAdmin)
    }

    pub fn is_superadmin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// Visibility rule for the caller layer: superadmins see everything,
    /// everyone else sees bookings they own or requested.
    pub fn can_view(&self, booking: &Booking) -> bool {
        self.is_superadmin() || booking.requester == self.id || (self.is_admin() && booking.owner == self.id)
    }
}

/// WAL record format. Each variant carries enough to replay without lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowPut {
        window: AvailabilityWindow,
    },
    WindowUpdated {
        window: AvailabilityWindow,
        from: DayKey,
    },
    WindowRemoved {
        id: Ulid,
        key: DayKey,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        key: DayKey,
    },
    BookingCancelled {
        id: Ulid,
        key: DayKey,
    },
    BookingRescheduled {
        booking: Booking,
        from: DayKey,
    },
    MeetingLinkAttached {
        id: Ulid,
        key: DayKey,
        link: String,
        event_ref: Option<String>,
    },
}

impl Event {
    /// Every day this event mutates, deduplicated.
    pub fn days(&self) -> Vec<DayKey> {
        let (a, b) = match self {
            Event::WindowPut { window } => (window.key(), None),
            Event::WindowUpdated { window, from } => (*from, Some(window.key())),
            Event::BookingCreated { booking } => (booking.key(), None),
            Event::BookingRescheduled { booking, from } => (*from, Some(booking.key())),
            Event::WindowRemoved { key, .. }
            | Event::BookingConfirmed { key, .. }
            | Event::BookingCancelled { key, .. }
            | Event::MeetingLinkAttached { key, .. } => (*key, None),
        };
        match b {
            Some(b) if b != a => vec![a, b],
            _ => vec![a],
        }
    }
}

/// Domain events handed to notification and calendar collaborators
/// after a ledger change has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    Created { booking: Booking },
    Confirmed { booking: Booking },
    Cancelled { booking: Booking },
    Rescheduled { old: Booking, new: Booking },
}

impl BookingEvent {
    /// The booking as it stands after the change.
    pub fn booking(&self) -> &Booking {
        match self {
            BookingEvent::Created { booking }
            | BookingEvent::Confirmed { booking }
            | BookingEvent::Cancelled { booking } => booking,
            BookingEvent::Rescheduled { new, .. } => new,
        }
    }

    pub fn owner(&self) -> UserId {
        self.booking().owner
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingEvent::Created { .. } => "created",
            BookingEvent::Confirmed { .. } => "confirmed",
            BookingEvent::Cancelled { .. } => "cancelled",
            BookingEvent::Rescheduled { .. } => "rescheduled",
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

/// Read-side selection over the ledger. Unset fields match everything;
/// the date range is inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub owner: Option<UserId>,
    pub requester: Option<UserId>,
    pub status: Option<BookingStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.owner.is_none_or(|o| booking.owner == o)
            && self.requester.is_none_or(|r| booking.requester == r)
            && self.status.is_none_or(|s| booking.status == s)
            && self.from.is_none_or(|d| booking.date >= d)
            && self.to.is_none_or(|d| booking.date <= d)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BookingStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub cancelled: usize,
}

impl BookingStats {
    pub fn record(&mut self, status: BookingStatus) {
        self.total += 1;
        match status {
            BookingStatus::Pending => self.pending += 1,
            BookingStatus::Confirmed => self.confirmed += 1,
            BookingStatus::Cancelled => self.cancelled += 1,
        }
    }
}
