use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{find_overlap, overlap_conflict};
use super::day::UniqueViolation;
use super::{ConflictKind, Engine, EngineError, Entity};

/// Why a single insert attempt failed.
enum InsertError {
    Rejected(EngineError),
    /// Only the exact-start guard tripped; worth one more try.
    Unique(UniqueViolation),
}

impl From<EngineError> for InsertError {
    fn from(e: EngineError) -> Self {
        InsertError::Rejected(e)
    }
}

fn conflict(kind: ConflictKind) -> EngineError {
    metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    EngineError::Conflict(kind)
}

impl Engine {
    /// Reserve `[start, end)` on the owner's date. Structural checks run
    /// first, then the past check, then the overlap and uniqueness checks
    /// under the day lock.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.create_booking_inner(request).await;
        observability::record_outcome("create_booking", started, &result);
        result
    }

    async fn create_booking_inner(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let booking = self.validate_request(request)?;

        let mut retried = false;
        loop {
            match self.try_insert(&booking).await {
                Ok(()) => break,
                Err(InsertError::Rejected(e)) => return Err(e),
                Err(InsertError::Unique(v)) if !retried => {
                    retried = true;
                    warn!(
                        "booking {} hit start-time guard against {}, retrying once",
                        booking.id, v.existing
                    );
                    metrics::counter!(observability::UNIQUE_RETRIES_TOTAL).increment(1);
                }
                Err(InsertError::Unique(v)) => {
                    return Err(conflict(ConflictKind::SlotTaken {
                        date: booking.date,
                        start: v.start,
                    }));
                }
            }
        }

        info!(
            "booking {} created: {} {}-{} with {} ({})",
            booking.id,
            booking.date,
            booking.span.start.format("%H:%M"),
            booking.span.end.format("%H:%M"),
            booking.owner,
            booking.status.as_str()
        );
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        self.notify.send(&BookingEvent::Created { booking: booking.clone() });
        Ok(booking)
    }

    fn validate_request(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let span = Span::try_new(request.start, request.end)
            .ok_or_else(|| EngineError::validation("end_time", "end time must be after start time"))?;
        if request.requester == request.owner {
            return Err(EngineError::validation("owner", "cannot book a meeting with yourself"));
        }
        if request.purpose.trim().is_empty() {
            return Err(EngineError::validation("purpose", "meeting purpose is required"));
        }
        if request.purpose.len() > MAX_PURPOSE_LEN {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        if let Some(ref notes) = request.notes
            && notes.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        if request.timezone.len() > MAX_TIMEZONE_LABEL_LEN {
            return Err(EngineError::LimitExceeded("timezone label too long"));
        }
        self.check_not_past(request.owner, request.date, &span)?;

        let timezone = if request.timezone.trim().is_empty() {
            "UTC".to_string()
        } else {
            request.timezone
        };
        let status = if self.options.require_approval {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        Ok(Booking {
            id: Ulid::new(),
            requester: request.requester,
            owner: request.owner,
            date: request.date,
            span,
            timezone,
            status,
            purpose: request.purpose,
            notes: request.notes,
            meeting_link: None,
            external_event_ref: None,
        })
    }

    /// Past is judged against the owner's local clock.
    fn check_not_past(&self, owner: UserId, date: NaiveDate, span: &Span) -> Result<(), EngineError> {
        if date.and_time(span.start) < self.options.clock.now(owner) {
            return Err(EngineError::validation("date", "cannot book meetings in the past"));
        }
        Ok(())
    }

    async fn try_insert(&self, booking: &Booking) -> Result<(), InsertError> {
        let mut day = self.lock_day(booking.key()).await;
        if day.state().bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on date").into());
        }
        if let Some(hit) = find_overlap(day.state().overlapping(&booking.span), &booking.span, None) {
            debug!("booking request overlaps {} on {}", hit.id, booking.date);
            return Err(conflict(overlap_conflict(hit)).into());
        }
        if let Some(v) = day.state().unique_violation(booking) {
            return Err(InsertError::Unique(v));
        }
        self.commit(&Event::BookingCreated { booking: booking.clone() }, &mut day, None)
            .await?;
        Ok(())
    }

    /// Cancel a pending or confirmed booking. The requester, the owner and
    /// superadmins may cancel.
    pub async fn cancel_booking(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.cancel_booking_inner(id, actor).await;
        observability::record_outcome("cancel_booking", started, &result);
        result
    }

    async fn cancel_booking_inner(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let (mut day, _) = self.locate(Entity::Booking, id, None).await?;
        let mut booking = day.state().booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        if actor.id != booking.requester && actor.id != booking.owner && !actor.is_superadmin() {
            return Err(EngineError::PermissionDenied { actor: actor.id, target: id });
        }
        if booking.status == BookingStatus::Cancelled {
            return Err(conflict(ConflictKind::AlreadyCancelled(id)));
        }

        self.commit(&Event::BookingCancelled { id, key: booking.key() }, &mut day, None)
            .await?;
        drop(day);

        booking.status = BookingStatus::Cancelled;
        info!("booking {id} cancelled by {}", actor.id);
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        self.notify.send(&BookingEvent::Cancelled { booking: booking.clone() });
        Ok(booking)
    }

    /// Approve a pending booking. Only the owner or a superadmin.
    pub async fn confirm_booking(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.confirm_booking_inner(id, actor).await;
        observability::record_outcome("confirm_booking", started, &result);
        result
    }

    async fn confirm_booking_inner(&self, id: Ulid, actor: &Actor) -> Result<Booking, EngineError> {
        let (mut day, _) = self.locate(Entity::Booking, id, None).await?;
        let mut booking = day.state().booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        if actor.id != booking.owner && !actor.is_superadmin() {
            return Err(EngineError::PermissionDenied { actor: actor.id, target: id });
        }
        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Cancelled => return Err(conflict(ConflictKind::AlreadyCancelled(id))),
            status => {
                return Err(conflict(ConflictKind::NotPending { booking_id: id, status }));
            }
        }

        self.commit(&Event::BookingConfirmed { id, key: booking.key() }, &mut day, None)
            .await?;
        drop(day);

        booking.status = BookingStatus::Confirmed;
        info!("booking {id} confirmed by {}", actor.id);
        self.notify.send(&BookingEvent::Confirmed { booking: booking.clone() });
        Ok(booking)
    }

    /// Move a booking to a new date and interval as one atomic step. Both
    /// days stay locked until the move commits, so a failed attempt leaves
    /// the original booking untouched.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        actor: &Actor,
        new_date: NaiveDate,
        new_start: NaiveTime,
        new_end: NaiveTime,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self
            .reschedule_booking_inner(id, actor, new_date, new_start, new_end)
            .await;
        observability::record_outcome("reschedule_booking", started, &result);
        result
    }

    async fn reschedule_booking_inner(
        &self,
        id: Ulid,
        actor: &Actor,
        new_date: NaiveDate,
        new_start: NaiveTime,
        new_end: NaiveTime,
    ) -> Result<Booking, EngineError> {
        let span = Span::try_new(new_start, new_end)
            .ok_or_else(|| EngineError::validation("end_time", "end time must be after start time"))?;

        // A booking never changes owner, so the destination day is known up front.
        let owner = self
            .booking_index
            .get(&id)
            .map(|e| e.value().owner)
            .ok_or(EngineError::NotFound(id))?;
        let dest = DayKey::new(owner, new_date);

        let (mut home, mut moved) = self.locate(Entity::Booking, id, Some(dest)).await?;
        let old = home.state().booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        let allowed = actor.id == old.requester
            || actor.is_superadmin()
            || (self.options.owner_may_reschedule && actor.id == old.owner);
        if !allowed {
            return Err(EngineError::PermissionDenied { actor: actor.id, target: id });
        }
        if old.status == BookingStatus::Cancelled {
            return Err(conflict(ConflictKind::AlreadyCancelled(id)));
        }
        self.check_not_past(owner, new_date, &span)?;

        let mut updated = old.clone();
        updated.date = new_date;
        updated.span = span;
        {
            let target = moved.as_ref().unwrap_or(&home).state();
            if moved.is_some() && target.bookings.len() >= MAX_BOOKINGS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many bookings on date"));
            }
            if let Some(hit) = find_overlap(target.overlapping(&span), &span, Some(id)) {
                debug!("reschedule of {id} overlaps {} on {new_date}", hit.id);
                return Err(conflict(overlap_conflict(hit)));
            }
            if let Some(v) = target.unique_violation(&updated) {
                return Err(conflict(ConflictKind::SlotTaken { date: new_date, start: v.start }));
            }
        }

        let event = Event::BookingRescheduled { booking: updated.clone(), from: old.key() };
        self.commit(&event, &mut home, moved.as_mut()).await?;
        drop(moved);
        drop(home);

        info!(
            "booking {id} rescheduled: {} {} -> {} {}",
            old.date,
            old.span.start.format("%H:%M"),
            updated.date,
            updated.span.start.format("%H:%M")
        );
        metrics::counter!(observability::BOOKINGS_RESCHEDULED_TOTAL).increment(1);
        self.notify.send(&BookingEvent::Rescheduled { old, new: updated.clone() });
        Ok(updated)
    }

    /// Record the meeting link produced by the calendar collaborator.
    pub async fn attach_meeting_link(
        &self,
        id: Ulid,
        link: String,
        event_ref: Option<String>,
    ) -> Result<Booking, EngineError> {
        if link.trim().is_empty() {
            return Err(EngineError::validation("meeting_link", "link must not be empty"));
        }
        if link.len() > MAX_LINK_LEN {
            return Err(EngineError::LimitExceeded("meeting link too long"));
        }
        if let Some(ref r) = event_ref
            && r.len() > MAX_EVENT_REF_LEN {
                return Err(EngineError::LimitExceeded("event reference too long"));
            }

        let (mut day, _) = self.locate(Entity::Booking, id, None).await?;
        let mut booking = day.state().booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(conflict(ConflictKind::AlreadyCancelled(id)));
        }

        let event = Event::MeetingLinkAttached {
            id,
            key: booking.key(),
            link: link.clone(),
            event_ref: event_ref.clone(),
        };
        self.commit(&event, &mut day, None).await?;

        booking.meeting_link = Some(link);
        booking.external_event_ref = event_ref;
        Ok(booking)
    }
}
