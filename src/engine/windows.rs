use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::find_overlap;
use super::day::DayState;
use super::{ConflictKind, Engine, EngineError, Entity};

/// Admins manage their own windows; superadmins manage anyone's.
fn authorize(actor: &Actor, owner: UserId) -> Result<(), EngineError> {
    if actor.is_superadmin() || (actor.is_admin() && actor.id == owner) {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied { actor: actor.id, target: owner })
    }
}

/// Two active windows for one owner may not start at the same time on the
/// same date. Inactive windows never collide.
fn check_duplicate(day: &DayState, window: &AvailabilityWindow) -> Result<(), EngineError> {
    if !window.active {
        return Ok(());
    }
    match day.active_window_at(window.span.start, Some(window.id)) {
        Some(existing) => Err(EngineError::DuplicateWindow(existing.id)),
        None => Ok(()),
    }
}

impl Engine {
    fn validate_window(&self, id: Ulid, draft: WindowDraft) -> Result<AvailabilityWindow, EngineError> {
        let span = Span::try_new(draft.start, draft.end)
            .ok_or_else(|| EngineError::invalid_window("end_time", "end time must be after start time"))?;
        let slot_duration = SlotDuration::from_minutes(draft.slot_minutes).ok_or_else(|| {
            EngineError::invalid_window(
                "slot_duration",
                format!("must be 15, 30 or 60 minutes, got {}", draft.slot_minutes),
            )
        })?;
        if draft.date < self.options.clock.today(draft.owner) {
            return Err(EngineError::invalid_window(
                "date",
                "cannot publish availability for past dates",
            ));
        }
        Ok(AvailabilityWindow {
            id,
            owner: draft.owner,
            date: draft.date,
            span,
            slot_duration,
            active: draft.active,
        })
    }

    /// Publish a new availability window.
    pub async fn put_window(
        &self,
        actor: &Actor,
        draft: WindowDraft,
    ) -> Result<AvailabilityWindow, EngineError> {
        authorize(actor, draft.owner)?;
        let window = self.validate_window(Ulid::new(), draft)?;

        let mut day = self.lock_day(window.key()).await;
        if day.state().windows.len() >= MAX_WINDOWS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many windows on date"));
        }
        check_duplicate(day.state(), &window)?;
        self.commit(&Event::WindowPut { window: window.clone() }, &mut day, None)
            .await?;

        info!(
            "window {} published for {} on {}: {}-{} every {}m",
            window.id,
            window.owner,
            window.date,
            window.span.start.format("%H:%M"),
            window.span.end.format("%H:%M"),
            window.slot_duration.minutes()
        );
        Ok(window)
    }

    /// Replace a window's shape. It may move to another date but never to
    /// another owner. Existing bookings are left as they are.
    pub async fn update_window(
        &self,
        actor: &Actor,
        id: Ulid,
        draft: WindowDraft,
    ) -> Result<AvailabilityWindow, EngineError> {
        let owner = self
            .window_index
            .get(&id)
            .map(|e| e.value().owner)
            .ok_or(EngineError::NotFound(id))?;
        authorize(actor, owner)?;
        if draft.owner != owner {
            return Err(EngineError::invalid_window("owner", "a window cannot change owner"));
        }
        let window = self.validate_window(id, draft)?;

        let (mut home, mut moved) = self.locate(Entity::Window, id, Some(window.key())).await?;
        let from = home.key();
        {
            let target = moved.as_ref().unwrap_or(&home).state();
            if moved.is_some() && target.windows.len() >= MAX_WINDOWS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many windows on date"));
            }
            check_duplicate(target, &window)?;
        }
        self.commit(
            &Event::WindowUpdated { window: window.clone(), from },
            &mut home,
            moved.as_mut(),
        )
        .await?;

        info!("window {id} updated");
        Ok(window)
    }

    /// Toggle whether a window contributes slots.
    pub async fn set_window_active(
        &self,
        actor: &Actor,
        id: Ulid,
        active: bool,
    ) -> Result<AvailabilityWindow, EngineError> {
        let (mut day, _) = self.locate(Entity::Window, id, None).await?;
        let mut window = day.state().window(id).cloned().ok_or(EngineError::NotFound(id))?;
        authorize(actor, window.owner)?;
        if window.active == active {
            return Ok(window);
        }

        window.active = active;
        check_duplicate(day.state(), &window)?;
        let from = day.key();
        self.commit(&Event::WindowUpdated { window: window.clone(), from }, &mut day, None)
            .await?;

        info!("window {id} {}", if active { "activated" } else { "deactivated" });
        Ok(window)
    }

    /// Delete a window. Refused while a live booking overlaps it.
    pub async fn remove_window(
        &self,
        actor: &Actor,
        id: Ulid,
    ) -> Result<AvailabilityWindow, EngineError> {
        let (mut day, _) = self.locate(Entity::Window, id, None).await?;
        let window = day.state().window(id).cloned().ok_or(EngineError::NotFound(id))?;
        authorize(actor, window.owner)?;

        if let Some(b) = find_overlap(day.state().overlapping(&window.span), &window.span, None) {
            return Err(EngineError::Conflict(ConflictKind::WindowInUse {
                window_id: id,
                booking_id: b.id,
            }));
        }
        self.commit(&Event::WindowRemoved { id, key: window.key() }, &mut day, None)
            .await?;

        info!("window {id} removed");
        Ok(window)
    }
}
