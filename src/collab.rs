//! Collaborator seams: outbound notifications and calendar/meeting-link
//! provisioning. Both run off the `NotifyHub` after a change has committed,
//! so a slow or failing collaborator never holds up or rolls back a booking.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::model::{Booking, BookingEvent};
use crate::notify::NotifyHub;
use crate::observability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// The remote side could not be reached.
    Unavailable(String),
    /// The remote side refused the request.
    Rejected(String),
    Encoding(String),
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollabError::Unavailable(e) => write!(f, "collaborator unavailable: {e}"),
            CollabError::Rejected(e) => write!(f, "collaborator rejected request: {e}"),
            CollabError::Encoding(e) => write!(f, "encoding error: {e}"),
        }
    }
}

impl std::error::Error for CollabError {}

/// Delivers booking events to people (email, chat, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &BookingEvent) -> Result<(), CollabError>;
}

/// What a calendar provider hands back for a new booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingDetails {
    pub link: String,
    pub event_ref: Option<String>,
}

/// Mirrors bookings into an external calendar.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create the external event. `None` if the provider issues no link.
    async fn create_event(&self, booking: &Booking) -> Result<Option<MeetingDetails>, CollabError>;

    async fn update_event(&self, _old: &Booking, _new: &Booking) -> Result<(), CollabError> {
        Ok(())
    }

    async fn cancel_event(&self, _booking: &Booking) -> Result<(), CollabError> {
        Ok(())
    }
}

/// Writes every event to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &BookingEvent) -> Result<(), CollabError> {
        let json = serde_json::to_string(event).map_err(|e| CollabError::Encoding(e.to_string()))?;
        info!("booking {}: {json}", event.label());
        Ok(())
    }
}

fn report_failure(collaborator: &'static str, event: &BookingEvent, err: &CollabError) {
    warn!(
        "{collaborator} failed on {} event for booking {}: {err}",
        event.label(),
        event.booking().id
    );
    metrics::counter!(observability::COLLABORATOR_FAILURES_TOTAL, "collaborator" => collaborator)
        .increment(1);
}

/// Feed every committed event to `notifier` until the hub goes away.
/// Failures are logged and counted, never retried.
pub fn spawn_notifier(hub: &NotifyHub, notifier: Arc<dyn Notifier>) -> JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = notifier.deliver(&event).await {
                        report_failure(notifier.name(), &event, &e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} lagged behind, skipped {skipped} events", notifier.name());
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Mirror committed events into `calendar`, attaching the meeting link it
/// returns for new bookings. Holds the engine weakly so it stops once the
/// engine is dropped.
pub fn spawn_calendar_sync(engine: &Arc<Engine>, calendar: Arc<dyn CalendarSync>) -> JoinHandle<()> {
    let mut rx = engine.notify.subscribe();
    let engine: Weak<Engine> = Arc::downgrade(engine);
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} lagged behind, skipped {skipped} events", calendar.name());
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let result = match &event {
                BookingEvent::Created { booking } => match calendar.create_event(booking).await {
                    Ok(Some(details)) => {
                        let Some(engine) = engine.upgrade() else { break };
                        engine
                            .attach_meeting_link(booking.id, details.link, details.event_ref)
                            .await
                            .map(|_| ())
                            .map_err(|e| CollabError::Rejected(e.to_string()))
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                },
                BookingEvent::Rescheduled { old, new } => calendar.update_event(old, new).await,
                BookingEvent::Cancelled { booking } => calendar.cancel_event(booking).await,
                BookingEvent::Confirmed { .. } => Ok(()),
            };
            if let Err(e) = result {
                report_failure(calendar.name(), &event, &e);
            }
        }
    })
}
