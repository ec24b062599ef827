use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{BookingEvent, UserId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed booking events: one firehose plus one
/// channel per owner.
pub struct NotifyHub {
    all: broadcast::Sender<BookingEvent>,
    owners: DashMap<UserId, broadcast::Sender<BookingEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            owners: DashMap::new(),
        }
    }

    /// Every event, for collaborators that serve all owners.
    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.all.subscribe()
    }

    /// Events for one owner's bookings. Creates the channel if needed.
    pub fn subscribe_owner(&self, owner: UserId) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .owners
            .entry(owner)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, event: &BookingEvent) {
        let _ = self.all.send(event.clone());
        if let Some(sender) = self.owners.get(&event.owner()) {
            let _ = sender.send(event.clone());
        }
    }
}
