use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceRef};

const CHANNEL_CAPACITY: usize = 256;

/// Per-resource broadcast hub. Embedding layers subscribe to push calendar
/// updates; delivery is fire-and-forget with no ordering guarantee across
/// resources.
pub struct NotifyHub {
    channels: DashMap<ResourceRef, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events touching a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource: ResourceRef) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(resource)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, resource: ResourceRef, event: &Event) {
        if let Some(sender) = self.channels.get(&resource) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a resource's channel.
    pub fn remove(&self, resource: &ResourceRef) {
        self.channels.remove(resource);
    }
}
