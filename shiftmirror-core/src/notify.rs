//! Change notifications for subscribers (UI push, websockets, ...).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::feed::CalendarId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    ShiftCollectionChanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub calendar_id: CalendarId,
    pub payload: serde_json::Value,
}

/// Fire-and-forget publication. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

pub struct BroadcastNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
