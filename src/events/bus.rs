//! Typed publish/subscribe channel between views

use super::{EventEmitter, ViewEvent};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Notifier that distributes ViewEvents via `tokio::sync::broadcast`
///
/// Fire-and-forget: publishing never blocks, never panics. Receivers see
/// events in publish order; events published before a receiver subscribed
/// are not replayed.
#[derive(Debug, Clone)]
pub struct ViewNotifier {
    sender: broadcast::Sender<ViewEvent>,
}

impl ViewNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a named event carrying `entity`
    pub fn publish(&self, name: impl Into<String>, entity: serde_json::Value) {
        self.emit(ViewEvent::new(name, entity));
    }

    /// Receive events with the given name only
    pub fn subscribe(&self, name: impl Into<String>) -> ViewSubscription {
        ViewSubscription {
            name: name.into(),
            rx: self.sender.subscribe(),
        }
    }

    /// Receive every event
    pub fn subscribe_all(&self) -> broadcast::Receiver<ViewEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for ViewNotifier {
    fn emit(&self, event: ViewEvent) {
        let name = event.name.clone();
        if let Ok(n) = self.sender.send(event) {
            debug!(event = %name, subscribers = n, "View event published");
        }
    }
}

impl Default for ViewNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver filtered to one event name
pub struct ViewSubscription {
    name: String,
    rx: broadcast::Receiver<ViewEvent>,
}

impl ViewSubscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next matching event. `None` once every notifier is gone.
    pub async fn recv(&mut self) -> Option<ViewEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.name == self.name => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(event = %self.name, skipped, "View subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ViewEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.name == self.name => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
