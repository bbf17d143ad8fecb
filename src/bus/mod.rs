//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern. The poll loop and the
//! gesture task publish what happened; the MQTT bridge mirrors it to the broker.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::device::Endpoint;

/// Gesture resolved from a burst of taps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    ShowDetails,
    SkipNext,
    Favorite,
}

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    TrackChanged {
        artist: Option<String>,
        title: Option<String>,
        album: Option<String>,
    },
    PlaybackStopped,
    EndpointChanged {
        endpoint: Endpoint,
    },
    GestureTriggered {
        gesture: Gesture,
    },
    RemoteCommand {
        command: String,
    },
    ShuttingDown,
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
