// MIT License - Copyright (c) 2026 Peter Wright
// State-change notifications and the topic bus

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};

use crate::devices::{BacklightColor, Button, ButtonAction};

/// Notification topics a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Button presses and releases
    Button,
    /// Relay state changes
    Relay,
    /// Backlight state changes
    Backlight,
    /// Proximity sensor changes
    Proximity,
    /// Connection established or lost
    Connection,
}

/// A button press or release reported by the panel.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonEvent {
    pub button: Button,
    pub action: ButtonAction,
    pub repeat_count: u32,
    pub key_code: i64,
    pub timestamp: DateTime<Utc>,
}

/// All notifications emitted by a bridge.
///
/// Handlers registered with [`EventBus::subscribe`] receive the events of
/// their topic; [`EventBus::watch`] yields every event.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// TCP connection established and initial queries sent
    Connected { timestamp: DateTime<Utc> },
    /// TCP connection lost
    Disconnected { timestamp: DateTime<Utc> },
    /// Button pressed or released
    Button(ButtonEvent),
    /// One relay changed; `relays` is the full map after the change
    RelayUpdate {
        relay: u8,
        on: bool,
        relays: BTreeMap<u8, bool>,
        timestamp: DateTime<Utc>,
    },
    /// A backlight report was applied; `backlights` is the full map
    BacklightUpdate {
        backlights: BTreeMap<u8, BacklightColor>,
        timestamp: DateTime<Utc>,
    },
    /// Proximity sensor changed
    ProximityUpdate {
        detected: bool,
        timestamp: DateTime<Utc>,
    },
}

impl BridgeEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Connected { .. } | Self::Disconnected { .. } => Topic::Connection,
            Self::Button(_) => Topic::Button,
            Self::RelayUpdate { .. } => Topic::Relay,
            Self::BacklightUpdate { .. } => Topic::Backlight,
            Self::ProximityUpdate { .. } => Topic::Proximity,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Connected { timestamp }
            | Self::Disconnected { timestamp }
            | Self::RelayUpdate { timestamp, .. }
            | Self::BacklightUpdate { timestamp, .. }
            | Self::ProximityUpdate { timestamp, .. } => *timestamp,
            Self::Button(event) => event.timestamp,
        }
    }
}

/// Type alias for the broadcast receiver returned by [`EventBus::watch`].
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

type Handler = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Topic, Handler)>,
}

/// Topic-based publish/subscribe hub owned by one bridge.
///
/// Handlers run synchronously inside [`publish`](Self::publish), so every
/// notification derived from one frame is delivered before the next frame
/// is processed.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    tx: tokio::sync::broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Create a bus whose broadcast stream buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity.max(1));
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            tx,
        }
    }

    /// Register `handler` for `topic`.
    ///
    /// The registration lives until the returned [`Subscription`] is dropped
    /// or explicitly unsubscribed.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, topic, Arc::new(handler)));
        Subscription {
            id,
            topic,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Receive every event as an async stream.
    pub fn watch(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    /// Number of live handler registrations.
    pub fn handler_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    /// Deliver `event` to the handlers of its topic, then to watchers.
    pub fn publish(&self, event: BridgeEvent) {
        let topic = event.topic();
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .iter()
                .filter(|(_, t, _)| *t == topic)
                .map(|(_, _, h)| Arc::clone(h))
                .collect()
        };

        for handler in handlers {
            handler(&event);
        }

        // No watchers is not an error.
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("watchers", &self.tx.receiver_count())
            .finish()
    }
}

/// Handle for a handler registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    topic: Topic,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the handler now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.handlers.retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
