// MIT License - Copyright (c) 2026 Peter Wright
// Public command API for one iPano Plus panel

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::devices::{BacklightColor, Button, ButtonTarget, DeviceState, relay};
use crate::dispatcher::Dispatcher;
use crate::event::{BridgeEvent, EventBus, EventReceiver, Subscription, Topic};
use crate::heartbeat::Liveness;
use crate::protocol::OutboundCommand;

/// Diagnostic snapshot returned by [`IpanoBridge::connection_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub host: String,
    pub port: u16,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub buttons: BTreeMap<Button, bool>,
    pub relays: BTreeMap<u8, bool>,
    pub backlights: BTreeMap<u8, BacklightColor>,
    pub proximity: bool,
}

/// A persistent bridge to one iPano Plus panel.
///
/// Commands report success as a `bool`: `false` means the arguments were
/// invalid (nothing was sent), the link is down, or the write failed.
///
/// # Example
///
/// ```no_run
/// use ipano_bridge::{BridgeConfig, IpanoBridge, Topic};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let bridge = IpanoBridge::new(
///         BridgeConfig::builder()
///             .name("Hallway")
///             .host("192.168.2.120")
///             .build(),
///     );
///
///     let _buttons = bridge.subscribe(Topic::Button, |event| {
///         println!("{:?}", event);
///     });
///
///     if bridge.start().await {
///         bridge.set_backlight(1, "white").await;
///         bridge.control_relay(2, true).await;
///     }
///
///     tokio::signal::ctrl_c().await?;
///     bridge.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct IpanoBridge {
    connection: ConnectionManager,
    state: Arc<RwLock<DeviceState>>,
    events: EventBus,
    liveness: Liveness,
}

impl IpanoBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let state = Arc::new(RwLock::new(DeviceState::new()));
        let events = EventBus::new(config.event_capacity);
        let liveness = Liveness::new();
        let dispatcher = Dispatcher::new(Arc::clone(&state), events.clone(), liveness.clone());
        let connection = ConnectionManager::new(config, dispatcher, liveness.clone(), events.clone());

        Self {
            connection,
            state,
            events,
            liveness,
        }
    }

    pub fn name(&self) -> &str {
        &self.connection.config().name
    }

    pub fn config(&self) -> &BridgeConfig {
        self.connection.config()
    }

    // --- Lifecycle ---

    /// Connect and begin maintaining the connection.
    ///
    /// Makes up to `connect_attempts` attempts with exponential backoff;
    /// returns false if all of them fail.
    pub async fn start(&self) -> bool {
        info!("{}: starting bridge to {}", self.name(), self.config().address());
        self.connection.start().await
    }

    /// Close the connection and cancel all background work. Idempotent.
    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    /// Probe the configured address without touching the persistent
    /// connection.
    pub async fn test_connection(&self, timeout: Duration) -> bool {
        let config = self.config();
        ConnectionManager::test_connection(&config.host, config.port, timeout).await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    // --- Commands ---

    /// Wake the panel screen.
    pub async fn wake_screen(&self) -> bool {
        self.send(OutboundCommand::ScreenWake).await
    }

    /// Set the backlight of button 1-4, or of every button with `"all"`.
    ///
    /// `color` is one of off, white, yellow or both (case-insensitive).
    ///
    /// ```no_run
    /// # async fn demo(bridge: &ipano_bridge::IpanoBridge) {
    /// bridge.set_backlight(2, "yellow").await;
    /// bridge.set_backlight("all", "off").await;
    /// # }
    /// ```
    pub async fn set_backlight(&self, button: impl Into<ButtonTarget>, color: &str) -> bool {
        let target = button.into();
        if target == ButtonTarget::All {
            return self.set_all_backlights(color).await;
        }

        let Some(button) = target.button() else {
            warn!("{}: invalid button {:?}", self.name(), target);
            return false;
        };
        let Ok(color) = color.parse::<BacklightColor>() else {
            warn!("{}: invalid backlight color {:?}", self.name(), color);
            return false;
        };

        self.send(OutboundCommand::BacklightControl {
            index: button.index(),
            color,
        })
        .await
    }

    /// Set every backlight to `color`, one button at a time.
    ///
    /// True only if all four sends succeeded.
    pub async fn set_all_backlights(&self, color: &str) -> bool {
        let Ok(color) = color.parse::<BacklightColor>() else {
            warn!("{}: invalid backlight color {:?}", self.name(), color);
            return false;
        };
        if !self.is_connected() {
            warn!("{}: cannot set backlights, not connected", self.name());
            return false;
        }

        let mut all_ok = true;
        for (i, button) in Button::ALL.into_iter().enumerate() {
            if i > 0 {
                sleep(self.config().backlight_spacing).await;
            }
            all_ok &= self
                .send(OutboundCommand::BacklightControl {
                    index: button.index(),
                    color,
                })
                .await;
        }
        all_ok
    }

    /// Switch relay 1-2 on or off.
    pub async fn control_relay(&self, relay: i64, on: bool) -> bool {
        let Some(index) = relay::wire_index(relay) else {
            warn!("{}: invalid relay {}", self.name(), relay);
            return false;
        };
        self.send(OutboundCommand::RelayControl { index, on }).await
    }

    async fn send(&self, command: OutboundCommand) -> bool {
        match self.connection.send(&command).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: {} not sent: {}", self.name(), command.message_type(), e);
                false
            }
        }
    }

    // --- State & notifications ---

    /// Snapshot of the link and device state.
    pub async fn connection_status(&self) -> ConnectionStatus {
        let config = self.config();
        let device = self.state.read().await;
        ConnectionStatus {
            connected: self.is_connected(),
            state: self.state(),
            host: config.host.clone(),
            port: config.port,
            last_heartbeat: self.liveness.last_seen(),
            buttons: device.buttons().clone(),
            relays: device.relays().clone(),
            backlights: device.backlights().clone(),
            proximity: device.proximity(),
        }
    }

    /// Clone of the current device state.
    pub async fn device_state(&self) -> DeviceState {
        self.state.read().await.clone()
    }

    /// Register a handler for one notification topic. Dropping the returned
    /// [`Subscription`] unregisters it.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(topic, handler)
    }

    /// Stream of every notification.
    pub fn events(&self) -> EventReceiver {
        self.events.watch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> IpanoBridge {
        IpanoBridge::new(BridgeConfig::builder().name("Test").host("127.0.0.1").build())
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let bridge = bridge();
        assert!(!bridge.set_backlight(5, "white").await);
        assert!(!bridge.set_backlight(0, "white").await);
        assert!(!bridge.set_backlight(1, "purple").await);
        assert!(!bridge.set_all_backlights("purple").await);
        assert!(!bridge.control_relay(3, true).await);
        assert!(!bridge.control_relay(0, false).await);
        assert!(!bridge.control_relay(i64::MIN, true).await);
        assert!(!bridge.control_relay(i64::MAX, true).await);
        assert!(!bridge.set_backlight(i64::MIN, "white").await);
        assert!(!bridge.set_backlight("five", "white").await);
        assert!(!bridge.set_backlight("all", "purple").await);
    }

    #[tokio::test]
    async fn test_commands_fail_fast_when_disconnected() {
        let bridge = bridge();
        let begun = std::time::Instant::now();
        assert!(!bridge.wake_screen().await);
        assert!(!bridge.set_backlight(1, "white").await);
        assert!(!bridge.set_backlight(ButtonTarget::All, "off").await);
        assert!(!bridge.set_backlight("all", "off").await);
        assert!(!bridge.control_relay(1, true).await);
        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_initial_status() {
        let bridge = bridge();
        let status = bridge.connection_status().await;
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.host, "127.0.0.1");
        assert_eq!(status.port, 3124);
        assert_eq!(status.last_heartbeat, None);
        assert_eq!(status.buttons.len(), 4);
        assert_eq!(status.relays.len(), 2);
        assert_eq!(status.backlights.len(), 4);
        assert!(!status.proximity);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["buttons"]["button_3"], false);
    }

    #[tokio::test]
    async fn test_subscribe_through_bridge() {
        let bridge = bridge();
        let sub = bridge.subscribe(Topic::Relay, |_| {});
        assert_eq!(sub.topic(), Topic::Relay);
        assert_eq!(bridge.events.handler_count(), 1);
        drop(sub);
        assert_eq!(bridge.events.handler_count(), 0);
    }
}
