// MIT License - Copyright (c) 2026 Peter Wright
// Inbound frame dispatch: decoded frame -> state change -> notification

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::constants::MessageType;
use crate::devices::{BacklightColor, Button, ButtonAction, DeviceState};
use crate::devices::relay;
use crate::error::{BridgeError, Result};
use crate::event::{BridgeEvent, ButtonEvent, EventBus};
use crate::heartbeat::Liveness;
use crate::protocol::{self, InboundFrame};

/// Applies inbound frames to the device state and publishes the resulting
/// notifications.
///
/// The only writer of [`DeviceState`]. Notifications are published after
/// the state lock is released, so handlers may read the state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    state: Arc<RwLock<DeviceState>>,
    events: EventBus,
    liveness: Liveness,
}

impl Dispatcher {
    pub fn new(state: Arc<RwLock<DeviceState>>, events: EventBus, liveness: Liveness) -> Self {
        Self {
            state,
            events,
            liveness,
        }
    }

    /// Decode and apply one line of text. Errors are logged, never returned.
    pub async fn process_line(&self, line: &str) {
        debug!("Received: {}", line);

        let frame = match protocol::decode(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable frame {:?}: {}", line, e);
                return;
            }
        };

        if !frame.is_ok() {
            warn!(
                "Dropping frame type {} with status {}",
                frame.message_type, frame.state
            );
            return;
        }

        if let Err(e) = self.dispatch(&frame).await {
            warn!("{}", e);
        }
    }

    /// Route a status-200 frame to its handler.
    pub async fn dispatch(&self, frame: &InboundFrame) -> Result<()> {
        match frame.kind() {
            Some(MessageType::Button) => self.handle_button(&frame.data).await,
            Some(MessageType::RelayChange) => self.handle_relays(&frame.data).await,
            Some(MessageType::BacklightChange) => self.handle_backlights(&frame.data).await,
            Some(MessageType::Proximity) => self.handle_proximity(&frame.data).await,
            Some(MessageType::Heartbeat) => {
                debug!("Heartbeat from panel");
                self.liveness.touch();
                Ok(())
            }
            Some(other) => {
                debug!("Ignoring {} message", other);
                Ok(())
            }
            None => {
                debug!("Ignoring unknown message type {}", frame.message_type);
                Ok(())
            }
        }
    }

    async fn handle_button(&self, data: &Value) -> Result<()> {
        let key_code = data
            .get("keyCode")
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid("BUTTON", "missing integer keyCode"))?;
        let action = data
            .get("action")
            .and_then(Value::as_i64)
            .map(ButtonAction::from_code)
            .ok_or_else(|| invalid("BUTTON", "missing integer action"))?;
        let repeat_count = data
            .get("repeatCount")
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0);

        let Some(button) = Button::from_key_code(key_code) else {
            warn!("Unknown button keyCode: {}", key_code);
            return Ok(());
        };

        self.state
            .write()
            .await
            .set_button(button, action.is_pressed());
        info!("{} {}", button, action.as_str());

        self.events.publish(BridgeEvent::Button(ButtonEvent {
            button,
            action,
            repeat_count,
            key_code,
            timestamp: Utc::now(),
        }));
        Ok(())
    }

    async fn handle_relays(&self, data: &Value) -> Result<()> {
        let entries = data
            .as_array()
            .ok_or_else(|| invalid("RELAY_CHANGE", "data is not a list"))?;

        for entry in entries {
            let Some(num) = entry.get("num").and_then(Value::as_i64) else {
                warn!("Relay entry without num: {}", entry);
                continue;
            };
            if !relay::is_valid_index(num) {
                warn!("Ignoring unsupported relay {}", num);
                continue;
            }
            let index = num as u8;
            let on = entry.get("val").is_some_and(truthy);

            let relays = {
                let mut state = self.state.write().await;
                state.set_relay(index, on);
                state.relays().clone()
            };
            info!("Relay {} {}", index + 1, if on { "on" } else { "off" });

            self.events.publish(BridgeEvent::RelayUpdate {
                relay: index,
                on,
                relays,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    async fn handle_backlights(&self, data: &Value) -> Result<()> {
        let entries = data
            .as_array()
            .ok_or_else(|| invalid("BACKLIGHT_CHANGE", "data is not a list"))?;

        let backlights = {
            let mut state = self.state.write().await;
            for entry in entries {
                let Some(num) = entry.get("num").and_then(Value::as_i64) else {
                    warn!("Backlight entry without num: {}", entry);
                    continue;
                };
                // A missing val means off; a val of the wrong type is skipped.
                let raw = match entry.get("val") {
                    None => 0,
                    Some(val) => match val.as_i64() {
                        Some(raw) => raw,
                        None => {
                            warn!("Ignoring backlight {} with malformed value {}", num, val);
                            continue;
                        }
                    },
                };
                let Some(color) = BacklightColor::from_value(raw) else {
                    warn!("Ignoring backlight {} with unknown value {}", num, raw);
                    continue;
                };
                let Ok(index) = u8::try_from(num) else {
                    warn!("Ignoring unsupported backlight {}", num);
                    continue;
                };
                match state.set_backlight(index, color) {
                    Some(previous) if previous != color => {
                        info!("Button {} backlight changed: {}", index + 1, color);
                    }
                    Some(_) => {}
                    None => warn!("Ignoring unsupported backlight {}", num),
                }
            }
            state.backlights().clone()
        };

        self.events.publish(BridgeEvent::BacklightUpdate {
            backlights,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle_proximity(&self, data: &Value) -> Result<()> {
        let detected = truthy(data);
        self.state.write().await.set_proximity(detected);
        info!("Proximity {}", if detected { "detected" } else { "clear" });

        self.events.publish(BridgeEvent::ProximityUpdate {
            detected,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

fn invalid(message: &str, details: &str) -> BridgeError {
    BridgeError::InvalidPayload {
        message: message.to_string(),
        details: details.to_string(),
    }
}

/// Truthiness of a JSON value: false, 0, "", [], {} and null are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
