// MIT License - Copyright (c) 2026 Peter Wright
// MQTT JSON wire format

// Published messages all share the flat {now, op, ...} structure. Relays and
// backlights are numbered from 1 here, like the buttons.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bridge::ConnectionStatus;
use crate::connection::ConnectionState;
use crate::devices::{BacklightColor, Button, ButtonAction};
use crate::event::BridgeEvent;

pub fn now_epoch_ms() -> u64 {
    epoch_ms(Utc::now())
}

fn epoch_ms(at: DateTime<Utc>) -> u64 {
    at.timestamp_millis().max(0) as u64
}

fn numbered<V: Copy>(map: &BTreeMap<u8, V>) -> BTreeMap<String, V> {
    map.iter().map(|(i, v)| ((i + 1).to_string(), *v)).collect()
}

// {now, op, device}: CONNECTED / DISCONNECTED
#[derive(Debug, Clone, Serialize)]
pub struct MqttSimpleEvent {
    pub now: u64,
    pub op: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttButtonEvent {
    pub now: u64,
    pub op: String,
    pub device: String,
    pub button: Button,
    pub action: ButtonAction,
    #[serde(rename = "repeatCount")]
    pub repeat_count: u32,
    #[serde(rename = "keyCode")]
    pub key_code: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttRelayEvent {
    pub now: u64,
    pub op: String,
    pub device: String,
    pub relay: u8,
    pub on: bool,
    pub relays: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttBacklightEvent {
    pub now: u64,
    pub op: String,
    pub device: String,
    pub backlights: BTreeMap<String, BacklightColor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttProximityEvent {
    pub now: u64,
    pub op: String,
    pub device: String,
    pub detected: bool,
}

/// A bridge notification in its published form.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MqttEvent {
    Simple(MqttSimpleEvent),
    Button(MqttButtonEvent),
    Relay(MqttRelayEvent),
    Backlight(MqttBacklightEvent),
    Proximity(MqttProximityEvent),
}

impl MqttEvent {
    pub fn from_event(device: &str, event: &BridgeEvent) -> Self {
        let now = epoch_ms(event.timestamp());
        let device = device.to_string();
        match event {
            BridgeEvent::Connected { .. } => Self::Simple(MqttSimpleEvent {
                now,
                op: "CONNECTED".to_string(),
                device,
            }),
            BridgeEvent::Disconnected { .. } => Self::Simple(MqttSimpleEvent {
                now,
                op: "DISCONNECTED".to_string(),
                device,
            }),
            BridgeEvent::Button(e) => Self::Button(MqttButtonEvent {
                now,
                op: "BUTTON".to_string(),
                device,
                button: e.button,
                action: e.action,
                repeat_count: e.repeat_count,
                key_code: e.key_code,
            }),
            BridgeEvent::RelayUpdate { relay, on, relays, .. } => Self::Relay(MqttRelayEvent {
                now,
                op: "RELAY".to_string(),
                device,
                relay: relay + 1,
                on: *on,
                relays: numbered(relays),
            }),
            BridgeEvent::BacklightUpdate { backlights, .. } => Self::Backlight(MqttBacklightEvent {
                now,
                op: "BACKLIGHT".to_string(),
                device,
                backlights: numbered(backlights),
            }),
            BridgeEvent::ProximityUpdate { detected, .. } => Self::Proximity(MqttProximityEvent {
                now,
                op: "PROXIMITY".to_string(),
                device,
                detected: *detected,
            }),
        }
    }

    pub fn op(&self) -> &str {
        match self {
            Self::Simple(m) => &m.op,
            Self::Button(m) => &m.op,
            Self::Relay(m) => &m.op,
            Self::Backlight(m) => &m.op,
            Self::Proximity(m) => &m.op,
        }
    }
}

// Periodic STATUS, published retained
#[derive(Debug, Clone, Serialize)]
pub struct MqttStatus {
    pub now: u64,
    pub op: String,
    pub device: String,
    pub connected: bool,
    pub state: ConnectionState,
    pub host: String,
    pub port: u16,
    #[serde(rename = "lastHeartbeat")]
    pub last_heartbeat: Option<u64>,
    pub buttons: BTreeMap<Button, bool>,
    pub relays: BTreeMap<String, bool>,
    pub backlights: BTreeMap<String, BacklightColor>,
    pub proximity: bool,
}

impl MqttStatus {
    pub fn new(device: &str, status: &ConnectionStatus) -> Self {
        Self {
            now: now_epoch_ms(),
            op: "STATUS".to_string(),
            device: device.to_string(),
            connected: status.connected,
            state: status.state,
            host: status.host.clone(),
            port: status.port,
            last_heartbeat: status.last_heartbeat.map(epoch_ms),
            buttons: status.buttons.clone(),
            relays: numbered(&status.relays),
            backlights: numbered(&status.backlights),
            proximity: status.proximity,
        }
    }
}

// CMD_ACK response
#[derive(Debug, Clone, Serialize)]
pub struct MqttCmdAck {
    pub now: u64,
    pub op: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MqttCmdAck {
    pub fn new(success: bool, src: Option<serde_json::Value>, error: Option<String>) -> Self {
        Self {
            now: now_epoch_ms(),
            op: "CMD_ACK".to_string(),
            success,
            src,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ButtonEvent;

    #[test]
    fn test_button_event_shape() {
        let event = BridgeEvent::Button(ButtonEvent {
            button: Button::Button2,
            action: ButtonAction::Released,
            repeat_count: 1,
            key_code: 132,
            timestamp: Utc::now(),
        });
        let msg = MqttEvent::from_event("hall", &event);
        assert_eq!(msg.op(), "BUTTON");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["device"], "hall");
        assert_eq!(json["button"], "button_2");
        assert_eq!(json["action"], "released");
        assert_eq!(json["repeatCount"], 1);
        assert_eq!(json["keyCode"], 132);
    }

    #[test]
    fn test_relays_numbered_from_one() {
        let relays = BTreeMap::from([(0, true), (1, false)]);
        let event = BridgeEvent::RelayUpdate {
            relay: 0,
            on: true,
            relays,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(MqttEvent::from_event("hall", &event)).unwrap();
        assert_eq!(json["relay"], 1);
        assert_eq!(json["relays"]["1"], true);
        assert_eq!(json["relays"]["2"], false);
    }

    #[test]
    fn test_cmd_ack_omits_empty_fields() {
        let json = serde_json::to_value(MqttCmdAck::new(true, None, None)).unwrap();
        assert_eq!(json["op"], "CMD_ACK");
        assert!(json.get("src").is_none());
        assert!(json.get("error").is_none());
    }
}
