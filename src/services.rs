// MIT License - Copyright (c) 2026 Peter Wright
// Validated service calls and backlight effects

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::bridge::IpanoBridge;
use crate::devices::{BacklightColor, ButtonTarget, RelaySwitch};
use crate::error::{BridgeError, Result};

fn default_white() -> BacklightColor {
    BacklightColor::White
}

fn default_off() -> BacklightColor {
    BacklightColor::Off
}

fn default_times() -> u32 {
    1
}

fn default_pulse_duration() -> f64 {
    0.5
}

fn default_fade_duration() -> f64 {
    2.0
}

fn default_cycles() -> u32 {
    3
}

fn default_breath_duration() -> f64 {
    4.0
}

/// On/off steps per breathing cycle.
const BREATH_STEPS: u32 = 5;

/// A service request, as received from the command topic.
///
/// ```json
/// {"service": "pulse_backlight", "button": 2, "color": "yellow", "times": 3}
/// ```
///
/// Omitted optional fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceCall {
    WakeScreen,
    SetBacklight {
        button: i64,
        color: BacklightColor,
    },
    SetAllBacklights {
        color: BacklightColor,
    },
    /// Flash `times` times, `duration` seconds on then off.
    PulseBacklight {
        button: i64,
        #[serde(default = "default_white")]
        color: BacklightColor,
        #[serde(default = "default_times")]
        times: u32,
        #[serde(default = "default_pulse_duration")]
        duration: f64,
    },
    /// Show `from_color`, then switch to `to_color`.
    FadeBacklight {
        button: i64,
        #[serde(default = "default_white")]
        from_color: BacklightColor,
        #[serde(default = "default_off")]
        to_color: BacklightColor,
        #[serde(default = "default_fade_duration")]
        duration: f64,
    },
    /// Each cycle toggles five times, a tenth of `breath_duration` per step.
    BreathingBacklight {
        button: i64,
        #[serde(default = "default_white")]
        color: BacklightColor,
        #[serde(default = "default_cycles")]
        cycles: u32,
        #[serde(default = "default_breath_duration")]
        breath_duration: f64,
    },
    ControlRelay {
        relay: i64,
        state: RelaySwitch,
    },
}

impl ServiceCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WakeScreen => "wake_screen",
            Self::SetBacklight { .. } => "set_backlight",
            Self::SetAllBacklights { .. } => "set_all_backlights",
            Self::PulseBacklight { .. } => "pulse_backlight",
            Self::FadeBacklight { .. } => "fade_backlight",
            Self::BreathingBacklight { .. } => "breathing_backlight",
            Self::ControlRelay { .. } => "control_relay",
        }
    }

    /// Check every argument against its allowed range.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::WakeScreen => Ok(()),
            Self::SetBacklight { button, color } => {
                check_button(*button)?;
                check_plain_color("color", *color)
            }
            Self::SetAllBacklights { color } => check_plain_color("color", *color),
            Self::PulseBacklight {
                button,
                color,
                times,
                duration,
            } => {
                check_button(*button)?;
                check_lit_color("color", *color)?;
                check_range("times", f64::from(*times), 1.0, 10.0)?;
                check_range("duration", *duration, 0.1, 5.0)
            }
            Self::FadeBacklight {
                button,
                from_color,
                to_color,
                duration,
            } => {
                check_button(*button)?;
                check_lit_color("from_color", *from_color)?;
                check_plain_color("to_color", *to_color)?;
                check_range("duration", *duration, 0.5, 10.0)
            }
            Self::BreathingBacklight {
                button,
                color,
                cycles,
                breath_duration,
            } => {
                check_button(*button)?;
                check_lit_color("color", *color)?;
                check_range("cycles", f64::from(*cycles), 1.0, 10.0)?;
                check_range("breath_duration", *breath_duration, 1.0, 10.0)
            }
            Self::ControlRelay { relay, .. } => {
                check_range("relay", *relay as f64, 1.0, 6.0)
            }
        }
    }

    /// Run this call against one bridge. True if every command it sent
    /// succeeded.
    pub async fn run_on(&self, bridge: &IpanoBridge) -> bool {
        if let Err(e) = self.validate() {
            warn!("{}: rejected {}: {}", bridge.name(), self.name(), e);
            return false;
        }

        match self {
            Self::WakeScreen => bridge.wake_screen().await,
            Self::SetBacklight { button, color } => {
                bridge
                    .set_backlight(*button, color.as_str())
                    .await
            }
            Self::SetAllBacklights { color } => bridge.set_all_backlights(color.as_str()).await,
            Self::PulseBacklight {
                button,
                color,
                times,
                duration,
            } => {
                info!("{}: pulsing button {} backlight {} times", bridge.name(), button, times);
                let step = Duration::from_secs_f64(*duration);
                let mut ok = true;
                for _ in 0..*times {
                    ok &= flash(bridge, *button, *color, step).await;
                }
                ok
            }
            Self::FadeBacklight {
                button,
                from_color,
                to_color,
                duration,
            } => {
                info!(
                    "{}: fading button {} from {} to {}",
                    bridge.name(),
                    button,
                    from_color,
                    to_color
                );
                let target = ButtonTarget::from(*button);
                let mut ok = bridge.set_backlight(target, from_color.as_str()).await;
                let hold = if to_color.is_lit() {
                    Duration::from_secs_f64(duration / 2.0)
                } else {
                    Duration::from_secs_f64(*duration)
                };
                sleep(hold).await;
                ok &= bridge.set_backlight(target, to_color.as_str()).await;
                ok
            }
            Self::BreathingBacklight {
                button,
                color,
                cycles,
                breath_duration,
            } => {
                info!("{}: breathing effect on button {}", bridge.name(), button);
                let step = Duration::from_secs_f64(breath_duration / 10.0);
                let mut ok = true;
                for _ in 0..(*cycles * BREATH_STEPS) {
                    ok &= flash(bridge, *button, *color, step).await;
                }
                ok
            }
            Self::ControlRelay { relay, state } => bridge.control_relay(*relay, state.is_on()).await,
        }
    }
}

/// One on/off blink, holding each phase for `step`.
async fn flash(bridge: &IpanoBridge, button: i64, color: BacklightColor, step: Duration) -> bool {
    let target = ButtonTarget::from(button);
    let on = bridge.set_backlight(target, color.as_str()).await;
    sleep(step).await;
    let off = bridge.set_backlight(target, BacklightColor::Off.as_str()).await;
    sleep(step).await;
    on && off
}

fn check_button(button: i64) -> Result<()> {
    check_range("button", button as f64, 1.0, 4.0)
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(BridgeError::invalid_argument(name, value))
    }
}

/// Services accept off, white and yellow; "both" is panel-only.
fn check_plain_color(name: &'static str, color: BacklightColor) -> Result<()> {
    if color == BacklightColor::Both {
        Err(BridgeError::invalid_argument(name, color))
    } else {
        Ok(())
    }
}

/// White or yellow.
fn check_lit_color(name: &'static str, color: BacklightColor) -> Result<()> {
    match color {
        BacklightColor::White | BacklightColor::Yellow => Ok(()),
        other => Err(BridgeError::invalid_argument(name, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ServiceCall {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        assert_eq!(
            parse(json!({"service": "pulse_backlight", "button": 2})),
            ServiceCall::PulseBacklight {
                button: 2,
                color: BacklightColor::White,
                times: 1,
                duration: 0.5,
            }
        );
        assert_eq!(
            parse(json!({"service": "fade_backlight", "button": 1})),
            ServiceCall::FadeBacklight {
                button: 1,
                from_color: BacklightColor::White,
                to_color: BacklightColor::Off,
                duration: 2.0,
            }
        );
        assert_eq!(
            parse(json!({"service": "breathing_backlight", "button": 4, "color": "yellow"})),
            ServiceCall::BreathingBacklight {
                button: 4,
                color: BacklightColor::Yellow,
                cycles: 3,
                breath_duration: 4.0,
            }
        );
        assert_eq!(parse(json!({"service": "wake_screen"})), ServiceCall::WakeScreen);
        assert_eq!(
            parse(json!({"service": "control_relay", "relay": 1, "state": "on"})),
            ServiceCall::ControlRelay {
                relay: 1,
                state: RelaySwitch::On,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(serde_json::from_value::<ServiceCall>(json!({"service": "reboot"})).is_err());
        assert!(serde_json::from_value::<ServiceCall>(json!({"service": "set_backlight", "button": 1})).is_err());
        assert!(
            serde_json::from_value::<ServiceCall>(json!({"service": "set_all_backlights", "color": "purple"}))
                .is_err()
        );
    }

    #[test]
    fn test_validation_ranges() {
        assert!(parse(json!({"service": "set_backlight", "button": 4, "color": "off"})).validate().is_ok());
        assert!(parse(json!({"service": "set_backlight", "button": 5, "color": "off"})).validate().is_err());
        assert!(parse(json!({"service": "set_backlight", "button": 1, "color": "both"})).validate().is_err());
        assert!(parse(json!({"service": "pulse_backlight", "button": 1, "color": "off"})).validate().is_err());
        assert!(parse(json!({"service": "pulse_backlight", "button": 1, "times": 11})).validate().is_err());
        assert!(parse(json!({"service": "pulse_backlight", "button": 1, "duration": 0.05})).validate().is_err());
        assert!(parse(json!({"service": "fade_backlight", "button": 1, "duration": 10.0})).validate().is_ok());
        assert!(parse(json!({"service": "fade_backlight", "button": 1, "duration": 0.4})).validate().is_err());
        assert!(parse(json!({"service": "breathing_backlight", "button": 1, "cycles": 0})).validate().is_err());
        assert!(
            parse(json!({"service": "breathing_backlight", "button": 1, "breath_duration": 0.5}))
                .validate()
                .is_err()
        );
        assert!(parse(json!({"service": "control_relay", "relay": 6, "state": "off"})).validate().is_ok());
        assert!(parse(json!({"service": "control_relay", "relay": 7, "state": "off"})).validate().is_err());
    }

    #[test]
    fn test_names_match_tags() {
        let call = parse(json!({"service": "set_all_backlights", "color": "yellow"}));
        assert_eq!(call.name(), "set_all_backlights");
        assert_eq!(serde_json::to_value(&call).unwrap()["service"], "set_all_backlights");
    }

    #[tokio::test]
    async fn test_invalid_call_sends_nothing() {
        let bridge = IpanoBridge::new(crate::BridgeConfig::default());
        let call = parse(json!({"service": "set_backlight", "button": 9, "color": "white"}));
        assert!(!call.run_on(&bridge).await);
    }
}
