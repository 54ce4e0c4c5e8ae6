// MIT License - Copyright (c) 2026 Peter Wright
// Button backlights

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Backlight colour of a button LED.
///
/// Wire values: 0 = off, 1 = white, 2 = yellow, 3 = both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklightColor {
    #[default]
    Off,
    White,
    Yellow,
    Both,
}

impl BacklightColor {
    pub const ALL: [BacklightColor; 4] = [
        BacklightColor::Off,
        BacklightColor::White,
        BacklightColor::Yellow,
        BacklightColor::Both,
    ];

    /// Parse from the numeric wire value.
    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Off),
            1 => Some(Self::White),
            2 => Some(Self::Yellow),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::White => 1,
            Self::Yellow => 2,
            Self::Both => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::White => "white",
            Self::Yellow => "yellow",
            Self::Both => "both",
        }
    }

    /// Whether any LED is lit.
    pub fn is_lit(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl std::fmt::Display for BacklightColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacklightColor {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| BridgeError::invalid_argument("color", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        for color in BacklightColor::ALL {
            assert_eq!(BacklightColor::from_value(i64::from(color.value())), Some(color));
        }
        assert_eq!(BacklightColor::from_value(4), None);
        assert_eq!(BacklightColor::from_value(-1), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("white".parse::<BacklightColor>().unwrap(), BacklightColor::White);
        assert_eq!("Yellow".parse::<BacklightColor>().unwrap(), BacklightColor::Yellow);
        assert_eq!(" BOTH ".parse::<BacklightColor>().unwrap(), BacklightColor::Both);
        assert!("purple".parse::<BacklightColor>().is_err());
        assert!("".parse::<BacklightColor>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&BacklightColor::Off).unwrap(), "\"off\"");
        let c: BacklightColor = serde_json::from_str("\"yellow\"").unwrap();
        assert_eq!(c, BacklightColor::Yellow);
    }
}
