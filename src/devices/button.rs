// MIT License - Copyright (c) 2026 Peter Wright
// Panel buttons

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{BUTTON_KEYCODES, NUM_BUTTONS};
use crate::error::BridgeError;

/// One of the four physical buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Button {
    #[serde(rename = "button_1")]
    Button1,
    #[serde(rename = "button_2")]
    Button2,
    #[serde(rename = "button_3")]
    Button3,
    #[serde(rename = "button_4")]
    Button4,
}

impl Button {
    pub const ALL: [Button; 4] = [
        Button::Button1,
        Button::Button2,
        Button::Button3,
        Button::Button4,
    ];

    /// Map a panel key code (131-134) to a button.
    pub fn from_key_code(code: i64) -> Option<Self> {
        BUTTON_KEYCODES
            .iter()
            .position(|&k| k == code)
            .map(|i| Self::ALL[i])
    }

    /// Map a human-facing button number (1-4) to a button.
    pub fn from_number(number: i64) -> Option<Self> {
        if (1..=i64::from(NUM_BUTTONS)).contains(&number) {
            Some(Self::ALL[(number - 1) as usize])
        } else {
            None
        }
    }

    /// The key code the panel reports for this button.
    pub fn key_code(&self) -> i64 {
        BUTTON_KEYCODES[self.index() as usize]
    }

    /// Zero-based wire index, as used by backlight messages.
    pub fn index(&self) -> u8 {
        match self {
            Self::Button1 => 0,
            Self::Button2 => 1,
            Self::Button3 => 2,
            Self::Button4 => 3,
        }
    }

    /// Human-facing number (1-4).
    pub fn number(&self) -> u8 {
        self.index() + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button1 => "button_1",
            Self::Button2 => "button_2",
            Self::Button3 => "button_3",
            Self::Button4 => "button_4",
        }
    }
}

impl std::fmt::Display for Button {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Press or release, from the `action` field of a button frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Pressed,
    Released,
}

impl ButtonAction {
    /// 0 is a press; any other code is treated as a release.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            Self::Pressed
        } else {
            Self::Released
        }
    }

    pub fn is_pressed(&self) -> bool {
        matches!(self, Self::Pressed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pressed => "pressed",
            Self::Released => "released",
        }
    }
}

/// Button argument accepted by backlight commands: a number or "all".
///
/// Numbers are kept unvalidated so the command can reject them without
/// sending anything. Text that is neither a number nor "all" converts to
/// `Invalid`, which every command rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonTarget {
    Number(i64),
    All,
    Invalid,
}

impl ButtonTarget {
    /// The addressed button, if the number is in range.
    pub fn button(&self) -> Option<Button> {
        match self {
            Self::Number(n) => Button::from_number(*n),
            Self::All | Self::Invalid => None,
        }
    }
}

impl From<i32> for ButtonTarget {
    fn from(n: i32) -> Self {
        Self::Number(i64::from(n))
    }
}

impl From<i64> for ButtonTarget {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ButtonTarget {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or(Self::Invalid)
    }
}

impl From<Button> for ButtonTarget {
    fn from(button: Button) -> Self {
        Self::Number(i64::from(button.number()))
    }
}

impl FromStr for ButtonTarget {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<i64>()
            .map(Self::Number)
            .map_err(|_| BridgeError::invalid_argument("button", s))
    }
}
