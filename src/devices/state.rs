// MIT License - Copyright (c) 2026 Peter Wright
// In-memory device snapshot

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constants::{NUM_BUTTONS, NUM_RELAYS};
use crate::devices::backlight::BacklightColor;
use crate::devices::button::Button;

/// The authoritative in-memory snapshot of the panel.
///
/// Only the message dispatcher mutates it; everybody else receives clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    buttons: BTreeMap<Button, bool>,
    relays: BTreeMap<u8, bool>,
    backlights: BTreeMap<u8, BacklightColor>,
    proximity: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            buttons: Button::ALL.into_iter().map(|b| (b, false)).collect(),
            relays: (0..NUM_RELAYS).map(|i| (i, false)).collect(),
            backlights: (0..NUM_BUTTONS)
                .map(|i| (i, BacklightColor::Off))
                .collect(),
            proximity: false,
        }
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons.get(&button).copied().unwrap_or(false)
    }

    pub fn buttons(&self) -> &BTreeMap<Button, bool> {
        &self.buttons
    }

    /// Relay state by zero-based wire index.
    pub fn relay(&self, index: u8) -> Option<bool> {
        self.relays.get(&index).copied()
    }

    pub fn relays(&self) -> &BTreeMap<u8, bool> {
        &self.relays
    }

    /// Backlight colour by zero-based button index.
    pub fn backlight(&self, index: u8) -> Option<BacklightColor> {
        self.backlights.get(&index).copied()
    }

    pub fn backlights(&self) -> &BTreeMap<u8, BacklightColor> {
        &self.backlights
    }

    pub fn proximity(&self) -> bool {
        self.proximity
    }

    pub(crate) fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons.insert(button, pressed);
    }

    /// Returns false (and changes nothing) for an unsupported index.
    pub(crate) fn set_relay(&mut self, index: u8, on: bool) -> bool {
        match self.relays.get_mut(&index) {
            Some(slot) => {
                *slot = on;
                true
            }
            None => false,
        }
    }

    /// Returns the previous colour, or `None` for an unsupported index.
    pub(crate) fn set_backlight(&mut self, index: u8, color: BacklightColor) -> Option<BacklightColor> {
        self.backlights
            .get_mut(&index)
            .map(|slot| std::mem::replace(slot, color))
    }

    pub(crate) fn set_proximity(&mut self, detected: bool) {
        self.proximity = detected;
    }
}
