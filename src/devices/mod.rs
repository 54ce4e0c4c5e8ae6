// MIT License - Copyright (c) 2026 Peter Wright
// Device model

pub mod backlight;
pub mod button;
pub mod relay;
pub mod state;

pub use backlight::BacklightColor;
pub use button::{Button, ButtonAction, ButtonTarget};
pub use relay::RelaySwitch;
pub use state::DeviceState;
