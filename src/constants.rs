// MIT License - Copyright (c) 2026 Peter Wright
// iPano Plus protocol constants

/// Default TCP port of the iPano Plus control service.
pub const DEFAULT_PORT: u16 = 3124;

/// Default device address used when none is configured.
pub const DEFAULT_HOST: &str = "192.168.2.120";

/// Default display name of a bridge.
pub const DEFAULT_NAME: &str = "iPano Plus";

/// The only status code that marks an inbound frame as valid.
pub const STATUS_OK: i64 = 200;

/// Frame terminator on the wire.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Read buffer size for the socket reader.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Upper bound on buffered bytes of an unterminated frame.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Number of physical buttons (and backlights) on the 6-inch iPano Plus.
pub const NUM_BUTTONS: u8 = 4;

/// Number of relays on the 6-inch iPano Plus.
pub const NUM_RELAYS: u8 = 2;

/// Key codes reported by the panel for buttons 1 to 4, in order.
pub const BUTTON_KEYCODES: [i64; 4] = [131, 132, 133, 134];

/// Message type codes carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Button press or release (panel → client)
    Button = 0,
    /// Backlight state report; also used to query backlight state
    BacklightChange = 10,
    /// Set one backlight (client → panel)
    BacklightControl = 11,
    /// Wake the screen (client → panel)
    ScreenWake = 20,
    /// Query the foreground application
    ForegroundQuery = 30,
    /// Launch an application on the panel
    StartApplication = 40,
    /// Relay state report (panel → client)
    RelayChange = 50,
    /// Switch a relay (client → panel)
    RelayControl = 51,
    /// Ask the panel to report relay state
    RelayQuery = 52,
    /// Proximity sensor report (panel → client)
    Proximity = 60,
    /// Configure the proximity sensor
    ProximitySet = 61,
    /// Ask the panel to report proximity state
    ProximityQuery = 62,
    /// Liveness message, both directions
    Heartbeat = 500,
}

impl MessageType {
    /// Look up a message type by its wire code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Button),
            10 => Some(Self::BacklightChange),
            11 => Some(Self::BacklightControl),
            20 => Some(Self::ScreenWake),
            30 => Some(Self::ForegroundQuery),
            40 => Some(Self::StartApplication),
            50 => Some(Self::RelayChange),
            51 => Some(Self::RelayControl),
            52 => Some(Self::RelayQuery),
            60 => Some(Self::Proximity),
            61 => Some(Self::ProximitySet),
            62 => Some(Self::ProximityQuery),
            500 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// The numeric wire code.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "BUTTON",
            Self::BacklightChange => "BACKLIGHT_CHANGE",
            Self::BacklightControl => "BACKLIGHT_CONTROL",
            Self::ScreenWake => "SCREEN_WAKE",
            Self::ForegroundQuery => "FOREGROUND_QUERY",
            Self::StartApplication => "START_APPLICATION",
            Self::RelayChange => "RELAY_CHANGE",
            Self::RelayControl => "RELAY_CONTROL",
            Self::RelayQuery => "RELAY_QUERY",
            Self::Proximity => "PROXIMITY",
            Self::ProximitySet => "PROXIMITY_SET",
            Self::ProximityQuery => "PROXIMITY_QUERY",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        assert_eq!(MessageType::Button.code(), 0);
        assert_eq!(MessageType::BacklightChange.code(), 10);
        assert_eq!(MessageType::RelayQuery.code(), 52);
        assert_eq!(MessageType::Heartbeat.code(), 500);
    }

    #[test]
    fn test_message_type_from_code() {
        for code in [0, 10, 11, 20, 30, 40, 50, 51, 52, 60, 61, 62, 500] {
            let ty = MessageType::from_code(code).expect("known code");
            assert_eq!(i64::from(ty.code()), code);
        }
        assert_eq!(MessageType::from_code(12), None);
        assert_eq!(MessageType::from_code(-1), None);
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(MessageType::RelayChange.to_string(), "RELAY_CHANGE(50)");
    }
}
