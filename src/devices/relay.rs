// MIT License - Copyright (c) 2026 Peter Wright
// Relay outputs

use serde::{Deserialize, Serialize};

use crate::constants::NUM_RELAYS;

/// Whether a zero-based wire index names a relay this device has.
pub fn is_valid_index(index: i64) -> bool {
    (0..i64::from(NUM_RELAYS)).contains(&index)
}

/// Map a human-facing relay number (1-based) to its wire index.
pub fn wire_index(relay: i64) -> Option<u8> {
    relay
        .checked_sub(1)
        .filter(|index| is_valid_index(*index))
        .and_then(|index| u8::try_from(index).ok())
}

/// Requested relay position, as accepted by the service layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelaySwitch {
    On,
    Off,
}

impl RelaySwitch {
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

impl From<bool> for RelaySwitch {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_index() {
        assert_eq!(wire_index(1), Some(0));
        assert_eq!(wire_index(2), Some(1));
        assert_eq!(wire_index(0), None);
        assert_eq!(wire_index(3), None);
        assert_eq!(wire_index(i64::MIN), None);
        assert_eq!(wire_index(i64::MAX), None);
    }

    #[test]
    fn test_valid_index() {
        assert!(is_valid_index(0));
        assert!(is_valid_index(1));
        assert!(!is_valid_index(2));
        assert!(!is_valid_index(-1));
    }

    #[test]
    fn test_switch() {
        assert!(RelaySwitch::from(true).is_on());
        assert!(!RelaySwitch::Off.is_on());
        let s: RelaySwitch = serde_json::from_str("\"on\"").unwrap();
        assert_eq!(s, RelaySwitch::On);
    }
}
