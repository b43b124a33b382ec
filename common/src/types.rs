use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub const ON_BYTE: u8 = 1;
    pub const OFF_BYTE: u8 = 0;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn inverted(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }

    /// Persisted encoding. Only `0` and `1` are valid.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::On => Self::ON_BYTE,
            Self::Off => Self::OFF_BYTE,
        }
    }

    pub fn from_byte(raw: u8) -> Option<Self> {
        match raw {
            Self::ON_BYTE => Some(Self::On),
            Self::OFF_BYTE => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
    /// No command matched; render the control page.
    Query,
}

impl Command {
    pub fn target(self) -> Option<RelayState> {
        match self {
            Self::TurnOn => Some(RelayState::On),
            Self::TurnOff => Some(RelayState::Off),
            Self::Query => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    NoOp,
}

/// Outcome of one cold start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub relay_state: RelayState,
    pub forced_safe_default: bool,
    /// Counter value persisted once accounting finished.
    pub boot_count: u8,
    /// Raw relay byte that failed to decode, if any.
    pub corrupt_relay_byte: Option<u8>,
    /// Raw counter byte above the threshold, if any.
    pub corrupt_boot_count: Option<u8>,
}

impl BootReport {
    pub fn recovered_from_corruption(&self) -> bool {
        self.corrupt_relay_byte.is_some() || self.corrupt_boot_count.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_encoding_rejects_anything_but_zero_and_one() {
        assert_eq!(RelayState::from_byte(0), Some(RelayState::Off));
        assert_eq!(RelayState::from_byte(1), Some(RelayState::On));
        assert_eq!(RelayState::from_byte(2), None);
        assert_eq!(RelayState::from_byte(0xFF), None);
    }

    #[test]
    fn command_targets() {
        assert_eq!(Command::TurnOn.target(), Some(RelayState::On));
        assert_eq!(Command::TurnOff.target(), Some(RelayState::Off));
        assert_eq!(Command::Query.target(), None);
    }
}
