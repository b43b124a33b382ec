use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::RelayState};

/// Which line level energizes the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolarity {
    ActiveHigh,
    ActiveLow,
}

impl OutputPolarity {
    /// Returns `true` when the line must be driven high for `state`.
    pub fn drive_high(self, state: RelayState) -> bool {
        match self {
            Self::ActiveHigh => state.is_on(),
            Self::ActiveLow => !state.is_on(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub boot_loop_threshold: u8,
    pub safe_default: RelayState,
    pub polarity: OutputPolarity,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            boot_loop_threshold: 5,
            safe_default: RelayState::On,
            polarity: OutputPolarity::ActiveLow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    pub debounce_ms: u64,
    pub cooldown_ms: u64,
    pub active_low: bool,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            cooldown_ms: 300,
            active_low: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_channel: u8,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ap_ssid: "SmartSwitch-AP".to_string(),
            ap_password: String::new(),
            ap_channel: 1,
            http_port: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PinConfig {
    pub relay_pin: i32,
    pub button_pin: Option<i32>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            relay_pin: 2,
            button_pin: Some(0),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub switch: SwitchConfig,
    pub button: ButtonConfig,
    pub network: NetworkConfig,
    pub pins: PinConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.switch.sanitize();
        self.button.sanitize();
        self.network.sanitize();
        self.pins.sanitize();
    }
}

impl SwitchConfig {
    pub fn sanitize(&mut self) {
        // 0xFF is what an erased cell reads back as; keep it out of range.
        self.boot_loop_threshold = self.boot_loop_threshold.clamp(1, 254);
    }
}

impl ButtonConfig {
    pub fn sanitize(&mut self) {
        self.debounce_ms = self.debounce_ms.clamp(5, 1_000);
        self.cooldown_ms = self.cooldown_ms.min(10_000);
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        if self.ap_ssid.trim().is_empty() {
            self.ap_ssid = Self::default().ap_ssid;
        }

        // WPA2 needs 8+ characters; anything shorter runs an open AP.
        if !self.ap_password.is_empty() && self.ap_password.len() < 8 {
            self.ap_password.clear();
        }

        self.ap_channel = self.ap_channel.clamp(1, 13);

        if self.http_port == 0 {
            self.http_port = 80;
        }
    }
}

impl PinConfig {
    pub fn sanitize(&mut self) {
        if self.relay_pin < 0 {
            self.relay_pin = 2;
        }

        if matches!(self.button_pin, Some(pin) if pin < 0) {
            self.button_pin = None;
        }

        if self.button_pin == Some(self.relay_pin) {
            self.button_pin = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn polarity_maps_state_to_level() {
        assert!(!OutputPolarity::ActiveLow.drive_high(RelayState::On));
        assert!(OutputPolarity::ActiveLow.drive_high(RelayState::Off));
        assert!(OutputPolarity::ActiveHigh.drive_high(RelayState::On));
        assert!(!OutputPolarity::ActiveHigh.drive_high(RelayState::Off));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            RuntimeConfig::from_json(br#"{"switch":{"boot_loop_threshold":3}}"#).unwrap();

        assert_eq!(config.switch.boot_loop_threshold, 3);
        assert_eq!(config.switch.safe_default, RelayState::On);
        assert_eq!(config.switch.polarity, OutputPolarity::ActiveLow);
        assert_eq!(config.network.http_port, 80);
        assert_eq!(config.pins, PinConfig::default());
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = RuntimeConfig::default();
        config.switch.boot_loop_threshold = 0;
        config.button.debounce_ms = 0;
        config.network.ap_ssid = "  ".to_string();
        config.network.ap_password = "short".to_string();
        config.network.http_port = 0;
        config.pins.button_pin = Some(config.pins.relay_pin);

        config.sanitize();

        assert_eq!(config.switch.boot_loop_threshold, 1);
        assert_eq!(config.button.debounce_ms, 5);
        assert_eq!(config.network.ap_ssid, "SmartSwitch-AP");
        assert!(config.network.ap_password.is_empty());
        assert_eq!(config.network.http_port, 80);
        assert_eq!(config.pins.button_pin, None);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RuntimeConfig::from_json(b"{not json").is_err());
    }
}
