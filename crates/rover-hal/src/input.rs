//! [`InputDevice`] – polled operator gamepad.
//!
//! Besides axes and buttons a pad may report its battery and drive rumble
//! motors. Support for those varies between devices and driver versions, so
//! callers ask [`InputDevice::capabilities`] once at startup and fall back to
//! [`BatteryStatus::unknown`] / no haptics when a feature is missing.

use std::time::Duration;

use rover_types::RoverError;
use serde::{Deserialize, Serialize};

/// Digital buttons sampled on one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Buttons {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub left_bumper: bool,
    pub right_bumper: bool,
}

/// Raw pad state: sticks in `[-1, 1]`, triggers in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawPadState {
    pub left_x: f64,
    pub left_y: f64,
    pub right_x: f64,
    pub right_y: f64,
    pub left_trigger: f64,
    pub right_trigger: f64,
    pub buttons: Buttons,
}

/// Optional features a device reports it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputCapabilities {
    pub battery: bool,
    pub rumble: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    #[default]
    Unknown,
    Empty,
    Low,
    Medium,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryKind {
    #[default]
    Unknown,
    Disconnected,
    Wired,
    Alkaline,
    Nimh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub level: BatteryLevel,
    pub kind: BatteryKind,
}

impl BatteryStatus {
    /// Fallback used when the device cannot report its battery.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Low or empty, and not on a cable.
    pub fn is_low(&self) -> bool {
        self.kind != BatteryKind::Wired
            && matches!(self.level, BatteryLevel::Low | BatteryLevel::Empty)
    }
}

/// A polled input device.
pub trait InputDevice: Send {
    fn name(&self) -> &str;

    /// Sample the device. `Ok(None)` means the device is disconnected.
    fn poll(&mut self) -> Result<Option<RawPadState>, RoverError>;

    /// Try to re-acquire a disconnected device.
    fn reconnect(&mut self) -> Result<(), RoverError> {
        Ok(())
    }

    fn capabilities(&self) -> InputCapabilities {
        InputCapabilities::default()
    }

    fn battery(&mut self) -> Result<BatteryStatus, RoverError> {
        Err(RoverError::hardware(self.name().to_string(), "battery reporting unsupported"))
    }

    /// Run the low- and high-frequency motors at the given strength for
    /// `duration`.
    fn rumble(&mut self, low: u16, high: u16, duration: Duration) -> Result<(), RoverError> {
        let _ = (low, high, duration);
        Err(RoverError::hardware(self.name().to_string(), "rumble unsupported"))
    }
}
