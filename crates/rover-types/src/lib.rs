//! Shared data model for the rover teleoperation core.
//!
//! Everything that crosses a crate boundary lives here: the bus [`Topic`] and
//! its [`Payload`] sum type, the per-sensor snapshot structs, drive commands,
//! poses, the safety flags and the workspace-wide [`RoverError`].

pub mod clock;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, to_datetime};

// ─────────────────────────────────────────────────────────────────────────────
// Topics & payloads
// ─────────────────────────────────────────────────────────────────────────────

/// A named channel on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Ultrasonic range finder mounted at the front.
    Sonar,
    /// Left time-of-flight range sensor.
    TofLeft,
    /// Right time-of-flight range sensor.
    TofRight,
    /// Humidity + temperature board.
    Climate,
    /// Ambient light sensor.
    Light,
    /// Drive commands issued by the teleop loop.
    Drive,
    /// Safety flag snapshots.
    Safety,
}

impl Topic {
    /// Every topic fed by a sensor service.
    pub const SENSORS: [Topic; 5] = [
        Topic::Sonar,
        Topic::TofLeft,
        Topic::TofRight,
        Topic::Climate,
        Topic::Light,
    ];

    /// Ranging topics, all carrying [`Payload::Range`].
    pub const RANGING: [Topic; 3] = [Topic::Sonar, Topic::TofLeft, Topic::TofRight];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Sonar => "sonar",
            Topic::TofLeft => "tof.left",
            Topic::TofRight => "tof.right",
            Topic::Climate => "climate",
            Topic::Light => "light",
            Topic::Drive => "drive",
            Topic::Safety => "safety",
        }
    }

    /// Whether `payload` is the variant this topic carries.
    pub fn accepts(self, payload: &Payload) -> bool {
        matches!(
            (self, payload),
            (Topic::Sonar | Topic::TofLeft | Topic::TofRight, Payload::Range(_))
                | (Topic::Climate, Payload::Climate(_))
                | (Topic::Light, Payload::Light(_))
                | (Topic::Drive, Payload::Drive(_))
                | (Topic::Safety, Payload::Safety(_))
        )
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can travel over the bus. Each [`Topic`] carries exactly
/// one variant (see [`Topic::accepts`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Range(RangeSnapshot),
    Climate(ClimateSnapshot),
    Light(LightSnapshot),
    Drive(DriveSample),
    Safety(SafetyState),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Range(_) => "range",
            Payload::Climate(_) => "climate",
            Payload::Light(_) => "light",
            Payload::Drive(_) => "drive",
            Payload::Safety(_) => "safety",
        }
    }

    /// Capture timestamp of the payload, in milliseconds since the epoch.
    pub fn timestamp_ms(&self) -> Option<u64> {
        match self {
            Payload::Range(s) => Some(s.timestamp_ms),
            Payload::Climate(s) => Some(s.timestamp_ms),
            Payload::Light(s) => Some(s.timestamp_ms),
            Payload::Drive(s) => Some(s.timestamp_ms),
            Payload::Safety(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Latest state of a ranging sensor (sonar or time-of-flight).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSnapshot {
    /// Last known-good distance in millimetres.
    pub distance_mm: Option<f64>,
    pub attached: bool,
    pub timestamp_ms: u64,
    pub last_error: Option<String>,
}

impl RangeSnapshot {
    /// The distance, if the sensor is attached and has produced a usable value.
    pub fn valid_distance(&self) -> Option<f64> {
        self.distance_mm
            .filter(|d| self.attached && d.is_finite() && *d > 0.0)
    }
}

/// Latest state of the humidity/temperature board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateSnapshot {
    pub humidity_pct: Option<f64>,
    pub temperature_c: Option<f64>,
    pub attached: bool,
    pub timestamp_ms: u64,
    pub last_error: Option<String>,
}

/// Latest state of the ambient light sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSnapshot {
    pub illuminance_lux: Option<f64>,
    pub attached: bool,
    pub timestamp_ms: u64,
    pub last_error: Option<String>,
}

/// A raw read from a hardware channel that can be folded into a sticky
/// last-known-good value.
///
/// Invalid fields (NaN, or non-positive distances) leave the sticky value
/// untouched.
pub trait StickyReading: Copy + Send + 'static {
    /// The retained value, `Default` meaning "nothing valid seen yet".
    type Sticky: Copy + Default + Send + Sync + 'static;

    /// Fold this reading into `sticky`. Returns `true` if at least one field
    /// was valid.
    fn absorb(self, sticky: &mut Self::Sticky) -> bool;

    /// Build the published snapshot for the current sticky value.
    fn snapshot(
        sticky: Self::Sticky,
        attached: bool,
        timestamp_ms: u64,
        last_error: Option<String>,
    ) -> Payload;
}

/// Distance read in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeReading(pub f64);

impl StickyReading for RangeReading {
    type Sticky = Option<f64>;

    fn absorb(self, sticky: &mut Option<f64>) -> bool {
        if self.0.is_finite() && self.0 > 0.0 {
            *sticky = Some(self.0);
            true
        } else {
            false
        }
    }

    fn snapshot(sticky: Option<f64>, attached: bool, timestamp_ms: u64, last_error: Option<String>) -> Payload {
        Payload::Range(RangeSnapshot {
            distance_mm: sticky,
            attached,
            timestamp_ms,
            last_error,
        })
    }
}

/// One read of the humidity and temperature channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub humidity_pct: f64,
    pub temperature_c: f64,
}

/// Sticky value kept per field, so a failing temperature channel does not
/// discard a good humidity value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClimateValue {
    pub humidity_pct: Option<f64>,
    pub temperature_c: Option<f64>,
}

impl StickyReading for ClimateReading {
    type Sticky = ClimateValue;

    fn absorb(self, sticky: &mut ClimateValue) -> bool {
        let mut any = false;
        if self.humidity_pct.is_finite() {
            sticky.humidity_pct = Some(self.humidity_pct);
            any = true;
        }
        if self.temperature_c.is_finite() {
            sticky.temperature_c = Some(self.temperature_c);
            any = true;
        }
        any
    }

    fn snapshot(sticky: ClimateValue, attached: bool, timestamp_ms: u64, last_error: Option<String>) -> Payload {
        Payload::Climate(ClimateSnapshot {
            humidity_pct: sticky.humidity_pct,
            temperature_c: sticky.temperature_c,
            attached,
            timestamp_ms,
            last_error,
        })
    }
}

/// Illuminance read in lux.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightReading(pub f64);

impl StickyReading for LightReading {
    type Sticky = Option<f64>;

    fn absorb(self, sticky: &mut Option<f64>) -> bool {
        if self.0.is_finite() && self.0 >= 0.0 {
            *sticky = Some(self.0);
            true
        } else {
            false
        }
    }

    fn snapshot(sticky: Option<f64>, attached: bool, timestamp_ms: u64, last_error: Option<String>) -> Payload {
        Payload::Light(LightSnapshot {
            illuminance_lux: sticky,
            attached,
            timestamp_ms,
            last_error,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Drive
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized left/right wheel command, each side in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
}

impl DriveCommand {
    pub const STOP: DriveCommand = DriveCommand { left: 0.0, right: 0.0 };

    /// Build a command, clamping both sides into `[-1, 1]`. NaN maps to 0.
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left: clamp_unit(left),
            right: clamp_unit(right),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }

    /// Mean of the two sides, i.e. the commanded forward component.
    pub fn linear(&self) -> f64 {
        0.5 * (self.left + self.right)
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
}

/// A drive command as published on [`Topic::Drive`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveSample {
    pub command: DriveCommand,
    pub timestamp_ms: u64,
}

/// Output scaling selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    #[default]
    Normal,
    Slow,
}

impl SpeedMode {
    pub fn factor(self) -> f64 {
        match self {
            SpeedMode::Normal => 1.0,
            SpeedMode::Slow => 0.4,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pose
// ─────────────────────────────────────────────────────────────────────────────

/// Dead-reckoned rover pose plus the distance travelled since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x_m: f64,
    pub y_m: f64,
    /// Heading in `(-π, π]`, counter-clockwise from +X.
    pub heading_rad: f64,
    pub distance_m: f64,
}

/// One recorded point of the travel path.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PathPoint {
    pub x_m: f64,
    pub y_m: f64,
}

impl PathPoint {
    pub fn distance_to(&self, other: &PathPoint) -> f64 {
        (self.x_m - other.x_m).hypot(self.y_m - other.y_m)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Safety
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only view of the three safety flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyState {
    pub emergency_stop_active: bool,
    pub obstacle_active: bool,
    pub link_lost: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type for hardware, bus and actuation failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoverError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("{component} timed out after {after_ms} ms")]
    Timeout { component: String, after_ms: u64 },

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Emergency stop active; non-zero drive command rejected")]
    EmergencyStopActive,

    #[error("Invalid drive command: {0}")]
    InvalidCommand(String),

    #[error("Topic {topic} does not carry {payload} payloads")]
    TopicMismatch { topic: Topic, payload: String },

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl RoverError {
    pub fn hardware(component: impl Into<String>, details: impl fmt::Display) -> Self {
        RoverError::HardwareFault {
            component: component.into(),
            details: details.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_accepts_only_its_variant() {
        let range = Payload::Range(RangeSnapshot {
            distance_mm: Some(120.0),
            attached: true,
            timestamp_ms: 1,
            last_error: None,
        });
        assert!(Topic::Sonar.accepts(&range));
        assert!(Topic::TofRight.accepts(&range));
        assert!(!Topic::Light.accepts(&range));
        assert!(!Topic::Drive.accepts(&Payload::Safety(SafetyState::default())));
    }

    #[test]
    fn drive_command_clamps_and_zeroes_nan() {
        let cmd = DriveCommand::new(1.7, f64::NAN);
        assert_eq!(cmd, DriveCommand { left: 1.0, right: 0.0 });
        assert!(DriveCommand::STOP.is_zero());
        assert!(!cmd.is_zero());
    }

    #[test]
    fn range_reading_keeps_last_good_value() {
        let mut sticky = None;
        assert!(RangeReading(412.0).absorb(&mut sticky));
        assert!(!RangeReading(f64::NAN).absorb(&mut sticky));
        assert!(!RangeReading(0.0).absorb(&mut sticky));
        assert_eq!(sticky, Some(412.0));
    }

    #[test]
    fn climate_reading_is_sticky_per_field() {
        let mut sticky = ClimateValue::default();
        ClimateReading { humidity_pct: 40.0, temperature_c: 21.5 }.absorb(&mut sticky);
        let partial = ClimateReading { humidity_pct: 42.0, temperature_c: f64::NAN };
        assert!(partial.absorb(&mut sticky));
        assert_eq!(sticky.humidity_pct, Some(42.0));
        assert_eq!(sticky.temperature_c, Some(21.5));
    }

    #[test]
    fn valid_distance_requires_attachment() {
        let mut snap = RangeSnapshot {
            distance_mm: Some(300.0),
            attached: true,
            timestamp_ms: 0,
            last_error: None,
        };
        assert_eq!(snap.valid_distance(), Some(300.0));
        snap.attached = false;
        assert_eq!(snap.valid_distance(), None);
    }

    #[test]
    fn payload_serializes_with_kind_tag() -> Result<(), Box<dyn std::error::Error>> {
        let payload = Payload::Drive(DriveSample {
            command: DriveCommand::new(0.5, -0.5),
            timestamp_ms: 42,
        });
        let json = serde_json::to_string(&payload)?;
        assert!(json.contains("\"kind\":\"drive\""));
        let back: Payload = serde_json::from_str(&json)?;
        assert_eq!(back, payload);
        Ok(())
    }

    #[test]
    fn rover_error_display() {
        let err = RoverError::hardware("sonar", "open timed out");
        assert!(err.to_string().contains("sonar"));
        let err = RoverError::TopicMismatch {
            topic: Topic::Light,
            payload: "range".into(),
        };
        assert_eq!(err.to_string(), "Topic light does not carry range payloads");
    }
}
