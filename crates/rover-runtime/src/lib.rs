//! `rover-runtime` – the running rover.
//!
//! Owns every thread of the process and wires the lower crates together.
//!
//! # Modules
//!
//! - [`rover`] – [`Rover`][rover::Rover]: composition root. Starts the
//!   sensor services, input poller and control loop, services dashboard
//!   requests and shuts everything down in a fixed order.
//! - [`teleop`] – [`TeleopLoop`][teleop::TeleopLoop]: the 50 ms control
//!   tick. Supervises the vehicle link, applies the safety gate, actuates
//!   the motors, feeds odometry and publishes the dashboard snapshot.
//! - [`sensor_service`] – [`SensorService`][sensor_service::SensorService]:
//!   one polling thread per sensor with sticky readings and backoff on
//!   open failures.
//! - [`input`] – [`InputPoller`][input::InputPoller]: gamepad sampling,
//!   emergency-stop edge detection, battery polling and haptic alerts.
//! - [`shaping`] – [`shape`][shaping::shape]: throttle and stick to wheel
//!   speeds.
//! - [`ui`] – [`UiSnapshot`][ui::UiSnapshot] and the
//!   [`DashboardLink`][ui::DashboardLink] handed to operator front ends.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Safety gating
//!
//! Every drive command passes through
//! [`SafetyCoordinator::authorize`][rover_kernel::SafetyCoordinator::authorize]
//! before it reaches the [`DriveBase`][rover_hal::DriveBase]. A rejected
//! command is replaced by a full stop, never forwarded.

pub mod input;
pub mod rover;
pub mod sensor_service;
pub mod shaping;
pub mod telemetry;
pub mod teleop;
pub mod ui;

pub use input::{GamepadState, HapticPulse, InputConfig, InputHandle, InputPoller};
pub use rover::{FinalizedMission, Rover, RoverConfig, RoverHardware};
pub use sensor_service::{SensorService, SensorServiceConfig, ServiceState, SnapshotCell};
pub use shaping::{ShapingConfig, shape};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use teleop::{TeleopConfig, TeleopContext, TeleopHandle, TeleopLoop};
pub use ui::{DashboardLink, DashboardRequest, SensorPanel, UiSnapshot};
