//! `rover-hal` – Hardware Abstraction Layer
//!
//! The seams between the teleoperation core and the physical devices. The
//! transport that actually talks to motor controllers, sensor hubs and the
//! gamepad lives behind these traits.
//!
//! # Modules
//!
//! - [`sensor`] – [`SensorChannel`]: `open(timeout)` / `close` / `read` /
//!   `is_attached`, uniform across sensor classes.
//! - [`vehicle`] – [`VehicleLink`]: connection and wheel-speed control of the
//!   rover base.
//! - [`drive`] – [`DriveBase`]: wraps a [`VehicleLink`] with speed mode,
//!   output clamping and per-side motor inversion.
//! - [`input`] – [`InputDevice`]: polled gamepad with capability negotiation
//!   for battery reporting and haptics.
//! - [`sim`] – in-process simulated drivers for tests and the demo rig.

pub mod drive;
pub mod input;
pub mod sensor;
pub mod sim;
pub mod vehicle;

pub use drive::{DriveBase, DriveConfig};
pub use input::{
    BatteryKind, BatteryLevel, BatteryStatus, Buttons, InputCapabilities, InputDevice, RawPadState,
};
pub use sensor::SensorChannel;
pub use vehicle::VehicleLink;
