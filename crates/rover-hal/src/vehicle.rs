//! [`VehicleLink`] – network link to the rover's motor controller.

use std::time::Duration;

use rover_types::RoverError;

/// Connection to the rover base. Every call is fallible; a failing
/// [`is_connected`][VehicleLink::is_connected] is treated as a lost link.
pub trait VehicleLink: Send {
    /// Connect, failing within `timeout` if the rover is unreachable.
    /// Connecting an already connected link is a no-op.
    fn connect(&mut self, timeout: Duration) -> Result<(), RoverError>;

    fn disconnect(&mut self) -> Result<(), RoverError>;

    fn is_connected(&self) -> Result<bool, RoverError>;

    /// Set raw motor duty cycles, each in `[-1, 1]`.
    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), RoverError>;

    fn stop(&mut self) -> Result<(), RoverError>;
}

impl<L: VehicleLink + ?Sized> VehicleLink for Box<L> {
    fn connect(&mut self, timeout: Duration) -> Result<(), RoverError> {
        (**self).connect(timeout)
    }

    fn disconnect(&mut self) -> Result<(), RoverError> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> Result<bool, RoverError> {
        (**self).is_connected()
    }

    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), RoverError> {
        (**self).set_wheel_speeds(left, right)
    }

    fn stop(&mut self) -> Result<(), RoverError> {
        (**self).stop()
    }
}
