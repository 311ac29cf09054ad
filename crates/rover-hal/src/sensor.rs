//! [`SensorChannel`] – one hardware sensor endpoint on a hub port.

use std::time::Duration;

use rover_types::{RoverError, StickyReading};

/// A hardware sensor channel.
///
/// Implementations are driven by exactly one sensor service thread, so
/// methods take `&mut self` and need not be `Sync`.
pub trait SensorChannel: Send {
    /// Raw value produced by one read.
    type Reading: StickyReading;

    /// Identifier used in logs and fault messages (e.g. `"sonar"`).
    fn id(&self) -> &str;

    /// Open the channel, failing with [`RoverError::Timeout`] if the device
    /// does not attach within `timeout`.
    fn open(&mut self, timeout: Duration) -> Result<(), RoverError>;

    /// Release the channel.
    fn close(&mut self) -> Result<(), RoverError>;

    /// Read the current value.
    fn read(&mut self) -> Result<Self::Reading, RoverError>;

    /// Whether the device is currently attached to its hub port.
    fn is_attached(&self) -> Result<bool, RoverError>;
}

impl<C: SensorChannel + ?Sized> SensorChannel for Box<C> {
    type Reading = C::Reading;

    fn id(&self) -> &str {
        (**self).id()
    }

    fn open(&mut self, timeout: Duration) -> Result<(), RoverError> {
        (**self).open(timeout)
    }

    fn close(&mut self) -> Result<(), RoverError> {
        (**self).close()
    }

    fn read(&mut self) -> Result<Self::Reading, RoverError> {
        (**self).read()
    }

    fn is_attached(&self) -> Result<bool, RoverError> {
        (**self).is_attached()
    }
}
