//! [`DriveBase`] – actuation wrapper around a [`VehicleLink`].
//!
//! Turns a normalized [`DriveCommand`] into raw motor duty cycles:
//!
//! 1. refuse to drive while the link is down ([`RoverError::NotConnected`]);
//! 2. scale by the active [`SpeedMode`] (slow mode = ×0.4);
//! 3. clamp to `±max_speed`;
//! 4. flip the sign of inverted motors;
//! 5. forward to [`VehicleLink::set_wheel_speeds`].
//!
//! The emergency-stop interlock is *not* enforced here; commands must be
//! authorized by the safety coordinator before they reach [`DriveBase::apply`].

use std::time::Duration;

use rover_types::{DriveCommand, RoverError, SpeedMode};
use tracing::{debug, info, warn};

use crate::vehicle::VehicleLink;

/// Changes smaller than this are not logged.
const LOG_DELTA: f64 = 0.01;

/// Static configuration of the drive base.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveConfig {
    /// Output cap applied after the speed mode factor.
    pub max_speed: f64,
    pub invert_left: bool,
    pub invert_right: bool,
    /// Hard timeout for [`VehicleLink::connect`].
    pub connect_timeout: Duration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_speed: 1.0,
            invert_left: false,
            invert_right: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns the vehicle link and tracks what was last sent to the motors.
pub struct DriveBase {
    link: Box<dyn VehicleLink>,
    config: DriveConfig,
    mode: SpeedMode,
    connected: bool,
    last_applied: DriveCommand,
}

impl DriveBase {
    pub fn new(link: Box<dyn VehicleLink>, config: DriveConfig) -> Self {
        Self {
            link,
            config,
            mode: SpeedMode::Normal,
            connected: false,
            last_applied: DriveCommand::STOP,
        }
    }

    /// Attempt a connection within the configured timeout.
    pub fn connect(&mut self) -> Result<(), RoverError> {
        self.link.connect(self.config.connect_timeout)?;
        self.connected = true;
        info!("vehicle link connected");
        Ok(())
    }

    /// Query the live link state. A failing query counts as disconnected.
    pub fn check_connection(&mut self) -> bool {
        let connected = match self.link.is_connected() {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "connectivity check failed");
                false
            }
        };
        if self.connected && !connected {
            warn!("vehicle link lost");
            self.last_applied = DriveCommand::STOP;
        }
        self.connected = connected;
        connected
    }

    /// Cached result of the last connect or connectivity check.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_speed_mode(&mut self, mode: SpeedMode) {
        if mode != self.mode {
            debug!(?mode, "speed mode changed");
            self.mode = mode;
        }
    }

    pub fn speed_mode(&self) -> SpeedMode {
        self.mode
    }

    /// Last command accepted by the motors, after speed scaling.
    pub fn last_applied(&self) -> DriveCommand {
        self.last_applied
    }

    /// Send `command` to the motors. Returns the scaled command that was
    /// applied (before motor inversion).
    pub fn apply(&mut self, command: DriveCommand) -> Result<DriveCommand, RoverError> {
        if !self.connected {
            return Err(RoverError::NotConnected("vehicle link".into()));
        }

        let cap = self.config.max_speed.abs();
        let factor = self.mode.factor();
        let scaled = DriveCommand {
            left: (command.left * factor).clamp(-cap, cap),
            right: (command.right * factor).clamp(-cap, cap),
        };

        let left = if self.config.invert_left { -scaled.left } else { scaled.left };
        let right = if self.config.invert_right { -scaled.right } else { scaled.right };
        self.link.set_wheel_speeds(left, right)?;

        if (scaled.left - self.last_applied.left).abs() > LOG_DELTA
            || (scaled.right - self.last_applied.right).abs() > LOG_DELTA
        {
            debug!(left = scaled.left, right = scaled.right, "wheel speeds");
        }
        self.last_applied = scaled;
        Ok(scaled)
    }

    /// Command both motors to zero.
    pub fn stop(&mut self) -> Result<(), RoverError> {
        self.last_applied = DriveCommand::STOP;
        self.link.stop()
    }

    /// Stop the motors (best effort) and close the link.
    pub fn disconnect(&mut self) -> Result<(), RoverError> {
        if let Err(e) = self.link.stop() {
            warn!(error = %e, "stop before disconnect failed");
        }
        self.last_applied = DriveCommand::STOP;
        self.connected = false;
        self.link.disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimVehicle;

    fn connected_base(config: DriveConfig) -> Result<(DriveBase, SimVehicle), RoverError> {
        let sim = SimVehicle::new();
        let mut base = DriveBase::new(sim.link(), config);
        base.connect()?;
        Ok((base, sim))
    }

    fn plain() -> DriveConfig {
        DriveConfig {
            invert_right: false,
            ..DriveConfig::default()
        }
    }

    #[test]
    fn apply_requires_connection() {
        let sim = SimVehicle::new();
        let mut base = DriveBase::new(sim.link(), plain());
        let err = base.apply(DriveCommand::new(0.5, 0.5));
        assert!(matches!(err, Err(RoverError::NotConnected(_))));
        assert_eq!(sim.last_speeds(), None);
    }

    #[test]
    fn slow_mode_scales_output() -> Result<(), Box<dyn std::error::Error>> {
        let (mut base, sim) = connected_base(plain())?;
        base.set_speed_mode(SpeedMode::Slow);
        let applied = base.apply(DriveCommand::new(1.0, -0.5))?;
        assert!((applied.left - 0.4).abs() < 1e-9);
        assert!((applied.right + 0.2).abs() < 1e-9);
        assert_eq!(sim.last_speeds(), Some((applied.left, applied.right)));
        Ok(())
    }

    #[test]
    fn max_speed_caps_output() -> Result<(), Box<dyn std::error::Error>> {
        let (mut base, _sim) = connected_base(DriveConfig {
            max_speed: 0.5,
            ..plain()
        })?;
        let applied = base.apply(DriveCommand::new(1.0, -1.0))?;
        assert_eq!(applied, DriveCommand { left: 0.5, right: -0.5 });
        Ok(())
    }

    #[test]
    fn inverted_motor_receives_negated_speed() -> Result<(), Box<dyn std::error::Error>> {
        let (mut base, sim) = connected_base(DriveConfig::default())?;
        let applied = base.apply(DriveCommand::new(0.3, 0.3))?;
        assert_eq!(applied, DriveCommand { left: 0.3, right: 0.3 });
        assert_eq!(sim.last_speeds(), Some((0.3, -0.3)));
        Ok(())
    }

    #[test]
    fn lost_link_is_detected_and_clears_last_command() -> Result<(), Box<dyn std::error::Error>> {
        let (mut base, sim) = connected_base(plain())?;
        base.apply(DriveCommand::new(0.6, 0.6))?;
        sim.drop_link();
        assert!(!base.check_connection());
        assert_eq!(base.last_applied(), DriveCommand::STOP);
        assert!(base.apply(DriveCommand::new(0.6, 0.6)).is_err());
        Ok(())
    }

    #[test]
    fn disconnect_stops_motors_first() -> Result<(), Box<dyn std::error::Error>> {
        let (mut base, sim) = connected_base(plain())?;
        base.apply(DriveCommand::new(0.2, 0.2))?;
        base.disconnect()?;
        assert_eq!(sim.stop_calls(), 1);
        assert_eq!(sim.disconnects(), 1);
        assert!(!base.is_connected());
        Ok(())
    }
}
