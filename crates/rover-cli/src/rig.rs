//! Simulated rig used when no hardware transport is linked in.
//!
//! Every device is a [`rover_hal::sim`] driver named after its hub port so the
//! logs read like the real rig. The ranging sensors sweep slowly so the
//! obstacle hysteresis has something to do.

use rover_hal::sim::{SimGamepad, SimSensorChannel, SimVehicle};
use rover_runtime::RoverHardware;
use rover_types::{ClimateReading, LightReading, RangeReading};
use tracing::info;

use crate::config::RigConfig;

/// Distance sweep between `min` and `max` mm over `period` reads.
fn sweep(min: f64, max: f64, period: u64, phase: u64) -> impl FnMut(u64) -> f64 + Send + 'static {
    move |i| {
        let t = ((i + phase) % period) as f64 / period as f64;
        let tri = if t < 0.5 { t * 2.0 } else { 2.0 - t * 2.0 };
        min + (max - min) * tri
    }
}

pub fn build(rig: &RigConfig) -> RoverHardware {
    let hubs = rig.hubs;
    info!(
        motors = hubs.motors,
        sonar = hubs.sonar,
        tof_left = hubs.tof_left,
        tof_right = hubs.tof_right,
        humidity = hubs.humidity,
        temperature = hubs.temperature,
        light = hubs.light,
        "simulated hub layout"
    );

    let mut sonar_d = sweep(180.0, 1600.0, 160, 0);
    let mut left_d = sweep(120.0, 900.0, 500, 125);
    let mut right_d = sweep(120.0, 900.0, 500, 375);

    RoverHardware {
        vehicle: SimVehicle::new().link(),
        gamepad: SimGamepad::new().device(),
        sonar: Box::new(SimSensorChannel::from_fn(
            format!("sonar@hub{}", hubs.sonar),
            move |i| Ok(RangeReading(sonar_d(i))),
        )),
        tof_left: Box::new(SimSensorChannel::from_fn(
            format!("tof-left@hub{}", hubs.tof_left),
            move |i| Ok(RangeReading(left_d(i))),
        )),
        tof_right: Box::new(SimSensorChannel::from_fn(
            format!("tof-right@hub{}", hubs.tof_right),
            move |i| Ok(RangeReading(right_d(i))),
        )),
        climate: Box::new(SimSensorChannel::from_fn(
            format!("climate@hub{}", hubs.humidity),
            |i| {
                Ok(ClimateReading {
                    humidity_pct: 42.0 + (i % 20) as f64 * 0.1,
                    temperature_c: 21.5 - (i % 30) as f64 * 0.05,
                })
            },
        )),
        light: Box::new(SimSensorChannel::from_fn(
            format!("light@hub{}", hubs.light),
            |i| Ok(LightReading(320.0 + (i % 50) as f64)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_stays_in_range_and_turns_around() {
        let mut d = sweep(100.0, 200.0, 10, 0);
        let values: Vec<f64> = (0..10).map(&mut d).collect();
        assert!(values.iter().all(|v| (100.0..=200.0).contains(v)));
        assert_eq!(values[0], 100.0);
        assert_eq!(values[5], 200.0);
        assert!(values[9] < values[5]);
    }
}
