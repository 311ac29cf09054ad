//! Running statistics over one measurement stream.

use serde::{Deserialize, Serialize};

/// Count, sum, min and max of the finite samples seen since the last reset.
///
/// ```
/// use rover_mission::stats::RunningStat;
///
/// let mut stat = RunningStat::default();
/// for v in [10.0, 20.0, f64::NAN, 30.0] {
///     stat.add(v);
/// }
/// assert_eq!(stat.count(), 3);
/// assert_eq!(stat.average(), Some(20.0));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl RunningStat {
    /// Add `value`. Non-finite values are ignored and `false` is returned.
    pub fn add(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        true
    }

    /// Forget every sample.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Finite samples seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the samples, `None` before the first one.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Smallest sample, `None` before the first one.
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest sample, `None` before the first one.
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Freeze the current values for a report.
    pub fn summary(&self) -> SensorStats {
        SensorStats {
            samples: self.count,
            average: self.average(),
            min: self.min,
            max: self.max,
        }
    }
}

/// Frozen summary of a [`RunningStat`], as written into mission reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorStats {
    pub samples: u64,
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}
