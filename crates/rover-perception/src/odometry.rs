//! Dead-reckoning odometry from commanded wheel speeds.
//!
//! There are no wheel encoders on the rover, so the pose is integrated from
//! the normalized left/right commands actually sent to the motors:
//!
//! ```text
//! v  = 0.5 · (left + right) · MAX_SPEED
//! ω  = (right − left) · TURN_GAIN
//! x' = x + v · cos(θ) · dt
//! y' = y + v · sin(θ) · dt
//! θ' = normalize(θ + ω · dt)        into (−π, π]
//! ```
//!
//! The displacement uses the heading *before* the update. `dt` is clamped to
//! [`OdometryConfig::max_dt`] so that a scheduling stall does not fling the
//! pose across the map.
//!
//! # Example
//!
//! ```rust
//! use rover_perception::odometry::OdometryEngine;
//!
//! let mut odo = OdometryEngine::default();
//! odo.integrate(1.0, 1.0, 0.5);
//!
//! let pose = odo.pose();
//! assert!((pose.x_m - 0.3).abs() < 1e-9);
//! assert_eq!(odo.path().len(), 2);
//! ```

use std::collections::VecDeque;
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use parking_lot::Mutex;
use rover_types::{PathPoint, Pose};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct OdometryConfig {
    /// Ground speed at full forward command (m/s).
    pub max_speed_mps: f64,
    /// Yaw rate per unit of differential command (rad/s).
    pub turn_gain: f64,
    /// Commands with a smaller magnitude are treated as zero.
    pub deadzone: f64,
    /// Upper bound on a single integration step (s).
    pub max_dt: f64,
    /// Minimum spacing between recorded path points (m).
    pub min_step_m: f64,
    /// Path ring capacity.
    pub max_points: usize,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: 0.6,
            turn_gain: 1.6,
            deadzone: 0.02,
            max_dt: 0.5,
            min_step_m: 0.02,
            max_points: 2000,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OdometryEngine
// ────────────────────────────────────────────────────────────────────────────

/// Integrates drive commands into a [`Pose`] and a bounded travel path.
#[derive(Debug, Clone)]
pub struct OdometryEngine {
    config: OdometryConfig,
    pose: Pose,
    path: VecDeque<PathPoint>,
    last_update_ms: Option<u64>,
}

impl Default for OdometryEngine {
    fn default() -> Self {
        Self::new(OdometryConfig::default())
    }
}

impl OdometryEngine {
    pub fn new(config: OdometryConfig) -> Self {
        let mut engine = Self {
            path: VecDeque::with_capacity(config.max_points.min(4096)),
            config,
            pose: Pose::default(),
            last_update_ms: None,
        };
        engine.reset();
        engine
    }

    /// Zero the pose and distance and restart the path at the origin.
    pub fn reset(&mut self) {
        self.pose = Pose::default();
        self.path.clear();
        self.path.push_back(PathPoint::default());
        self.last_update_ms = None;
    }

    /// Integrate `(left, right)` using the time elapsed since the previous
    /// call. The first call after construction or [`reset`][Self::reset]
    /// only records the timestamp.
    pub fn update(&mut self, left: f64, right: f64, now_ms: u64) {
        let Some(previous) = self.last_update_ms.replace(now_ms) else {
            return;
        };
        let Some(elapsed) = now_ms.checked_sub(previous) else {
            return;
        };
        self.integrate(left, right, elapsed as f64 / 1000.0);
    }

    /// Advance the pose by one step of `dt` seconds.
    pub fn integrate(&mut self, left: f64, right: f64, dt: f64) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        let dt = dt.min(self.config.max_dt);
        let left = self.apply_deadzone(left);
        let right = self.apply_deadzone(right);

        let v = 0.5 * (left + right) * self.config.max_speed_mps;
        let omega = (right - left) * self.config.turn_gain;

        let dx = v * self.pose.heading_rad.cos() * dt;
        let dy = v * self.pose.heading_rad.sin() * dt;

        self.pose.heading_rad = normalize_angle(self.pose.heading_rad + omega * dt);
        self.pose.x_m += dx;
        self.pose.y_m += dy;
        self.pose.distance_m += dx.hypot(dy);

        self.record_point();
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Copy of the recorded path, oldest point first.
    pub fn path(&self) -> Vec<PathPoint> {
        self.path.iter().copied().collect()
    }

    fn apply_deadzone(&self, cmd: f64) -> f64 {
        if !cmd.is_finite() || cmd.abs() < self.config.deadzone {
            0.0
        } else {
            cmd
        }
    }

    fn record_point(&mut self) {
        let here = PathPoint {
            x_m: self.pose.x_m,
            y_m: self.pose.y_m,
        };
        match self.path.back_mut() {
            Some(last) if last.distance_to(&here) < self.config.min_step_m => *last = here,
            _ => {
                self.path.push_back(here);
                while self.path.len() > self.config.max_points.max(1) {
                    self.path.pop_front();
                }
            }
        }
    }
}

/// Wrap `angle` into `(−π, π]`.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

// ────────────────────────────────────────────────────────────────────────────
// Shared handle
// ────────────────────────────────────────────────────────────────────────────

/// Odometry shared between the control loop (writer) and the mission
/// aggregator (reader, resets at mission boundaries).
#[derive(Debug, Clone, Default)]
pub struct OdometryHandle {
    inner: Arc<Mutex<OdometryEngine>>,
}

impl OdometryHandle {
    pub fn new(engine: OdometryEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn update(&self, left: f64, right: f64, now_ms: u64) {
        self.inner.lock().update(left, right, now_ms);
    }

    pub fn pose(&self) -> Pose {
        self.inner.lock().pose()
    }

    /// Pose and path captured, then reset to the origin, under one lock.
    ///
    /// An update landing between a separate `snapshot` and `reset` would
    /// otherwise be lost from both missions.
    pub fn take(&self) -> (Pose, Vec<PathPoint>) {
        let mut engine = self.inner.lock();
        let taken = (engine.pose(), engine.path());
        engine.reset();
        taken
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
