//! [`SafetyCoordinator`] – owner of the rover's safety flags.
//!
//! | Flag | Raised by | Cleared by |
//! |---|---|---|
//! | obstacle | nearest fresh ranging distance `<= on` | distance `> on + off_delta`, or no fresh valid reading |
//! | link lost | failed connectivity check | successful check |
//! | emergency stop | press edge toggles it | next press edge, [`SafetyCoordinator::reset_emergency_stop`] |
//!
//! The coordinator itself is owned (and mutated) by the teleop loop only.
//! Everyone else gets a cloneable, read-only [`SafetyMonitor`].
//!
//! None of the flags drives the motors. They are consulted through
//! [`SafetyCoordinator::authorize`] before a command is applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rover_middleware::{EventBus, SubscriptionId};
use rover_types::{DriveCommand, Payload, RangeSnapshot, RoverError, SafetyState, Topic};
use tracing::{info, warn};

use crate::hysteresis::{Hysteresis, Transition};
use crate::state_verifier::{ObstacleForwardInterlock, StateVerifier};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyConfig {
    /// Distance at or below which an obstacle is reported (mm).
    pub obstacle_on_mm: f64,
    /// Extra margin the distance must clear before the report is released (mm).
    pub obstacle_off_delta_mm: f64,
    /// Readings older than this are ignored.
    pub staleness: Duration,
    /// Ranging topics that feed the obstacle check.
    pub ranging_topics: Vec<Topic>,
    /// Also refuse forward motion while an obstacle is reported.
    pub block_forward_on_obstacle: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            obstacle_on_mm: 250.0,
            obstacle_off_delta_mm: 60.0,
            staleness: Duration::from_millis(1200),
            ranging_topics: vec![Topic::Sonar],
            block_forward_on_obstacle: false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Read-only view
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Flags {
    emergency_stop: AtomicBool,
    obstacle: AtomicBool,
    link_lost: AtomicBool,
    reset_requested: AtomicBool,
}

/// Cloneable read-only view of the safety flags.
#[derive(Debug, Clone, Default)]
pub struct SafetyMonitor {
    flags: Arc<Flags>,
}

impl SafetyMonitor {
    pub fn snapshot(&self) -> SafetyState {
        SafetyState {
            emergency_stop_active: self.flags.emergency_stop.load(Ordering::Acquire),
            obstacle_active: self.flags.obstacle.load(Ordering::Acquire),
            link_lost: self.flags.link_lost.load(Ordering::Acquire),
        }
    }

    /// Ask the owner to clear the e-stop latch on its next cycle.
    pub fn request_emergency_reset(&self) {
        self.flags.reset_requested.store(true, Ordering::Release);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct RangeSample {
    /// `None` when the reading was unusable.
    distance_mm: Option<f64>,
    timestamp_ms: u64,
}

type RangeSamples = Arc<Mutex<HashMap<Topic, RangeSample>>>;

pub struct SafetyCoordinator {
    config: SafetyConfig,
    flags: Arc<Flags>,
    samples: RangeSamples,
    obstacle: Hysteresis,
    verifier: StateVerifier,
}

impl SafetyCoordinator {
    pub fn new(config: SafetyConfig) -> Self {
        let mut verifier = StateVerifier::standard();
        if config.block_forward_on_obstacle {
            verifier.add_rule(Box::new(ObstacleForwardInterlock));
        }
        Self {
            obstacle: Hysteresis::with_delta(config.obstacle_on_mm, config.obstacle_off_delta_mm),
            config,
            flags: Arc::default(),
            samples: Arc::default(),
            verifier,
        }
    }

    pub fn monitor(&self) -> SafetyMonitor {
        SafetyMonitor {
            flags: self.flags.clone(),
        }
    }

    pub fn state(&self) -> SafetyState {
        self.monitor().snapshot()
    }

    /// Feed ranging snapshots from every configured topic into the obstacle
    /// check.
    pub fn attach(&self, bus: &EventBus) -> Vec<(Topic, SubscriptionId)> {
        self.config
            .ranging_topics
            .iter()
            .map(|&topic| {
                let samples = self.samples.clone();
                let id = bus.subscribe(topic, move |payload| {
                    if let Payload::Range(snapshot) = payload {
                        store_sample(&samples, topic, snapshot);
                    }
                    Ok(())
                });
                (topic, id)
            })
            .collect()
    }

    /// Record a ranging snapshot directly, bypassing the bus.
    pub fn record_range(&self, topic: Topic, snapshot: &RangeSnapshot) {
        store_sample(&self.samples, topic, snapshot);
    }

    /// Re-run the obstacle hysteresis against the nearest fresh reading.
    /// Returns the new flag value.
    pub fn evaluate_obstacle(&mut self, now_ms: u64) -> bool {
        let window = u64::try_from(self.config.staleness.as_millis()).unwrap_or(u64::MAX);
        let nearest = self
            .samples
            .lock()
            .values()
            .filter(|s| now_ms.saturating_sub(s.timestamp_ms) <= window)
            .filter_map(|s| s.distance_mm)
            .min_by(f64::total_cmp);

        let transition = match nearest {
            Some(d) => self.obstacle.update(d),
            None => self.obstacle.force_off(),
        };
        match transition {
            Transition::Activated => warn!(distance_mm = ?nearest, "obstacle too close"),
            Transition::Deactivated => info!(distance_mm = ?nearest, "obstacle cleared"),
            Transition::Unchanged => {}
        }

        let active = self.obstacle.is_active();
        self.flags.obstacle.store(active, Ordering::Release);
        active
    }

    /// Record the outcome of a connectivity check.
    pub fn record_link(&mut self, connected: bool) {
        let was_lost = self.flags.link_lost.swap(!connected, Ordering::AcqRel);
        match (was_lost, connected) {
            (false, false) => warn!("vehicle link lost"),
            (true, true) => info!("vehicle link restored"),
            _ => {}
        }
    }

    /// Flip the e-stop latch in response to one press edge. Returns the new
    /// state.
    pub fn toggle_emergency_stop(&mut self) -> bool {
        let active = !self.flags.emergency_stop.load(Ordering::Acquire);
        self.flags.emergency_stop.store(active, Ordering::Release);
        if active {
            warn!("EMERGENCY STOP engaged");
        } else {
            info!("emergency stop released");
        }
        active
    }

    pub fn reset_emergency_stop(&mut self) {
        if self.flags.emergency_stop.swap(false, Ordering::AcqRel) {
            info!("emergency stop reset");
        }
    }

    /// Apply a pending [`SafetyMonitor::request_emergency_reset`]. Returns
    /// whether one was pending.
    pub fn apply_reset_request(&mut self) -> bool {
        let requested = self.flags.reset_requested.swap(false, Ordering::AcqRel);
        if requested {
            self.reset_emergency_stop();
        }
        requested
    }

    /// Check `command` against the interlocks for the current flags.
    pub fn authorize(&self, command: &DriveCommand) -> Result<(), RoverError> {
        self.verifier.verify(command, &self.state())
    }
}

fn store_sample(samples: &RangeSamples, topic: Topic, snapshot: &RangeSnapshot) {
    samples.lock().insert(
        topic,
        RangeSample {
            distance_mm: snapshot.valid_distance(),
            timestamp_ms: snapshot.timestamp_ms,
        },
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
