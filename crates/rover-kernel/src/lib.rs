//! `rover-kernel` – Safety & Supervision
//!
//! Decides what the control loop is allowed to do. Nothing here drives the
//! motors; it gates, throttles and watches.
//!
//! # Modules
//!
//! - [`safety`] – [`SafetyCoordinator`][safety::SafetyCoordinator]: owns the
//!   obstacle, link-loss and emergency-stop flags and authorizes drive
//!   commands. Consumers read the flags through a
//!   [`SafetyMonitor`][safety::SafetyMonitor].
//! - [`state_verifier`] – [`StateVerifier`][state_verifier::StateVerifier]:
//!   ordered rule engine applied to every drive command.
//! - [`hysteresis`] – [`Hysteresis`][hysteresis::Hysteresis]: two-threshold
//!   latch shared by the safety and mission obstacle detectors.
//! - [`reconnect`] – [`ReconnectPolicy`][reconnect::ReconnectPolicy] and
//!   per-consumer [`Backoff`][reconnect::Backoff] for every reconnecting
//!   component.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: flags sensor streams
//!   that stopped delivering fresh snapshots.

pub mod hysteresis;
pub mod reconnect;
pub mod safety;
pub mod state_verifier;
pub mod watchdog;

pub use hysteresis::{Hysteresis, Transition};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use safety::{SafetyConfig, SafetyCoordinator, SafetyMonitor};
pub use state_verifier::{
    CommandRangeRule, EmergencyStopInterlock, ObstacleForwardInterlock, Rule, StateVerifier,
};
pub use watchdog::{ComponentHealth, Watchdog};
