//! `rover-perception` – where the rover thinks it is.
//!
//! # Modules
//!
//! - [`odometry`] – [`OdometryEngine`][odometry::OdometryEngine]: dead
//!   reckoning from commanded wheel speeds into a [`Pose`][rover_types::Pose]
//!   and a capacity-bounded travel path, plus the shared
//!   [`OdometryHandle`][odometry::OdometryHandle].

pub mod odometry;

pub use odometry::{OdometryConfig, OdometryEngine, OdometryHandle};
