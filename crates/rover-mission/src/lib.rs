//! `rover-mission` – what happened during a drive.
//!
//! # Modules
//!
//! - [`stats`] – [`RunningStat`][stats::RunningStat]: count/average/min/max
//!   over finite samples.
//! - [`aggregator`] – [`MissionAggregator`][aggregator::MissionAggregator]:
//!   bus subscriber that keeps the live statistics and obstacle events and
//!   produces a [`MissionSnapshot`][snapshot::MissionSnapshot] on finalize.
//! - [`snapshot`] – the immutable mission summary types.
//! - [`report`] – [`ReportSink`][report::ReportSink] and the JSON file sink.

pub mod aggregator;
pub mod report;
pub mod snapshot;
pub mod stats;

pub use aggregator::{MissionAggregator, MissionConfig, mission_id};
pub use report::{JsonReportSink, ReportError, ReportSink};
pub use snapshot::{ClosestApproach, MissionSnapshot, MissionStats, ObstacleEvent};
pub use stats::{RunningStat, SensorStats};
