//! Immutable mission summaries.

use chrono::{DateTime, Utc};
use rover_types::{PathPoint, Pose, Topic};
use serde::{Deserialize, Serialize};

use crate::stats::SensorStats;

/// One near-obstacle transition recorded during a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleEvent {
    pub topic: Topic,
    pub distance_mm: f64,
    pub timestamp_ms: u64,
    pub at: DateTime<Utc>,
}

impl ObstacleEvent {
    /// Which sensor tripped the obstacle flag, and at what distance.
    pub fn detail(&self) -> String {
        format!("{} reported {:.0} mm", self.topic, self.distance_mm)
    }
}

/// Per-stream statistics frozen at finalize time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionStats {
    pub sonar_mm: SensorStats,
    pub tof_left_mm: SensorStats,
    pub tof_right_mm: SensorStats,
    pub humidity_pct: SensorStats,
    pub temperature_c: SensorStats,
    pub illuminance_lux: SensorStats,
    /// Magnitude of the commanded forward component.
    pub commanded_speed: SensorStats,
}

/// Closest ranging reading of the mission and when it was seen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosestApproach {
    pub distance_mm: f64,
    pub timestamp_ms: u64,
}

/// Result of [`MissionAggregator::finalize`](crate::MissionAggregator::finalize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSnapshot {
    pub mission_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stats: MissionStats,
    pub closest_approach: Option<ClosestApproach>,
    pub near_threshold_mm: f64,
    pub far_threshold_mm: f64,
    /// Every near transition, including those past the event list cap.
    pub obstacle_event_count: u64,
    pub events: Vec<ObstacleEvent>,
    pub total_distance_m: f64,
    pub start_pose: Pose,
    pub end_pose: Pose,
    pub path: Vec<PathPoint>,
}

impl MissionSnapshot {
    /// Human-readable summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Mission {}", self.mission_id),
            format!(
                "  {} -> {} ({:.1} s)",
                self.started_at.format("%Y-%m-%d %H:%M:%S"),
                self.ended_at.format("%H:%M:%S"),
                self.duration_ms as f64 / 1000.0
            ),
            format!(
                "  distance {:.2} m, end pose ({:.2}, {:.2}) heading {:.1} deg",
                self.total_distance_m,
                self.end_pose.x_m,
                self.end_pose.y_m,
                self.end_pose.heading_rad.to_degrees()
            ),
        ];
        for (label, s) in [
            ("sonar mm", &self.stats.sonar_mm),
            ("tof-left mm", &self.stats.tof_left_mm),
            ("tof-right mm", &self.stats.tof_right_mm),
            ("humidity %", &self.stats.humidity_pct),
            ("temperature C", &self.stats.temperature_c),
            ("light lux", &self.stats.illuminance_lux),
            ("speed", &self.stats.commanded_speed),
        ] {
            lines.push(format!("  {label:<14} {}", describe(s)));
        }
        match self.closest_approach {
            Some(c) => lines.push(format!("  closest approach {:.0} mm", c.distance_mm)),
            None => lines.push("  closest approach n/a".into()),
        }
        lines.push(format!(
            "  obstacle events {} (near {:.0} mm / far {:.0} mm)",
            self.obstacle_event_count, self.near_threshold_mm, self.far_threshold_mm
        ));
        for event in &self.events {
            lines.push(format!("    {} {}", event.at.format("%H:%M:%S"), event.detail()));
        }
        lines
    }
}

fn describe(s: &SensorStats) -> String {
    match (s.average, s.min, s.max) {
        (Some(avg), Some(min), Some(max)) => {
            format!("n={} avg {avg:.2} min {min:.2} max {max:.2}", s.samples)
        }
        _ => "n=0".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot_with_events(events: Vec<ObstacleEvent>) -> MissionSnapshot {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap_or_default();
        MissionSnapshot {
            mission_id: "mission-test".into(),
            started_at: at,
            ended_at: at,
            duration_ms: 0,
            stats: MissionStats::default(),
            closest_approach: None,
            near_threshold_mm: 300.0,
            far_threshold_mm: 400.0,
            obstacle_event_count: events.len() as u64,
            events,
            total_distance_m: 0.0,
            start_pose: Pose::default(),
            end_pose: Pose::default(),
            path: Vec::new(),
        }
    }

    #[test]
    fn summary_lists_each_obstacle_event() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap_or_default();
        let event = ObstacleEvent {
            topic: Topic::Sonar,
            distance_mm: 212.4,
            timestamp_ms: 1_700_000_000_000,
            at,
        };
        let lines = snapshot_with_events(vec![event.clone()]).summary_lines();
        assert!(lines.iter().any(|l| l.contains("obstacle events 1")));
        let last = lines.last().cloned().unwrap_or_default();
        assert!(last.ends_with(&event.detail()));
        assert!(event.detail().contains("212 mm"));
    }

    #[test]
    fn summary_without_events_ends_at_the_event_count() {
        let lines = snapshot_with_events(Vec::new()).summary_lines();
        assert!(lines.last().is_some_and(|l| l.contains("obstacle events 0")));
    }
}
