//! [`MissionAggregator`] – live mission statistics.
//!
//! Subscribes to every sensor topic and to [`Topic::Drive`], keeps one
//! [`RunningStat`] per measured quantity and records near-obstacle events.
//! All of it sits behind a single lock so that a minimum distance is never
//! separated from its timestamp and a finalize never sees half a sample.
//!
//! A sample is counted only when it is attached, carries no error, holds a
//! finite value and is no older than [`MissionConfig::staleness`] at
//! receipt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use rover_kernel::{Hysteresis, Transition};
use rover_middleware::{EventBus, SubscriptionId};
use rover_perception::OdometryHandle;
use rover_types::{
    ClimateSnapshot, DriveSample, LightSnapshot, Payload, Pose, RangeSnapshot, SharedClock,
    Topic, to_datetime,
};
use tracing::{debug, info};

use crate::snapshot::{ClosestApproach, MissionSnapshot, MissionStats, ObstacleEvent};
use crate::stats::RunningStat;

#[derive(Debug, Clone, PartialEq)]
pub struct MissionConfig {
    /// Distance at or below which a near event is recorded (mm).
    pub near_mm: f64,
    /// Distance the reading must exceed before the next event can fire (mm).
    pub far_mm: f64,
    /// Cap on the stored event list.
    pub max_events: usize,
    pub staleness: Duration,
    /// Ranging topics that feed obstacle events and the closest approach.
    pub obstacle_topics: Vec<Topic>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            near_mm: 350.0,
            far_mm: 400.0,
            max_events: 40,
            staleness: Duration::from_millis(1500),
            obstacle_topics: vec![Topic::Sonar],
        }
    }
}

/// Everything reset at a mission boundary.
#[derive(Default)]
struct LiveCounters {
    sonar: RunningStat,
    tof_left: RunningStat,
    tof_right: RunningStat,
    humidity: RunningStat,
    temperature: RunningStat,
    light: RunningStat,
    speed: RunningStat,
    closest: Option<ClosestApproach>,
    near: HashMap<Topic, Hysteresis>,
    event_count: u64,
    events: Vec<ObstacleEvent>,
}

impl LiveCounters {
    fn range_stat(&mut self, topic: Topic) -> Option<&mut RunningStat> {
        match topic {
            Topic::Sonar => Some(&mut self.sonar),
            Topic::TofLeft => Some(&mut self.tof_left),
            Topic::TofRight => Some(&mut self.tof_right),
            _ => None,
        }
    }

    fn sample_count(&self) -> u64 {
        [
            &self.sonar,
            &self.tof_left,
            &self.tof_right,
            &self.humidity,
            &self.temperature,
            &self.light,
            &self.speed,
        ]
        .iter()
        .map(|s| s.count())
        .sum::<u64>()
            + self.event_count
    }

    fn stats(&self) -> MissionStats {
        MissionStats {
            sonar_mm: self.sonar.summary(),
            tof_left_mm: self.tof_left.summary(),
            tof_right_mm: self.tof_right.summary(),
            humidity_pct: self.humidity.summary(),
            temperature_c: self.temperature.summary(),
            illuminance_lux: self.light.summary(),
            commanded_speed: self.speed.summary(),
        }
    }
}

struct MissionState {
    mission_id: String,
    started_ms: u64,
    start_pose: Pose,
    last_end_ms: Option<u64>,
    live: LiveCounters,
}

/// Mission-wide statistics over bus traffic, plus the shared odometry.
pub struct MissionAggregator {
    config: MissionConfig,
    clock: SharedClock,
    odometry: OdometryHandle,
    state: Mutex<MissionState>,
}

impl MissionAggregator {
    /// Start the first mission now. The odometry is reset to the origin.
    pub fn new(config: MissionConfig, clock: SharedClock, odometry: OdometryHandle) -> Self {
        let now = clock.now_ms();
        odometry.reset();
        let state = MissionState {
            mission_id: mission_id(now),
            started_ms: now,
            start_pose: odometry.pose(),
            last_end_ms: None,
            live: LiveCounters::default(),
        };
        info!(mission_id = %state.mission_id, "mission started");
        Self {
            config,
            clock,
            odometry,
            state: Mutex::new(state),
        }
    }

    pub fn mission_id(&self) -> String {
        self.state.lock().mission_id.clone()
    }

    /// Subscribe to every sensor topic and to [`Topic::Drive`].
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<(Topic, SubscriptionId)> {
        Topic::SENSORS
            .into_iter()
            .chain([Topic::Drive])
            .map(|topic| {
                let aggregator = Arc::clone(self);
                let id = bus.subscribe(topic, move |payload| {
                    aggregator.record(topic, payload);
                    Ok(())
                });
                (topic, id)
            })
            .collect()
    }

    /// Fold one bus payload into the live counters. Returns whether anything
    /// was counted.
    pub fn record(&self, topic: Topic, payload: &Payload) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let live = &mut state.live;
        match payload {
            Payload::Range(s) => self.record_range(live, topic, s, now),
            Payload::Climate(s) => self.record_climate(live, s, now),
            Payload::Light(s) => self.record_light(live, s, now),
            Payload::Drive(s) => self.record_drive(live, s, now),
            Payload::Safety(_) => false,
        }
    }

    /// Samples plus obstacle events counted since the mission started.
    pub fn live_sample_count(&self) -> u64 {
        self.state.lock().live.sample_count()
    }

    pub fn obstacle_event_count(&self) -> u64 {
        self.state.lock().live.event_count
    }

    /// Close the current mission and start the next one.
    ///
    /// End timestamps are strictly increasing across calls, even when the
    /// clock has not moved.
    pub fn finalize(&self) -> MissionSnapshot {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();

        let mut ended_ms = now.max(state.started_ms);
        if let Some(prev) = state.last_end_ms {
            if ended_ms <= prev {
                ended_ms = prev + 1;
            }
        }

        let (end_pose, path) = self.odometry.take();
        let live = std::mem::take(&mut state.live);
        let snapshot = MissionSnapshot {
            mission_id: state.mission_id.clone(),
            started_at: to_datetime(state.started_ms),
            ended_at: to_datetime(ended_ms),
            duration_ms: ended_ms - state.started_ms,
            stats: live.stats(),
            closest_approach: live.closest,
            near_threshold_mm: self.config.near_mm,
            far_threshold_mm: self.config.far_mm,
            obstacle_event_count: live.event_count,
            events: live.events,
            total_distance_m: end_pose.distance_m,
            start_pose: state.start_pose,
            end_pose,
            path,
        };

        state.mission_id = mission_id(ended_ms);
        state.started_ms = ended_ms;
        state.start_pose = Pose::default();
        state.last_end_ms = Some(ended_ms);

        info!(
            mission_id = %snapshot.mission_id,
            duration_ms = snapshot.duration_ms,
            distance_m = snapshot.total_distance_m,
            events = snapshot.obstacle_event_count,
            next = %state.mission_id,
            "mission finalized"
        );
        snapshot
    }

    // ── per-payload folding ────────────────────────────────────────────────

    fn is_fresh(&self, timestamp_ms: u64, now_ms: u64) -> bool {
        let window = u64::try_from(self.config.staleness.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(timestamp_ms) <= window
    }

    fn usable(&self, attached: bool, last_error: &Option<String>, ts: u64, now: u64) -> bool {
        attached && last_error.is_none() && self.is_fresh(ts, now)
    }

    fn record_range(&self, live: &mut LiveCounters, topic: Topic, s: &RangeSnapshot, now: u64) -> bool {
        let watched = self.config.obstacle_topics.contains(&topic);
        let distance = s
            .distance_mm
            .filter(|d| d.is_finite() && *d > 0.0)
            .filter(|_| self.usable(s.attached, &s.last_error, s.timestamp_ms, now));

        let Some(distance) = distance else {
            if watched {
                if let Some(h) = live.near.get_mut(&topic) {
                    h.force_off();
                }
            }
            return false;
        };
        let Some(stat) = live.range_stat(topic) else {
            return false;
        };
        stat.add(distance);
        if !watched {
            return true;
        }

        if live.closest.is_none_or(|c| distance < c.distance_mm) {
            live.closest = Some(ClosestApproach {
                distance_mm: distance,
                timestamp_ms: s.timestamp_ms,
            });
        }

        let near = live
            .near
            .entry(topic)
            .or_insert_with(|| Hysteresis::new(self.config.near_mm, self.config.far_mm));
        if near.update(distance) == Transition::Activated {
            live.event_count += 1;
            if live.events.len() < self.config.max_events {
                live.events.push(ObstacleEvent {
                    topic,
                    distance_mm: distance,
                    timestamp_ms: s.timestamp_ms,
                    at: to_datetime(s.timestamp_ms),
                });
            }
            debug!(topic = ?topic, distance_mm = distance, count = live.event_count, "obstacle near");
        }
        true
    }

    fn record_climate(&self, live: &mut LiveCounters, s: &ClimateSnapshot, now: u64) -> bool {
        if !self.usable(s.attached, &s.last_error, s.timestamp_ms, now) {
            return false;
        }
        let humidity = s.humidity_pct.is_some_and(|v| live.humidity.add(v));
        let temperature = s.temperature_c.is_some_and(|v| live.temperature.add(v));
        humidity || temperature
    }

    fn record_light(&self, live: &mut LiveCounters, s: &LightSnapshot, now: u64) -> bool {
        if !self.usable(s.attached, &s.last_error, s.timestamp_ms, now) {
            return false;
        }
        s.illuminance_lux
            .filter(|v| *v >= 0.0)
            .is_some_and(|v| live.light.add(v))
    }

    fn record_drive(&self, live: &mut LiveCounters, s: &DriveSample, now: u64) -> bool {
        self.is_fresh(s.timestamp_ms, now) && live.speed.add(s.command.linear().abs())
    }
}

/// `MISSION-yyyyMMdd-HHmmss` in local time.
pub fn mission_id(timestamp_ms: u64) -> String {
    to_datetime(timestamp_ms)
        .with_timezone(&Local)
        .format("MISSION-%Y%m%d-%H%M%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::{DriveCommand, ManualClock};

    const T0: u64 = 1_700_000_000_000;

    fn setup() -> (Arc<ManualClock>, OdometryHandle, MissionAggregator) {
        let clock = Arc::new(ManualClock::new(T0));
        let odometry = OdometryHandle::default();
        let aggregator = MissionAggregator::new(MissionConfig::default(), clock.clone(), odometry.clone());
        (clock, odometry, aggregator)
    }

    fn range(mm: f64, ts: u64) -> Payload {
        Payload::Range(RangeSnapshot {
            distance_mm: Some(mm),
            attached: true,
            timestamp_ms: ts,
            last_error: None,
        })
    }

    #[test]
    fn finalize_twice_without_updates() {
        let (_, _, agg) = setup();
        let first = agg.finalize();
        assert_eq!(agg.live_sample_count(), 0);
        let second = agg.finalize();
        assert_eq!(agg.live_sample_count(), 0);

        assert_eq!(first.stats, second.stats);
        assert_eq!(first.events, second.events);
        assert!(second.ended_at > first.ended_at);
    }

    #[test]
    fn finalize_resets_counters_and_odometry() {
        let (clock, odometry, agg) = setup();
        assert!(agg.record(Topic::Sonar, &range(800.0, T0)));
        odometry.update(1.0, 1.0, T0);
        odometry.update(1.0, 1.0, T0 + 500);
        clock.advance(2_000);

        let snap = agg.finalize();
        assert_eq!(snap.stats.sonar_mm.samples, 1);
        assert_eq!(snap.duration_ms, 2_000);
        assert!(snap.total_distance_m > 0.29);
        assert!(snap.path.len() >= 2);

        assert_eq!(agg.live_sample_count(), 0);
        assert_eq!(odometry.pose(), Pose::default());

        clock.advance(1_000);
        let next = agg.finalize();
        assert_eq!(next.start_pose, Pose::default());
        assert_eq!(next.total_distance_m, 0.0);
    }

    #[test]
    fn stale_and_faulty_samples_are_dropped() {
        let (_, _, agg) = setup();
        assert!(!agg.record(Topic::Sonar, &range(500.0, T0 - 1_501)));
        assert!(agg.record(Topic::Sonar, &range(500.0, T0 - 1_500)));

        let detached = Payload::Range(RangeSnapshot {
            distance_mm: Some(500.0),
            attached: false,
            timestamp_ms: T0,
            last_error: None,
        });
        assert!(!agg.record(Topic::Sonar, &detached));

        let erred = Payload::Light(LightSnapshot {
            illuminance_lux: Some(120.0),
            attached: true,
            timestamp_ms: T0,
            last_error: Some("read failed".into()),
        });
        assert!(!agg.record(Topic::Light, &erred));
        assert!(!agg.record(Topic::Sonar, &range(f64::NAN, T0)));
        assert_eq!(agg.live_sample_count(), 1);
    }

    #[test]
    fn near_far_events_are_capped() {
        let (_, _, agg) = setup();
        for i in 0..45 {
            agg.record(Topic::Sonar, &range(300.0, T0 + i));
            agg.record(Topic::Sonar, &range(450.0, T0 + i));
        }
        let snap = agg.finalize();
        assert_eq!(snap.obstacle_event_count, 45);
        assert_eq!(snap.events.len(), 40);
        assert_eq!(snap.closest_approach.map(|c| c.distance_mm), Some(300.0));
    }

    #[test]
    fn band_between_near_and_far_does_not_retrigger() {
        let (_, _, agg) = setup();
        for mm in [340.0, 380.0, 345.0, 399.0, 350.0] {
            agg.record(Topic::Sonar, &range(mm, T0));
        }
        assert_eq!(agg.obstacle_event_count(), 1);
        // Detach releases the latch.
        agg.record(
            Topic::Sonar,
            &Payload::Range(RangeSnapshot {
                distance_mm: Some(340.0),
                attached: false,
                timestamp_ms: T0,
                last_error: None,
            }),
        );
        agg.record(Topic::Sonar, &range(340.0, T0));
        assert_eq!(agg.obstacle_event_count(), 2);
    }

    #[test]
    fn tof_feeds_stats_but_not_events() {
        let (_, _, agg) = setup();
        assert!(agg.record(Topic::TofLeft, &range(100.0, T0)));
        let snap = agg.finalize();
        assert_eq!(snap.stats.tof_left_mm.samples, 1);
        assert_eq!(snap.obstacle_event_count, 0);
        assert!(snap.closest_approach.is_none());
    }

    #[test]
    fn climate_fields_count_independently() {
        let (_, _, agg) = setup();
        let half = Payload::Climate(ClimateSnapshot {
            humidity_pct: Some(41.0),
            temperature_c: None,
            attached: true,
            timestamp_ms: T0,
            last_error: None,
        });
        assert!(agg.record(Topic::Climate, &half));
        let snap = agg.finalize();
        assert_eq!(snap.stats.humidity_pct.samples, 1);
        assert_eq!(snap.stats.temperature_c.samples, 0);
    }

    #[test]
    fn attach_collects_bus_traffic() -> Result<(), Box<dyn std::error::Error>> {
        let (_, _, agg) = setup();
        let agg = Arc::new(agg);
        let bus = EventBus::new();
        let subs = agg.attach(&bus);
        assert_eq!(subs.len(), 6);

        bus.publish(Topic::Sonar, &range(900.0, T0))?;
        bus.publish(
            Topic::Drive,
            &Payload::Drive(DriveSample {
                command: DriveCommand::new(-0.5, -0.5),
                timestamp_ms: T0,
            }),
        )?;
        let snap = agg.finalize();
        assert_eq!(snap.stats.sonar_mm.samples, 1);
        assert_eq!(snap.stats.commanded_speed.average, Some(0.5));
        Ok(())
    }

    #[test]
    fn mission_id_format() {
        let id = mission_id(T0);
        assert!(id.starts_with("MISSION-"));
        assert_eq!(id.len(), "MISSION-20231114-221320".len());
        assert_eq!(id.as_bytes()[16], b'-');
    }
}
