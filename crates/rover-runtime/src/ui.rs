//! Dashboard feed: periodic [`UiSnapshot`]s out, [`DashboardRequest`]s in.
//!
//! Snapshots travel over a `tokio::sync::watch` channel, so a slow reader only
//! ever sees the latest one. Requests go through a capacity-1 `mpsc` queue;
//! a second finalize request while one is pending is dropped.

use rover_hal::BatteryStatus;
use rover_types::{
    ClimateSnapshot, DriveCommand, LightSnapshot, Payload, Pose, RangeSnapshot, SafetyState,
    SpeedMode, Topic,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Latest snapshot of every sensor, `None` until its service first publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorPanel {
    pub sonar: Option<RangeSnapshot>,
    pub tof_left: Option<RangeSnapshot>,
    pub tof_right: Option<RangeSnapshot>,
    pub climate: Option<ClimateSnapshot>,
    pub light: Option<LightSnapshot>,
}

impl SensorPanel {
    /// Slot `payload` into the field for its sensor. Non-sensor payloads are
    /// ignored.
    pub fn insert(&mut self, topic: Topic, payload: Payload) {
        match (topic, payload) {
            (Topic::Sonar, Payload::Range(s)) => self.sonar = Some(s),
            (Topic::TofLeft, Payload::Range(s)) => self.tof_left = Some(s),
            (Topic::TofRight, Payload::Range(s)) => self.tof_right = Some(s),
            (Topic::Climate, Payload::Climate(s)) => self.climate = Some(s),
            (Topic::Light, Payload::Light(s)) => self.light = Some(s),
            _ => {}
        }
    }
}

/// Everything the operator dashboard renders, captured in one control tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiSnapshot {
    pub timestamp_ms: u64,
    pub rover_connected: bool,
    pub speed_mode: SpeedMode,
    pub safety: SafetyState,
    pub last_command: DriveCommand,
    pub gamepad_connected: bool,
    pub battery: BatteryStatus,
    pub sensors: SensorPanel,
    pub pose: Pose,
    pub stale_sensors: Vec<String>,
    pub bus_faults: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardRequest {
    FinalizeMission,
}

/// The dashboard's end of the feed.
#[derive(Debug, Clone)]
pub struct DashboardLink {
    snapshots: watch::Receiver<UiSnapshot>,
    requests: mpsc::Sender<DashboardRequest>,
}

impl DashboardLink {
    pub(crate) fn new(
        snapshots: watch::Receiver<UiSnapshot>,
        requests: mpsc::Sender<DashboardRequest>,
    ) -> Self {
        Self { snapshots, requests }
    }

    pub fn latest(&self) -> UiSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver for callers that want to await changes.
    pub fn subscribe(&self) -> watch::Receiver<UiSnapshot> {
        self.snapshots.clone()
    }

    /// Queue a mission finalize. Returns `false` if one is already pending
    /// or the rover has shut down.
    pub fn request_finalize(&self) -> bool {
        self.requests.try_send(DashboardRequest::FinalizeMission).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_finalize_request_pending() {
        let (_tx, rx) = watch::channel(UiSnapshot::default());
        let (req_tx, mut req_rx) = mpsc::channel(1);
        let link = DashboardLink::new(rx, req_tx);

        assert!(link.request_finalize());
        assert!(!link.request_finalize());
        assert_eq!(req_rx.try_recv().ok(), Some(DashboardRequest::FinalizeMission));
        assert!(link.request_finalize());
    }

    #[test]
    fn latest_snapshot_wins() {
        let (tx, rx) = watch::channel(UiSnapshot::default());
        let (req_tx, _req_rx) = mpsc::channel(1);
        let link = DashboardLink::new(rx, req_tx);

        for ts in [1, 2, 3] {
            tx.send_replace(UiSnapshot {
                timestamp_ms: ts,
                ..UiSnapshot::default()
            });
        }
        assert_eq!(link.latest().timestamp_ms, 3);
    }

    #[test]
    fn panel_routes_by_topic() {
        let range = RangeSnapshot {
            distance_mm: Some(210.0),
            attached: true,
            timestamp_ms: 7,
            last_error: None,
        };
        let mut panel = SensorPanel::default();
        panel.insert(Topic::TofRight, Payload::Range(range.clone()));
        assert_eq!(panel.tof_right, Some(range.clone()));
        assert!(panel.sonar.is_none());

        // Wrong pairing is ignored.
        panel.insert(Topic::Light, Payload::Range(range));
        assert!(panel.light.is_none());
    }

    #[test]
    fn snapshot_serializes_for_dashboards() -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_value(UiSnapshot::default())?;
        assert_eq!(json["speed_mode"], "normal");
        assert_eq!(json["safety"]["emergency_stop_active"], false);
        Ok(())
    }
}
