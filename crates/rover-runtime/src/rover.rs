//! [`Rover`] – composition root.
//!
//! Builds the bus, the safety coordinator, odometry and mission aggregator,
//! spawns one [`SensorService`] per sensor, the [`InputPoller`] and the
//! [`TeleopLoop`], then waits (bounded) for the first control tick.
//!
//! Shutdown order, each step isolated from the others:
//!
//! 1. stop the control loop, which zeroes the motors and closes the vehicle
//!    link on its way out;
//! 2. stop the input poller;
//! 3. stop every sensor service;
//! 4. drop every bus subscription.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, sync_channel};
use std::time::Duration;

use parking_lot::Mutex;
use rover_hal::{DriveBase, DriveConfig, InputDevice, SensorChannel, VehicleLink};
use rover_kernel::{SafetyConfig, SafetyCoordinator, SafetyMonitor, Watchdog};
use rover_middleware::EventBus;
use rover_mission::{MissionAggregator, MissionConfig, MissionSnapshot, ReportError, ReportSink};
use rover_perception::{OdometryConfig, OdometryEngine, OdometryHandle};
use rover_types::{
    ClimateReading, LightReading, Payload, RangeReading, RoverError, SharedClock, Topic,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::input::{InputConfig, InputPoller};
use crate::sensor_service::{SensorService, SensorServiceConfig, ServiceState};
use crate::teleop::{TeleopConfig, TeleopContext, TeleopHandle, TeleopLoop};
use crate::ui::{DashboardLink, DashboardRequest, UiSnapshot};

pub type RangeChannel = Box<dyn SensorChannel<Reading = RangeReading>>;
pub type ClimateChannel = Box<dyn SensorChannel<Reading = ClimateReading>>;
pub type LightChannel = Box<dyn SensorChannel<Reading = LightReading>>;

/// Device endpoints handed to [`Rover::start`].
pub struct RoverHardware {
    pub vehicle: Box<dyn VehicleLink>,
    pub gamepad: Box<dyn InputDevice>,
    pub sonar: RangeChannel,
    pub tof_left: RangeChannel,
    pub tof_right: RangeChannel,
    pub climate: ClimateChannel,
    pub light: LightChannel,
}

#[derive(Debug, Clone)]
pub struct RoverConfig {
    pub teleop: TeleopConfig,
    pub input: InputConfig,
    pub safety: SafetyConfig,
    pub mission: MissionConfig,
    pub drive: DriveConfig,
    pub odometry: OdometryConfig,
    pub sensors: Vec<SensorServiceConfig>,
    /// A sensor with no attached snapshot for this long is listed as stale.
    pub watchdog_timeout: Duration,
    /// Bound on the wait for the first control tick.
    pub startup_timeout: Duration,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            teleop: TeleopConfig::default(),
            input: InputConfig::default(),
            safety: SafetyConfig::default(),
            mission: MissionConfig::default(),
            drive: DriveConfig::default(),
            odometry: OdometryConfig::default(),
            sensors: Topic::SENSORS.map(SensorServiceConfig::for_topic).to_vec(),
            watchdog_timeout: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(2),
        }
    }
}

impl RoverConfig {
    /// Service settings for `topic`, falling back to the standard ones.
    pub fn sensor(&self, topic: Topic) -> SensorServiceConfig {
        self.sensors
            .iter()
            .find(|c| c.topic == topic)
            .cloned()
            .unwrap_or_else(|| SensorServiceConfig::for_topic(topic))
    }
}

/// A finalized mission and the outcome of persisting it.
#[derive(Debug)]
pub struct FinalizedMission {
    pub snapshot: MissionSnapshot,
    pub report: Result<PathBuf, ReportError>,
}

pub struct Rover {
    bus: EventBus,
    safety: SafetyMonitor,
    mission: Arc<MissionAggregator>,
    reports: Box<dyn ReportSink>,
    sensors: Vec<SensorService>,
    input: InputPoller,
    teleop: TeleopHandle,
    ui: watch::Receiver<UiSnapshot>,
    request_tx: mpsc::Sender<DashboardRequest>,
    request_rx: Mutex<mpsc::Receiver<DashboardRequest>>,
    shut_down: AtomicBool,
}

impl Rover {
    pub fn start(
        config: RoverConfig,
        hardware: RoverHardware,
        clock: SharedClock,
        reports: Box<dyn ReportSink>,
    ) -> Result<Self, RoverError> {
        let bus = EventBus::new();
        let odometry = OdometryHandle::new(OdometryEngine::new(config.odometry.clone()));

        let safety = SafetyCoordinator::new(config.safety.clone());
        safety.attach(&bus);
        let monitor = safety.monitor();

        let mission = Arc::new(MissionAggregator::new(
            config.mission.clone(),
            clock.clone(),
            odometry.clone(),
        ));
        mission.attach(&bus);

        let watchdog = Arc::new(Mutex::new(Watchdog::new(clock.clone())));
        attach_watchdog(&watchdog, &bus, config.watchdog_timeout);

        let sensors = vec![
            SensorService::spawn(hardware.sonar, config.sensor(Topic::Sonar), bus.clone(), clock.clone())?,
            SensorService::spawn(hardware.tof_left, config.sensor(Topic::TofLeft), bus.clone(), clock.clone())?,
            SensorService::spawn(hardware.tof_right, config.sensor(Topic::TofRight), bus.clone(), clock.clone())?,
            SensorService::spawn(hardware.climate, config.sensor(Topic::Climate), bus.clone(), clock.clone())?,
            SensorService::spawn(hardware.light, config.sensor(Topic::Light), bus.clone(), clock.clone())?,
        ];
        let input = InputPoller::spawn(hardware.gamepad, config.input.clone(), clock.clone(), monitor.clone())?;

        let (ui_tx, ui) = watch::channel(UiSnapshot::default());
        let (request_tx, request_rx) = mpsc::channel(1);
        let ctx = TeleopContext {
            clock,
            bus: bus.clone(),
            input: input.handle(),
            odometry,
            watchdog,
            sensors: sensors.iter().map(|s| (s.topic(), s.cell().clone())).collect(),
            ui: ui_tx,
        };
        let drive = DriveBase::new(hardware.vehicle, config.drive.clone());
        let (ready_tx, ready_rx) = sync_channel(1);
        let teleop = TeleopLoop::new(config.teleop.clone(), drive, safety, ctx).spawn(ready_tx)?;

        match ready_rx.recv_timeout(config.startup_timeout) {
            Ok(()) => info!(mission_id = %mission.mission_id(), "rover started"),
            Err(RecvTimeoutError::Timeout) => warn!(
                timeout_ms = config.startup_timeout.as_millis() as u64,
                "control loop has not completed a tick yet"
            ),
            Err(RecvTimeoutError::Disconnected) => error!("control loop exited before its first tick"),
        }

        Ok(Self {
            bus,
            safety: monitor,
            mission,
            reports,
            sensors,
            input,
            teleop,
            ui,
            request_tx,
            request_rx: Mutex::new(request_rx),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn safety(&self) -> SafetyMonitor {
        self.safety.clone()
    }

    /// Clear the e-stop latch on the next control tick.
    pub fn request_emergency_reset(&self) {
        self.safety.request_emergency_reset();
    }

    pub fn mission(&self) -> &Arc<MissionAggregator> {
        &self.mission
    }

    pub fn dashboard(&self) -> DashboardLink {
        DashboardLink::new(self.ui.clone(), self.request_tx.clone())
    }

    pub fn latest_ui(&self) -> UiSnapshot {
        self.ui.borrow().clone()
    }

    pub fn sensor_states(&self) -> Vec<(Topic, ServiceState)> {
        self.sensors.iter().map(|s| (s.topic(), s.state())).collect()
    }

    /// Finalize the current mission and persist its report.
    pub fn finalize_mission(&self) -> FinalizedMission {
        let snapshot = self.mission.finalize();
        let report = self.reports.write(&snapshot);
        if let Err(e) = &report {
            error!(mission_id = %snapshot.mission_id, error = %e, "mission report not written");
        }
        FinalizedMission { snapshot, report }
    }

    /// Handle every queued dashboard request.
    pub fn service_requests(&self) -> Vec<FinalizedMission> {
        let mut rx = self.request_rx.lock();
        let mut done = Vec::new();
        while let Ok(request) = rx.try_recv() {
            match request {
                DashboardRequest::FinalizeMission => done.push(self.finalize_mission()),
            }
        }
        done
    }

    /// Stop everything. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("rover shutting down");
        isolated("control loop", || self.teleop.stop());
        isolated("input poller", || self.input.stop());
        for service in &self.sensors {
            isolated(service.topic().as_str(), || service.stop());
        }
        isolated("bus", || {
            let removed = self.bus.unsubscribe_all();
            info!(removed, "bus subscriptions dropped");
        });
        self.request_rx.lock().close();
    }
}

impl Drop for Rover {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn isolated<F: FnOnce()>(step: &str, f: F) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(step, "shutdown step panicked");
    }
}

/// Register every sensor stream and heartbeat it on each attached snapshot.
fn attach_watchdog(watchdog: &Arc<Mutex<Watchdog>>, bus: &EventBus, timeout: Duration) {
    let mut wd = watchdog.lock();
    for topic in Topic::SENSORS {
        wd.register(topic.as_str(), timeout);
        let watchdog = watchdog.clone();
        bus.subscribe(topic, move |payload| {
            if let Some(ts) = attached_timestamp(payload) {
                watchdog.lock().heartbeat_at(topic.as_str(), ts);
            }
            Ok(())
        });
    }
}

fn attached_timestamp(payload: &Payload) -> Option<u64> {
    let attached = match payload {
        Payload::Range(s) => s.attached,
        Payload::Climate(s) => s.attached,
        Payload::Light(s) => s.attached,
        _ => false,
    };
    payload.timestamp_ms().filter(|_| attached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hal::sim::{SimChannelCounters, SimGamepad, SimSensorChannel, SimVehicle};
    use rover_mission::JsonReportSink;
    use rover_types::SystemClock;
    use std::time::Instant;

    struct SimRig {
        vehicle: SimVehicle,
        pad: SimGamepad,
        counters: Vec<Arc<SimChannelCounters>>,
        hardware: RoverHardware,
    }

    fn sim_rig() -> SimRig {
        let vehicle = SimVehicle::new();
        let pad = SimGamepad::new();
        let sonar = SimSensorChannel::constant("sonar", RangeReading(900.0));
        let tof_left = SimSensorChannel::constant("tof.left", RangeReading(1200.0));
        let tof_right = SimSensorChannel::constant("tof.right", RangeReading(1100.0));
        let climate = SimSensorChannel::constant(
            "climate",
            ClimateReading {
                humidity_pct: 45.0,
                temperature_c: 19.0,
            },
        );
        let light = SimSensorChannel::constant("light", LightReading(300.0));
        let counters = vec![
            sonar.counters(),
            tof_left.counters(),
            tof_right.counters(),
            climate.counters(),
            light.counters(),
        ];
        let hardware = RoverHardware {
            vehicle: vehicle.link(),
            gamepad: pad.device(),
            sonar: Box::new(sonar),
            tof_left: Box::new(tof_left),
            tof_right: Box::new(tof_right),
            climate: Box::new(climate),
            light: Box::new(light),
        };
        SimRig {
            vehicle,
            pad,
            counters,
            hardware,
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn starts_and_shuts_down_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let rig = sim_rig();
        let rover = Rover::start(
            RoverConfig::default(),
            rig.hardware,
            Arc::new(SystemClock),
            Box::new(JsonReportSink::new(dir.path())),
        )?;

        assert!(wait_for(|| rover.latest_ui().rover_connected));
        assert!(wait_for(|| rover.latest_ui().sensors.light.is_some()));
        assert!(rig.vehicle.is_connected());

        rover.shutdown();
        rover.shutdown();
        assert_eq!(rig.vehicle.disconnects(), 1);
        assert!(!rig.vehicle.is_connected());
        for counters in &rig.counters {
            assert_eq!(counters.closes(), counters.opens());
        }
        assert_eq!(rover.bus().subscriber_count(Topic::Sonar), 0);
        assert!(rover.sensor_states().iter().all(|(_, s)| *s == ServiceState::Stopped));
        assert!(!rover.dashboard().request_finalize());
        Ok(())
    }

    #[test]
    fn dashboard_finalize_writes_report() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let rig = sim_rig();
        let rover = Rover::start(
            RoverConfig::default(),
            rig.hardware,
            Arc::new(SystemClock),
            Box::new(JsonReportSink::new(dir.path())),
        )?;
        rig.pad.update(|s| s.right_trigger = 0.3);
        assert!(wait_for(|| rover.mission().live_sample_count() > 0));

        let link = rover.dashboard();
        assert!(link.request_finalize());
        assert!(!link.request_finalize());

        let done = rover.service_requests();
        assert_eq!(done.len(), 1);
        let path = done[0].report.as_ref().map_err(|e| e.to_string())?;
        assert!(path.exists());
        assert!(rover.service_requests().is_empty());
        Ok(())
    }

    #[test]
    fn unreachable_vehicle_is_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let rig = sim_rig();
        rig.vehicle.set_reachable(false);
        let rover = Rover::start(
            RoverConfig::default(),
            rig.hardware,
            Arc::new(SystemClock),
            Box::new(JsonReportSink::new(dir.path())),
        )?;
        assert!(wait_for(|| rover.safety().snapshot().link_lost));
        assert!(!rover.latest_ui().rover_connected);
        Ok(())
    }

    #[test]
    fn watchdog_only_counts_attached_sensor_snapshots() {
        let range = |attached| {
            Payload::Range(rover_types::RangeSnapshot {
                distance_mm: Some(500.0),
                attached,
                timestamp_ms: 42,
                last_error: None,
            })
        };
        assert_eq!(attached_timestamp(&range(true)), Some(42));
        assert_eq!(attached_timestamp(&range(false)), None);
        let drive = Payload::Drive(rover_types::DriveSample {
            command: rover_types::DriveCommand::new(0.0, 0.0),
            timestamp_ms: 42,
        });
        assert_eq!(attached_timestamp(&drive), None);
    }
}
