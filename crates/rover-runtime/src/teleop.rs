//! [`TeleopLoop`] – the 20 Hz control loop.
//!
//! Each [`tick`][TeleopLoop::tick]:
//!
//! 1. **Input** – read the latest [`GamepadState`][crate::input::GamepadState].
//!    A disconnected pad forces the zero command (steps 4–5 are skipped).
//! 2. **Link** – query the vehicle link; while it is down, attempt one
//!    reconnect per backoff window and raise the link-lost flag. A successful
//!    reconnect clears the e-stop latch.
//! 3. **Obstacle** – re-run the obstacle hysteresis against fresh ranging
//!    data.
//! 4. **E-stop** – consume a pending B press and toggle the latch.
//! 5. **Shape** – triggers and left stick into a wheel command.
//! 6. **Latch** – an active e-stop overrides the shaped command with zero.
//! 7. **Actuate** – authorize, apply, feed odometry and publish the applied
//!    command on [`Topic::Drive`].
//! 8. **UI** – every `ui_period`, publish a [`UiSnapshot`].
//!
//! The loop owns the [`DriveBase`] and the [`SafetyCoordinator`]; nothing else
//! mutates either.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rover_hal::DriveBase;
use rover_kernel::{Backoff, ReconnectPolicy, SafetyCoordinator, SafetyMonitor, Watchdog};
use rover_middleware::EventBus;
use rover_perception::OdometryHandle;
use rover_types::{DriveCommand, DriveSample, Payload, RoverError, SafetyState, SharedClock, Topic};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::input::{GamepadState, InputHandle};
use crate::sensor_service::SnapshotCell;
use crate::shaping::{ShapingConfig, shape};
use crate::ui::{SensorPanel, UiSnapshot};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TeleopConfig {
    pub period: Duration,
    pub ui_period: Duration,
    /// Vehicle reconnect throttle.
    pub reconnect: ReconnectPolicy,
    pub shaping: ShapingConfig,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(50),
            ui_period: Duration::from_millis(200),
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(2000)),
            shaping: ShapingConfig::default(),
        }
    }
}

/// Shared handles the loop reads from or publishes to.
pub struct TeleopContext {
    pub clock: SharedClock,
    pub bus: EventBus,
    pub input: InputHandle,
    pub odometry: OdometryHandle,
    pub watchdog: Arc<Mutex<Watchdog>>,
    /// Snapshot cells rendered into the UI sensor panel.
    pub sensors: Vec<(Topic, SnapshotCell)>,
    pub ui: watch::Sender<UiSnapshot>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TeleopLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct TeleopLoop {
    config: TeleopConfig,
    ctx: TeleopContext,
    drive: DriveBase,
    safety: SafetyCoordinator,
    reconnect: Backoff,
    next_ui_ms: u64,
    last_safety: Option<SafetyState>,
}

impl TeleopLoop {
    pub fn new(
        config: TeleopConfig,
        drive: DriveBase,
        safety: SafetyCoordinator,
        ctx: TeleopContext,
    ) -> Self {
        Self {
            reconnect: config.reconnect.backoff(),
            config,
            ctx,
            drive,
            safety,
            next_ui_ms: 0,
            last_safety: None,
        }
    }

    pub fn safety_monitor(&self) -> SafetyMonitor {
        self.safety.monitor()
    }

    /// Run one control cycle. Returns the command the motors accepted
    /// (zero when nothing was applied).
    pub fn tick(&mut self) -> DriveCommand {
        let now = self.ctx.clock.now_ms();

        // 1. Input
        let pad = self.ctx.input.latest();

        // 2. Link
        self.supervise_link(now);

        // 3. Obstacle
        self.safety.evaluate_obstacle(now);
        self.safety.apply_reset_request();

        let mut command = DriveCommand::STOP;
        if pad.connected {
            // 4. E-stop edge
            if self.ctx.input.take_estop_edge() {
                self.safety.toggle_emergency_stop();
            }
            // 5. Shape
            self.drive.set_speed_mode(pad.speed_mode);
            command = shape(&pad, &self.config.shaping);
        }

        // 6. Latch
        if self.safety.state().emergency_stop_active {
            command = DriveCommand::STOP;
        }

        // 7. Actuate
        let applied = self.actuate(command, now);
        self.publish_safety();

        // 8. UI
        if now >= self.next_ui_ms {
            self.publish_ui(now, &pad);
        }
        applied
    }

    fn supervise_link(&mut self, now: u64) {
        if self.drive.check_connection() {
            self.safety.record_link(true);
            return;
        }
        self.safety.record_link(false);

        if !self.reconnect.try_begin(now) {
            return;
        }
        match self.drive.connect() {
            Ok(()) => {
                self.reconnect.record_success();
                self.safety.record_link(true);
                self.safety.reset_emergency_stop();
            }
            Err(e) => {
                self.reconnect.record_failure(now);
                warn!(
                    error = %e,
                    retry_in_ms = self.reconnect.current_delay().as_millis() as u64,
                    "vehicle reconnect failed"
                );
            }
        }
    }

    fn actuate(&mut self, command: DriveCommand, now: u64) -> DriveCommand {
        let result = match self.safety.authorize(&command) {
            Ok(()) => self.drive.apply(command),
            Err(e) => {
                debug!(error = %e, "drive command rejected");
                self.drive.apply(DriveCommand::STOP)
            }
        };
        let applied = result.unwrap_or_else(|e| {
            debug!(error = %e, "drive command not applied");
            DriveCommand::STOP
        });

        self.ctx.odometry.update(applied.left, applied.right, now);
        let sample = Payload::Drive(DriveSample {
            command: applied,
            timestamp_ms: now,
        });
        if let Err(e) = self.ctx.bus.publish(Topic::Drive, &sample) {
            error!(error = %e, "drive sample rejected by bus");
        }
        applied
    }

    fn publish_safety(&mut self) {
        let state = self.safety.state();
        if self.last_safety == Some(state) {
            return;
        }
        self.last_safety = Some(state);
        if let Err(e) = self.ctx.bus.publish(Topic::Safety, &Payload::Safety(state)) {
            error!(error = %e, "safety state rejected by bus");
        }
    }

    fn publish_ui(&mut self, now: u64, pad: &GamepadState) {
        let mut sensors = SensorPanel::default();
        for (topic, cell) in &self.ctx.sensors {
            if let Some(payload) = cell.get() {
                sensors.insert(*topic, payload);
            }
        }
        let snapshot = UiSnapshot {
            timestamp_ms: now,
            rover_connected: self.drive.is_connected(),
            speed_mode: self.drive.speed_mode(),
            safety: self.safety.state(),
            last_command: self.drive.last_applied(),
            gamepad_connected: pad.connected,
            battery: pad.battery,
            sensors,
            pose: self.ctx.odometry.pose(),
            stale_sensors: self.ctx.watchdog.lock().check_all(),
            bus_faults: self.ctx.bus.fault_count(),
        };
        self.ctx.ui.send_replace(snapshot);
        let period = u64::try_from(self.config.ui_period.as_millis()).unwrap_or(u64::MAX);
        self.next_ui_ms = now.saturating_add(period);
    }

    /// Zero the motors, then close the vehicle link. Each step runs even if
    /// the previous one failed.
    pub fn shutdown(&mut self) {
        let drive = &mut self.drive;
        guarded("zero command", || drive.stop());
        guarded("vehicle disconnect", || drive.disconnect());
        info!("teleop stopped");
    }

    /// Run the loop on its own thread. `ready` is signalled after the first
    /// completed tick.
    pub fn spawn(mut self, ready: SyncSender<()>) -> Result<TeleopHandle, RoverError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let period = self.config.period;

        let thread = thread::Builder::new()
            .name("teleop".into())
            .spawn(move || {
                let mut ready = Some(ready);
                while !stop_flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    if panic::catch_unwind(AssertUnwindSafe(|| self.tick())).is_err() {
                        error!("teleop tick panicked");
                    }
                    if let Some(tx) = ready.take() {
                        // The starter may already have timed out.
                        let _ = tx.try_send(());
                    }
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        thread::park_timeout(rest);
                    }
                }
                self.shutdown();
            })
            .map_err(|e| RoverError::hardware("teleop", e))?;

        Ok(TeleopHandle {
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn guarded<F>(step: &str, f: F)
where
    F: FnOnce() -> Result<(), RoverError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(step, error = %e, "shutdown step failed"),
        Err(_) => error!(step, "shutdown step panicked"),
    }
}

/// Running control loop. Dropping it stops the loop.
pub struct TeleopHandle {
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TeleopHandle {
    /// Stop the loop and wait for its shutdown sequence. Safe to call more
    /// than once.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        thread.thread().unpark();
        if thread.join().is_err() {
            error!("teleop thread panicked");
        }
    }
}

impl Drop for TeleopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputConfig, InputWorker};
    use rover_hal::sim::{SimGamepad, SimVehicle};
    use rover_hal::DriveConfig;
    use rover_kernel::SafetyConfig;
    use rover_types::{ManualClock, RangeSnapshot};

    struct Rig {
        clock: Arc<ManualClock>,
        vehicle: SimVehicle,
        pad: SimGamepad,
        input: InputWorker,
        teleop: TeleopLoop,
        bus: EventBus,
        odometry: OdometryHandle,
        ui: watch::Receiver<UiSnapshot>,
    }

    impl Rig {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(10_000));
            let vehicle = SimVehicle::new();
            let pad = SimGamepad::new();
            let bus = EventBus::new();
            let safety = SafetyCoordinator::new(SafetyConfig::default());
            safety.attach(&bus);
            let input = InputWorker::new(pad.device(), InputConfig::default(), clock.clone(), safety.monitor());
            let odometry = OdometryHandle::default();
            let (ui_tx, ui) = watch::channel(UiSnapshot::default());
            let ctx = TeleopContext {
                clock: clock.clone(),
                bus: bus.clone(),
                input: input.handle(),
                odometry: odometry.clone(),
                watchdog: Arc::new(Mutex::new(Watchdog::new(clock.clone()))),
                sensors: Vec::new(),
                ui: ui_tx,
            };
            let drive = DriveBase::new(vehicle.link(), DriveConfig::default());
            let teleop = TeleopLoop::new(TeleopConfig::default(), drive, safety, ctx);
            Self { clock, vehicle, pad, input, teleop, bus, odometry, ui }
        }

        fn step(&mut self) -> DriveCommand {
            self.input.cycle();
            let applied = self.teleop.tick();
            self.clock.advance(50);
            applied
        }
    }

    #[test]
    fn connects_and_drives_with_inverted_right_motor() {
        let mut rig = Rig::new();
        rig.pad.update(|s| s.right_trigger = 0.5);
        let applied = rig.step();
        assert_eq!(applied, DriveCommand::new(0.5, 0.5));
        assert!(rig.vehicle.is_connected());
        assert_eq!(rig.vehicle.last_speeds(), Some((0.5, -0.5)));
    }

    #[test]
    fn held_button_flips_estop_once() {
        let mut rig = Rig::new();
        rig.step();
        rig.pad.update(|s| {
            s.right_trigger = 0.6;
            s.buttons.b = true;
        });
        rig.step();
        rig.step();
        assert!(rig.teleop.safety.state().emergency_stop_active);
        assert_eq!(rig.step(), DriveCommand::STOP);

        rig.pad.update(|s| s.buttons.b = false);
        rig.step();
        assert!(rig.teleop.safety.state().emergency_stop_active);

        rig.pad.update(|s| s.buttons.b = true);
        rig.step();
        assert!(!rig.teleop.safety.state().emergency_stop_active);
        assert_eq!(rig.step(), DriveCommand::new(0.6, 0.6));
    }

    #[test]
    fn one_reconnect_attempt_per_window() {
        let mut rig = Rig::new();
        rig.vehicle.set_reachable(false);
        for _ in 0..40 {
            rig.step();
        }
        assert_eq!(rig.vehicle.connect_attempts(), 1);
        assert!(rig.teleop.safety.state().link_lost);

        rig.vehicle.set_reachable(true);
        rig.step();
        assert_eq!(rig.vehicle.connect_attempts(), 2);
        assert!(!rig.teleop.safety.state().link_lost);
    }

    #[test]
    fn reconnect_clears_estop() {
        let mut rig = Rig::new();
        rig.step();
        rig.pad.update(|s| s.buttons.b = true);
        rig.step();
        assert!(rig.teleop.safety.state().emergency_stop_active);

        rig.vehicle.drop_link();
        rig.step();
        assert!(rig.vehicle.is_connected());
        assert!(!rig.teleop.safety.state().emergency_stop_active);
    }

    #[test]
    fn disconnected_pad_forces_stop() {
        let mut rig = Rig::new();
        rig.pad.update(|s| s.right_trigger = 0.8);
        assert!(!rig.step().is_zero());

        rig.pad.set_connected(false);
        assert!(rig.step().is_zero());
        assert_eq!(rig.vehicle.last_speeds(), Some((0.0, 0.0)));
    }

    #[test]
    fn ui_snapshot_every_200_ms() {
        let mut rig = Rig::new();
        for _ in 0..4 {
            rig.step();
        }
        assert_eq!(rig.ui.borrow().timestamp_ms, 10_000);
        rig.step();
        let ui = rig.ui.borrow().clone();
        assert_eq!(ui.timestamp_ms, 10_200);
        assert!(ui.rover_connected);
        assert!(ui.gamepad_connected);
    }

    #[test]
    fn applied_commands_feed_odometry_and_bus() {
        let mut rig = Rig::new();
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        rig.bus.subscribe(Topic::Drive, move |p| {
            if let Payload::Drive(s) = p {
                sink.lock().push(s.command);
            }
            Ok(())
        });

        rig.pad.update(|s| s.right_trigger = 1.0);
        for _ in 0..10 {
            rig.step();
        }
        assert_eq!(samples.lock().len(), 10);
        assert!(rig.odometry.pose().x_m > 0.2);
    }

    #[test]
    fn obstacle_from_bus_reaches_ui() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = Rig::new();
        rig.bus.publish(
            Topic::Sonar,
            &Payload::Range(RangeSnapshot {
                distance_mm: Some(150.0),
                attached: true,
                timestamp_ms: 10_000,
                last_error: None,
            }),
        )?;
        rig.step();
        assert!(rig.ui.borrow().safety.obstacle_active);
        Ok(())
    }

    #[test]
    fn shutdown_zeroes_then_disconnects() {
        let mut rig = Rig::new();
        rig.pad.update(|s| s.right_trigger = 0.4);
        rig.step();
        let stops_before = rig.vehicle.stop_calls();

        rig.teleop.shutdown();
        assert!(rig.vehicle.stop_calls() > stops_before);
        assert_eq!(rig.vehicle.disconnects(), 1);
        assert!(!rig.vehicle.is_connected());
    }
}
