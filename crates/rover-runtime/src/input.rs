//! [`InputPoller`] – gamepad sampling thread.
//!
//! Every 50 ms the poller samples the [`InputDevice`], applies the stick
//! deadzone, derives the speed mode from the left bumper and publishes a
//! [`GamepadState`] for the control loop. A rising edge on B latches an
//! e-stop request that the control loop consumes exactly once.
//!
//! Capabilities are negotiated once at start. Without battery support the
//! state carries [`BatteryStatus::unknown`]; without rumble the haptic alerts
//! are skipped. Each alert fires once per episode and re-arms when its
//! condition clears or the pad disconnects.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rover_hal::{BatteryStatus, Buttons, InputCapabilities, InputDevice, RawPadState};
use rover_kernel::{Backoff, ReconnectPolicy, SafetyMonitor};
use rover_types::{RoverError, SharedClock, SpeedMode};
use serde::Serialize;
use tracing::{debug, error, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InputConfig {
    pub period: Duration,
    /// Stick deflection below which an axis reads zero.
    pub deadzone: f64,
    pub battery_poll: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(50),
            deadzone: 0.10,
            battery_poll: Duration::from_millis(1000),
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(1000)),
        }
    }
}

/// One rumble pulse: low- and high-frequency motor strength plus duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticPulse {
    pub low: u16,
    pub high: u16,
    pub duration: Duration,
}

pub const LOW_BATTERY_PULSE: HapticPulse = HapticPulse {
    low: 20_000,
    high: 20_000,
    duration: Duration::from_millis(250),
};

pub const LINK_LOST_PULSE: HapticPulse = HapticPulse {
    low: 30_000,
    high: 0,
    duration: Duration::from_millis(400),
};

pub const OBSTACLE_PULSE: HapticPulse = HapticPulse {
    low: 0,
    high: 25_000,
    duration: Duration::from_millis(150),
};

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

/// Pad state as seen by the control loop. All-zero while disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GamepadState {
    pub connected: bool,
    pub left_x: f64,
    pub left_y: f64,
    pub right_x: f64,
    pub right_y: f64,
    pub left_trigger: f64,
    pub right_trigger: f64,
    pub buttons: Buttons,
    pub speed_mode: SpeedMode,
    pub battery: BatteryStatus,
}

#[derive(Debug, Default)]
struct InputShared {
    state: RwLock<GamepadState>,
    estop_edge: AtomicBool,
}

/// Cloneable reader side of the poller.
#[derive(Debug, Clone, Default)]
pub struct InputHandle {
    shared: Arc<InputShared>,
}

impl InputHandle {
    pub fn latest(&self) -> GamepadState {
        *self.shared.state.read()
    }

    /// Consume a pending e-stop press. Returns `true` at most once per press.
    pub fn take_estop_edge(&self) -> bool {
        self.shared.estop_edge.swap(false, Ordering::AcqRel)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AlertLatches {
    low_battery: bool,
    link_lost: bool,
    obstacle: bool,
}

pub(crate) struct InputWorker {
    device: Box<dyn InputDevice>,
    capabilities: InputCapabilities,
    config: InputConfig,
    clock: SharedClock,
    safety: SafetyMonitor,
    handle: InputHandle,
    backoff: Backoff,
    connected: bool,
    prev_b: bool,
    battery: BatteryStatus,
    next_battery_ms: u64,
    alerts: AlertLatches,
}

impl InputWorker {
    pub(crate) fn new(
        device: Box<dyn InputDevice>,
        config: InputConfig,
        clock: SharedClock,
        safety: SafetyMonitor,
    ) -> Self {
        let capabilities = device.capabilities();
        info!(
            device = device.name(),
            battery = capabilities.battery,
            rumble = capabilities.rumble,
            "gamepad capabilities"
        );
        Self {
            device,
            capabilities,
            backoff: config.reconnect.backoff(),
            config,
            clock,
            safety,
            handle: InputHandle::default(),
            connected: false,
            prev_b: false,
            battery: BatteryStatus::unknown(),
            next_battery_ms: 0,
            alerts: AlertLatches::default(),
        }
    }

    pub(crate) fn handle(&self) -> InputHandle {
        self.handle.clone()
    }

    pub(crate) fn cycle(&mut self) {
        let now = self.clock.now_ms();
        match self.device.poll() {
            Ok(Some(raw)) => self.on_sample(raw, now),
            Ok(None) => self.on_disconnect(now, None),
            Err(e) => self.on_disconnect(now, Some(e)),
        }
    }

    fn on_sample(&mut self, raw: RawPadState, now: u64) {
        if !self.connected {
            info!(device = self.device.name(), "gamepad connected");
            self.connected = true;
            self.backoff.record_success();
            self.next_battery_ms = now;
            // A button already held on (re)connect is not a press.
            self.prev_b = raw.buttons.b;
        }

        let b = raw.buttons.b;
        if b && !self.prev_b {
            self.handle.shared.estop_edge.store(true, Ordering::Release);
            debug!("e-stop button pressed");
        }
        self.prev_b = b;

        if now >= self.next_battery_ms {
            self.next_battery_ms = now.saturating_add(millis(self.config.battery_poll));
            self.battery = self.read_battery();
        }

        let dz = self.config.deadzone;
        let state = GamepadState {
            connected: true,
            left_x: deadzone(raw.left_x, dz),
            left_y: deadzone(raw.left_y, dz),
            right_x: deadzone(raw.right_x, dz),
            right_y: deadzone(raw.right_y, dz),
            left_trigger: unit(raw.left_trigger),
            right_trigger: unit(raw.right_trigger),
            buttons: raw.buttons,
            speed_mode: if raw.buttons.left_bumper { SpeedMode::Slow } else { SpeedMode::Normal },
            battery: self.battery,
        };
        *self.handle.shared.state.write() = state;

        self.haptic_alerts();
    }

    fn on_disconnect(&mut self, now: u64, error: Option<RoverError>) {
        if self.connected {
            match &error {
                Some(e) => warn!(error = %e, "gamepad poll failed"),
                None => warn!("gamepad disconnected"),
            }
            self.connected = false;
        }
        *self.handle.shared.state.write() = GamepadState::default();
        self.handle.shared.estop_edge.store(false, Ordering::Release);
        self.prev_b = false;
        self.battery = BatteryStatus::unknown();
        self.alerts = AlertLatches::default();

        if self.backoff.try_begin(now) {
            if let Err(e) = self.device.reconnect() {
                self.backoff.record_failure(now);
                debug!(error = %e, "gamepad reconnect failed");
            }
        }
    }

    fn read_battery(&mut self) -> BatteryStatus {
        if !self.capabilities.battery {
            return BatteryStatus::unknown();
        }
        self.device.battery().unwrap_or_else(|e| {
            debug!(error = %e, "battery query failed");
            BatteryStatus::unknown()
        })
    }

    fn haptic_alerts(&mut self) {
        if !self.capabilities.rumble {
            return;
        }
        let safety = self.safety.snapshot();
        let alerts = [
            (self.battery.is_low(), &mut self.alerts.low_battery, LOW_BATTERY_PULSE, "low battery"),
            (safety.link_lost, &mut self.alerts.link_lost, LINK_LOST_PULSE, "link lost"),
            (safety.obstacle_active, &mut self.alerts.obstacle, OBSTACLE_PULSE, "obstacle"),
        ];
        for (active, fired, pulse, alert) in alerts {
            if !active {
                *fired = false;
                continue;
            }
            if *fired {
                continue;
            }
            *fired = true;
            if let Err(e) = self.device.rumble(pulse.low, pulse.high, pulse.duration) {
                debug!(alert, error = %e, "rumble failed");
            }
        }
    }
}

impl Drop for InputWorker {
    fn drop(&mut self) {
        if self.capabilities.rumble {
            let _ = self.device.rumble(0, 0, Duration::ZERO);
        }
    }
}

fn deadzone(v: f64, dz: f64) -> f64 {
    if !v.is_finite() || v.abs() < dz { 0.0 } else { v.clamp(-1.0, 1.0) }
}

fn unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ────────────────────────────────────────────────────────────────────────────
// Poller handle
// ────────────────────────────────────────────────────────────────────────────

/// Running input thread. Dropping it stops the thread.
pub struct InputPoller {
    handle: InputHandle,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl InputPoller {
    pub fn spawn(
        device: Box<dyn InputDevice>,
        config: InputConfig,
        clock: SharedClock,
        safety: SafetyMonitor,
    ) -> Result<Self, RoverError> {
        let period = config.period;
        let mut worker = InputWorker::new(device, config, clock, safety);
        let handle = worker.handle();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = thread::Builder::new()
            .name("input-poller".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    if panic::catch_unwind(AssertUnwindSafe(|| worker.cycle())).is_err() {
                        error!("input cycle panicked");
                    }
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        thread::park_timeout(rest);
                    }
                }
            })
            .map_err(|e| RoverError::hardware("input-poller", e))?;

        Ok(Self {
            handle,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> InputHandle {
        self.handle.clone()
    }

    /// Stop and join the thread. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        thread.thread().unpark();
        if thread.join().is_err() {
            error!("input thread panicked");
        }
    }
}

impl Drop for InputPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
