//! In-process simulated drivers for tests and hardware-free runs.
//!
//! Each simulated device hands out the trait object consumed by the core and
//! keeps a cloneable handle that tests use to inject faults and inspect
//! what the core did.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use rover_hal::sim::SimVehicle;
//! use rover_hal::VehicleLink;
//!
//! let sim = SimVehicle::new();
//! let mut link = sim.link();
//! link.connect(Duration::from_millis(10)).unwrap();
//! link.set_wheel_speeds(0.5, 0.5).unwrap();
//! assert_eq!(sim.last_speeds(), Some((0.5, 0.5)));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rover_types::{RoverError, StickyReading};

use crate::input::{BatteryKind, BatteryLevel, BatteryStatus, InputCapabilities, InputDevice, RawPadState};
use crate::sensor::SensorChannel;
use crate::vehicle::VehicleLink;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor channel
// ────────────────────────────────────────────────────────────────────────────

/// Call counters shared between a [`SimSensorChannel`] and the test.
#[derive(Debug, Default)]
pub struct SimChannelCounters {
    open_attempts: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
}

impl SimChannelCounters {
    /// Calls to `open`, successful or not.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Opens that succeeded.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Calls to `close`.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Reads served while the channel was open.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

type ReadSource<R> = Box<dyn FnMut(u64) -> Result<R, RoverError> + Send>;

/// A simulated sensor channel whose reads come from a closure.
pub struct SimSensorChannel<R> {
    id: String,
    source: ReadSource<R>,
    read_index: u64,
    open: bool,
    attached: bool,
    failing_opens: u32,
    counters: Arc<SimChannelCounters>,
}

impl<R: StickyReading> SimSensorChannel<R> {
    /// Reads are produced by `source`, which receives the zero-based read index.
    pub fn from_fn<F>(id: impl Into<String>, source: F) -> Self
    where
        F: FnMut(u64) -> Result<R, RoverError> + Send + 'static,
    {
        Self {
            id: id.into(),
            source: Box::new(source),
            read_index: 0,
            open: false,
            attached: true,
            failing_opens: 0,
            counters: Arc::default(),
        }
    }

    /// Every read returns `reading`.
    pub fn constant(id: impl Into<String>, reading: R) -> Self {
        Self::from_fn(id, move |_| Ok(reading))
    }

    /// Reads replay `script` in order, then keep repeating its last entry.
    pub fn scripted(id: impl Into<String>, script: Vec<Result<R, RoverError>>) -> Self {
        let id = id.into();
        let component = id.clone();
        Self::from_fn(id, move |n| {
            let idx = usize::try_from(n).unwrap_or(usize::MAX).min(script.len().saturating_sub(1));
            script
                .get(idx)
                .cloned()
                .unwrap_or_else(|| Err(RoverError::hardware(component.clone(), "empty script")))
        })
    }

    /// The first `n` open attempts time out.
    pub fn failing_opens(mut self, n: u32) -> Self {
        self.failing_opens = n;
        self
    }

    /// Opens succeed but the device reports itself as not attached.
    pub fn detached(mut self) -> Self {
        self.attached = false;
        self
    }

    /// Shared counters for asserting on driver calls after the channel is moved.
    pub fn counters(&self) -> Arc<SimChannelCounters> {
        self.counters.clone()
    }
}

impl<R: StickyReading> SensorChannel for SimSensorChannel<R> {
    type Reading = R;

    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self, timeout: Duration) -> Result<(), RoverError> {
        self.counters.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(RoverError::Timeout {
                component: self.id.clone(),
                after_ms: millis(timeout),
            });
        }
        self.open = true;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), RoverError> {
        self.open = false;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<R, RoverError> {
        if !self.open {
            return Err(RoverError::NotConnected(self.id.clone()));
        }
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        let n = self.read_index;
        self.read_index += 1;
        (self.source)(n)
    }

    fn is_attached(&self) -> Result<bool, RoverError> {
        Ok(self.open && self.attached)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vehicle link
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct VehicleState {
    reachable: bool,
    connected: bool,
    failing_checks: bool,
    connect_attempts: usize,
    disconnects: usize,
    stop_calls: usize,
    last_speeds: Option<(f64, f64)>,
}

/// Handle to a simulated rover base.
#[derive(Debug, Clone)]
pub struct SimVehicle {
    state: Arc<Mutex<VehicleState>>,
}

impl Default for SimVehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl SimVehicle {
    /// A reachable rover that is not yet connected.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VehicleState {
                reachable: true,
                ..VehicleState::default()
            })),
        }
    }

    /// The [`VehicleLink`] to hand to the core.
    pub fn link(&self) -> Box<dyn VehicleLink> {
        Box::new(SimVehicleLink {
            state: self.state.clone(),
        })
    }

    /// Whether future connect attempts succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Drop an established connection, as if the network went away.
    pub fn drop_link(&self) {
        self.state.lock().connected = false;
    }

    /// Make `is_connected` fail with an error instead of answering.
    pub fn set_failing_checks(&self, failing: bool) {
        self.state.lock().failing_checks = failing;
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Calls to `connect`, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Calls to `disconnect`.
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Calls to `stop`.
    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    /// Raw duty cycles from the most recent `set_wheel_speeds` or `stop`.
    pub fn last_speeds(&self) -> Option<(f64, f64)> {
        self.state.lock().last_speeds
    }
}

struct SimVehicleLink {
    state: Arc<Mutex<VehicleState>>,
}

impl VehicleLink for SimVehicleLink {
    fn connect(&mut self, timeout: Duration) -> Result<(), RoverError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if !state.reachable {
            return Err(RoverError::Timeout {
                component: "vehicle".into(),
                after_ms: millis(timeout),
            });
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RoverError> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> Result<bool, RoverError> {
        let state = self.state.lock();
        if state.failing_checks {
            return Err(RoverError::hardware("vehicle", "status query failed"));
        }
        Ok(state.connected)
    }

    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), RoverError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(RoverError::NotConnected("vehicle".into()));
        }
        state.last_speeds = Some((left, right));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RoverError> {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        if state.connected {
            state.last_speeds = Some((0.0, 0.0));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gamepad
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PadState {
    connected: bool,
    pad: RawPadState,
    capabilities: InputCapabilities,
    battery: BatteryStatus,
    rumbles: Vec<(u16, u16, Duration)>,
    reconnect_attempts: usize,
}

/// Handle to a simulated gamepad.
#[derive(Debug, Clone)]
pub struct SimGamepad {
    state: Arc<Mutex<PadState>>,
}

impl Default for SimGamepad {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGamepad {
    /// A connected pad with battery reporting and rumble.
    pub fn new() -> Self {
        Self::with_capabilities(InputCapabilities {
            battery: true,
            rumble: true,
        })
    }

    /// A connected pad that only reports `capabilities`.
    pub fn with_capabilities(capabilities: InputCapabilities) -> Self {
        Self {
            state: Arc::new(Mutex::new(PadState {
                connected: true,
                pad: RawPadState::default(),
                capabilities,
                battery: BatteryStatus {
                    level: BatteryLevel::Full,
                    kind: BatteryKind::Alkaline,
                },
                rumbles: Vec::new(),
                reconnect_attempts: 0,
            })),
        }
    }

    /// The [`InputDevice`] to hand to the core.
    pub fn device(&self) -> Box<dyn InputDevice> {
        Box::new(SimGamepadDevice {
            state: self.state.clone(),
        })
    }

    /// Mutate the pad state seen by the next poll.
    pub fn update<F: FnOnce(&mut RawPadState)>(&self, f: F) {
        f(&mut self.state.lock().pad);
    }

    /// Plug or unplug the pad. Unplugging releases every input.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock();
        state.connected = connected;
        if !connected {
            state.pad = RawPadState::default();
        }
    }

    /// Battery status reported from now on.
    pub fn set_battery(&self, battery: BatteryStatus) {
        self.state.lock().battery = battery;
    }

    /// Every rumble request received so far.
    pub fn rumbles(&self) -> Vec<(u16, u16, Duration)> {
        self.state.lock().rumbles.clone()
    }

    /// Calls to `reconnect`.
    pub fn reconnect_attempts(&self) -> usize {
        self.state.lock().reconnect_attempts
    }
}

struct SimGamepadDevice {
    state: Arc<Mutex<PadState>>,
}

impl InputDevice for SimGamepadDevice {
    fn name(&self) -> &str {
        "sim-gamepad"
    }

    fn poll(&mut self) -> Result<Option<RawPadState>, RoverError> {
        let state = self.state.lock();
        Ok(state.connected.then_some(state.pad))
    }

    fn reconnect(&mut self) -> Result<(), RoverError> {
        self.state.lock().reconnect_attempts += 1;
        Ok(())
    }

    fn capabilities(&self) -> InputCapabilities {
        self.state.lock().capabilities
    }

    fn battery(&mut self) -> Result<BatteryStatus, RoverError> {
        let state = self.state.lock();
        if !state.capabilities.battery {
            return Err(RoverError::hardware("sim-gamepad", "battery reporting unsupported"));
        }
        Ok(state.battery)
    }

    fn rumble(&mut self, low: u16, high: u16, duration: Duration) -> Result<(), RoverError> {
        let mut state = self.state.lock();
        if !state.capabilities.rumble {
            return Err(RoverError::hardware("sim-gamepad", "rumble unsupported"));
        }
        state.rumbles.push((low, high, duration));
        Ok(())
    }
}
