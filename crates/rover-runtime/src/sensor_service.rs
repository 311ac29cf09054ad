//! [`SensorService`] – one polling thread per sensor channel.
//!
//! ```text
//!  Disconnected ──open ok──► Polling ──read/open fault──► Disconnected
//!        ▲   │                                               │
//!        │   └──(backoff window closed: wait)                │
//!        └───────────────────────────────────────────────────┘
//! ```
//!
//! Every cycle publishes a snapshot on the service's topic, whether or not the
//! channel is open: the sticky last-known-good value, the attachment flag, the
//! capture time and the last error text. A fault closes the channel, keeps its
//! message in `last_error` until the next good read, and schedules the reopen
//! through a [`Backoff`].
//!
//! The channel is owned by the worker thread and closed by a drop guard, so
//! it is closed exactly once however the thread ends.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rover_hal::SensorChannel;
use rover_kernel::{Backoff, ReconnectPolicy};
use rover_middleware::EventBus;
use rover_types::{Payload, RoverError, SharedClock, StickyReading, Topic};
use tracing::{debug, error, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SensorServiceConfig {
    pub topic: Topic,
    pub period: Duration,
    /// Hard timeout handed to [`SensorChannel::open`].
    pub open_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SensorServiceConfig {
    /// Standard polling period for each sensor topic.
    pub fn for_topic(topic: Topic) -> Self {
        let period_ms = match topic {
            Topic::Sonar => 250,
            Topic::TofLeft | Topic::TofRight => 40,
            _ => 500,
        };
        Self {
            topic,
            period: Duration::from_millis(period_ms),
            open_timeout: Duration::from_millis(5000),
            reconnect: ReconnectPolicy::exponential(
                Duration::from_millis(250),
                Duration::from_secs(5),
            ),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Disconnected,
    Opening,
    Polling,
    Stopped,
}

/// Latest-wins holder for a service's most recent snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Option<Payload>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Payload> {
        self.inner.read().clone()
    }

    pub fn set(&self, payload: Payload) {
        *self.inner.write() = Some(payload);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

pub(crate) struct SensorWorker<C: SensorChannel> {
    channel: C,
    open: bool,
    sticky: <C::Reading as StickyReading>::Sticky,
    last_error: Option<String>,
    backoff: Backoff,
    config: SensorServiceConfig,
    bus: EventBus,
    clock: SharedClock,
    cell: SnapshotCell,
    state: Arc<Mutex<ServiceState>>,
}

impl<C: SensorChannel> SensorWorker<C> {
    pub(crate) fn new(
        channel: C,
        config: SensorServiceConfig,
        bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            channel,
            open: false,
            sticky: Default::default(),
            last_error: None,
            backoff: config.reconnect.backoff(),
            config,
            bus,
            clock,
            cell: SnapshotCell::new(),
            state: Arc::new(Mutex::new(ServiceState::Disconnected)),
        }
    }

    /// One connect-or-read pass followed by a publish.
    pub(crate) fn cycle(&mut self) {
        let now = self.clock.now_ms();

        if !self.open && self.backoff.try_begin(now) {
            self.try_open(now);
        }

        let attached = if self.open {
            match self.poll_channel() {
                Ok(attached) => attached,
                Err(e) => {
                    self.fault(e, now);
                    false
                }
            }
        } else {
            false
        };

        self.publish(attached, now);
    }

    fn try_open(&mut self, now: u64) {
        self.set_state(ServiceState::Opening);
        match self.channel.open(self.config.open_timeout) {
            Ok(()) => {
                self.open = true;
                self.backoff.record_success();
                self.set_state(ServiceState::Polling);
                info!(topic = %self.config.topic, channel = self.channel.id(), "sensor channel open");
            }
            Err(e) => {
                self.backoff.record_failure(now);
                warn!(
                    topic = %self.config.topic,
                    error = %e,
                    retry_in_ms = self.backoff.current_delay().as_millis() as u64,
                    "sensor open failed"
                );
                self.last_error = Some(e.to_string());
                // A failed open may leave the driver half-initialised.
                if let Err(e) = self.channel.close() {
                    debug!(topic = %self.config.topic, error = %e, "sensor close after failed open");
                }
                self.set_state(ServiceState::Disconnected);
            }
        }
    }

    fn poll_channel(&mut self) -> Result<bool, RoverError> {
        if !self.channel.is_attached()? {
            return Ok(false);
        }
        let reading = self.channel.read()?;
        self.last_error = None;
        if !reading.absorb(&mut self.sticky) {
            debug!(topic = %self.config.topic, "reading rejected, keeping last good value");
        }
        Ok(true)
    }

    /// Close the channel and hold off the reopen for one backoff window.
    fn fault(&mut self, e: RoverError, now_ms: u64) {
        warn!(topic = %self.config.topic, error = %e, "sensor fault, closing channel");
        self.last_error = Some(e.to_string());
        self.close_channel();
        self.backoff.record_failure(now_ms);
        self.set_state(ServiceState::Disconnected);
    }

    fn close_channel(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.channel.close() {
            debug!(topic = %self.config.topic, error = %e, "sensor close failed");
        }
    }

    fn publish(&mut self, attached: bool, now_ms: u64) {
        let payload = <C::Reading as StickyReading>::snapshot(self.sticky, attached, now_ms, self.last_error.clone());
        self.cell.set(payload.clone());
        if let Err(e) = self.bus.publish(self.config.topic, &payload) {
            error!(topic = %self.config.topic, error = %e, "snapshot rejected by bus");
        }
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock() = state;
    }

    /// Recover from a panicking cycle: the channel is in an unknown state.
    fn recover(&mut self) {
        let now = self.clock.now_ms();
        self.fault(RoverError::hardware(self.channel.id().to_string(), "sensor cycle panicked"), now);
    }
}

impl<C: SensorChannel> Drop for SensorWorker<C> {
    fn drop(&mut self) {
        self.close_channel();
        self.set_state(ServiceState::Stopped);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Service handle
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a running sensor polling thread. Dropping it stops the thread.
pub struct SensorService {
    topic: Topic,
    state: Arc<Mutex<ServiceState>>,
    cell: SnapshotCell,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SensorService {
    pub fn spawn<C>(
        channel: C,
        config: SensorServiceConfig,
        bus: EventBus,
        clock: SharedClock,
    ) -> Result<Self, RoverError>
    where
        C: SensorChannel + 'static,
    {
        let topic = config.topic;
        let period = config.period;
        let mut worker = SensorWorker::new(channel, config, bus, clock);
        let state = worker.state.clone();
        let cell = worker.cell.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = thread::Builder::new()
            .name(format!("sensor-{topic}"))
            .spawn(move || {
                debug!(topic = %topic, "sensor service started");
                while !stop_flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    if panic::catch_unwind(AssertUnwindSafe(|| worker.cycle())).is_err() {
                        error!(topic = %topic, "sensor cycle panicked");
                        worker.recover();
                    }
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        thread::park_timeout(rest);
                    }
                }
                debug!(topic = %topic, "sensor service stopped");
            })
            .map_err(|e| RoverError::hardware(topic.to_string(), e))?;

        Ok(Self {
            topic,
            state,
            cell,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub fn cell(&self) -> &SnapshotCell {
        &self.cell
    }

    pub fn latest(&self) -> Option<Payload> {
        self.cell.get()
    }

    /// Stop and join the thread. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        thread.thread().unpark();
        if thread.join().is_err() {
            error!(topic = %self.topic, "sensor thread panicked");
        }
    }
}

impl Drop for SensorService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_hal::sim::SimSensorChannel;
    use rover_types::{ClimateReading, ManualClock, RangeReading};

    fn worker<C: SensorChannel>(channel: C, clock: Arc<ManualClock>) -> (SensorWorker<C>, EventBus) {
        let bus = EventBus::new();
        let w = SensorWorker::new(channel, SensorServiceConfig::for_topic(Topic::Sonar), bus.clone(), clock);
        (w, bus)
    }

    fn range(cell: &SnapshotCell) -> Option<rover_types::RangeSnapshot> {
        match cell.get() {
            Some(Payload::Range(s)) => Some(s),
            _ => None,
        }
    }

    #[test]
    fn reads_are_sticky_across_invalid_values() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ch = SimSensorChannel::scripted(
            "sonar",
            vec![Ok(RangeReading(420.0)), Ok(RangeReading(f64::NAN)), Ok(RangeReading(-3.0))],
        );
        let (mut w, _) = worker(ch, clock.clone());

        w.cycle();
        assert_eq!(*w.state.lock(), ServiceState::Polling);
        assert_eq!(range(&w.cell).and_then(|s| s.distance_mm), Some(420.0));

        clock.advance(250);
        w.cycle();
        w.cycle();
        let snap = range(&w.cell);
        assert_eq!(snap.as_ref().and_then(|s| s.distance_mm), Some(420.0));
        assert_eq!(snap.map(|s| s.timestamp_ms), Some(1_250));
    }

    #[test]
    fn read_fault_closes_and_error_sticks() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::scripted(
            "sonar",
            vec![
                Ok(RangeReading(300.0)),
                Err(RoverError::hardware("sonar", "bus glitch")),
                Ok(RangeReading(310.0)),
            ],
        );
        let counters = ch.counters();
        let (mut w, _) = worker(ch, clock.clone());

        w.cycle();
        w.cycle();
        assert_eq!(*w.state.lock(), ServiceState::Disconnected);
        assert_eq!(counters.closes(), 1);
        let snap = range(&w.cell);
        assert_eq!(snap.as_ref().and_then(|s| s.distance_mm), Some(300.0));
        assert!(snap.and_then(|s| s.last_error).is_some_and(|e| e.contains("bus glitch")));

        // Inside the backoff window: no reopen.
        w.cycle();
        assert_eq!(counters.open_attempts(), 1);

        clock.advance(250);
        w.cycle();
        assert_eq!(counters.opens(), 2);
        let snap = range(&w.cell);
        assert_eq!(snap.as_ref().and_then(|s| s.distance_mm), Some(310.0));
        assert_eq!(snap.and_then(|s| s.last_error), None);
    }

    #[test]
    fn failed_open_closes_the_channel() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::constant("sonar", RangeReading(300.0)).failing_opens(1);
        let counters = ch.counters();
        let (mut w, _) = worker(ch, clock.clone());

        w.cycle();
        assert_eq!(counters.open_attempts(), 1);
        assert_eq!(counters.closes(), 1);
        assert_eq!(*w.state.lock(), ServiceState::Disconnected);
        assert!(range(&w.cell).and_then(|s| s.last_error).is_some());

        clock.advance(250);
        w.cycle();
        assert_eq!(counters.opens(), 1);
        assert_eq!(*w.state.lock(), ServiceState::Polling);

        drop(w);
        assert_eq!(counters.closes(), 2);
    }

    #[test]
    fn successful_read_clears_error_even_when_value_is_rejected() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::scripted(
            "sonar",
            vec![
                Ok(RangeReading(300.0)),
                Err(RoverError::hardware("sonar", "bus glitch")),
                Ok(RangeReading(f64::NAN)),
            ],
        );
        let (mut w, _) = worker(ch, clock.clone());

        w.cycle();
        w.cycle();
        assert!(range(&w.cell).and_then(|s| s.last_error).is_some());

        clock.advance(250);
        w.cycle();
        let snap = range(&w.cell);
        assert_eq!(snap.as_ref().map(|s| s.attached), Some(true));
        assert_eq!(snap.as_ref().and_then(|s| s.distance_mm), Some(300.0));
        assert_eq!(snap.and_then(|s| s.last_error), None);
    }

    #[test]
    fn drop_after_fault_does_not_close_again() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::scripted(
            "sonar",
            vec![Ok(RangeReading(300.0)), Err(RoverError::hardware("sonar", "bus glitch"))],
        );
        let counters = ch.counters();
        let (mut w, _) = worker(ch, clock);

        w.cycle();
        w.cycle();
        assert_eq!(counters.closes(), 1);
        let state = w.state.clone();
        drop(w);
        assert_eq!(counters.closes(), 1);
        assert_eq!(*state.lock(), ServiceState::Stopped);
    }

    #[test]
    fn open_failures_back_off_exponentially() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::constant("sonar", RangeReading(500.0)).failing_opens(3);
        let counters = ch.counters();
        let (mut w, _) = worker(ch, clock.clone());

        // Attempts at 0, 250, 750, 1750 (250 → 500 → 1000 ms windows).
        for _ in 0..40 {
            w.cycle();
            clock.advance(50);
        }
        assert_eq!(counters.open_attempts(), 4);
        assert_eq!(counters.opens(), 1);
        assert_eq!(*w.state.lock(), ServiceState::Polling);
    }

    #[test]
    fn detached_device_publishes_unattached() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::constant("sonar", RangeReading(500.0)).detached();
        let counters = ch.counters();
        let (mut w, _) = worker(ch, clock);
        w.cycle();
        let snap = range(&w.cell);
        assert_eq!(snap.as_ref().map(|s| s.attached), Some(false));
        assert_eq!(snap.and_then(|s| s.distance_mm), None);
        assert_eq!(counters.reads(), 0);
    }

    #[test]
    fn every_cycle_publishes_on_its_topic() {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::constant("climate", ClimateReading { humidity_pct: 40.0, temperature_c: 21.5 });
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(Topic::Climate, move |p| {
            sink.lock().push(p.clone());
            Ok(())
        });
        let mut w = SensorWorker::new(ch, SensorServiceConfig::for_topic(Topic::Climate), bus, clock);
        w.cycle();
        w.cycle();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[1], Payload::Climate(s) if s.temperature_c == Some(21.5)));
    }

    #[test]
    fn stop_is_idempotent_and_closes_once() -> Result<(), Box<dyn std::error::Error>> {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::constant("tof.left", RangeReading(90.0));
        let counters = ch.counters();
        let mut config = SensorServiceConfig::for_topic(Topic::TofLeft);
        config.period = Duration::from_millis(5);
        let service = SensorService::spawn(ch, config, EventBus::new(), clock)?;

        let deadline = Instant::now() + Duration::from_secs(2);
        while service.latest().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(service.latest().is_some());

        service.stop();
        service.stop();
        drop(service);
        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.closes(), 1);
        Ok(())
    }

    #[test]
    fn panicking_channel_does_not_kill_the_service() -> Result<(), Box<dyn std::error::Error>> {
        let clock = Arc::new(ManualClock::new(0));
        let ch = SimSensorChannel::from_fn("light", |n| {
            if n == 0 {
                panic!("driver bug");
            }
            Ok(rover_types::LightReading(120.0))
        });
        let mut config = SensorServiceConfig::for_topic(Topic::Light);
        config.period = Duration::from_millis(5);
        config.reconnect = ReconnectPolicy::fixed(Duration::ZERO);
        let service = SensorService::spawn(ch, config, EventBus::new(), clock)?;

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut lux = None;
        while lux.is_none() && Instant::now() < deadline {
            if let Some(Payload::Light(s)) = service.latest() {
                lux = s.illuminance_lux;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(lux, Some(120.0));
        service.stop();
        assert_eq!(service.state(), ServiceState::Stopped);
        Ok(())
    }
}
