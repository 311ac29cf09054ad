//! [`Watchdog`] – freshness monitor for periodic streams.
//!
//! Each sensor stream is registered with a timeout. Every snapshot that
//! arrives with the device attached counts as a heartbeat, stamped with the
//! snapshot's own capture time. [`Watchdog::check_all`] lists the streams
//! whose latest heartbeat is older than their timeout.

use std::collections::HashMap;
use std::time::Duration;

use rover_types::SharedClock;

/// Health state reported for a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    TimedOut,
}

struct ComponentEntry {
    last_heartbeat_ms: u64,
    timeout_ms: u64,
}

/// Tracks heartbeats against an injected clock.
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use rover_kernel::watchdog::{ComponentHealth, Watchdog};
/// use rover_types::ManualClock;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let mut wd = Watchdog::new(clock.clone());
/// wd.register("sonar", Duration::from_millis(1000));
///
/// clock.advance(1500);
/// assert_eq!(wd.health("sonar"), ComponentHealth::TimedOut);
/// wd.heartbeat("sonar");
/// assert_eq!(wd.health("sonar"), ComponentHealth::Healthy);
/// ```
pub struct Watchdog {
    clock: SharedClock,
    components: HashMap<String, ComponentEntry>,
}

impl Watchdog {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            components: HashMap::new(),
        }
    }

    /// Register `component_id`, starting healthy. Re-registering resets it.
    pub fn register(&mut self, component_id: &str, timeout: Duration) {
        self.components.insert(
            component_id.to_string(),
            ComponentEntry {
                last_heartbeat_ms: self.clock.now_ms(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        );
    }

    pub fn heartbeat(&mut self, component_id: &str) {
        let now = self.clock.now_ms();
        self.heartbeat_at(component_id, now);
    }

    /// Heartbeat stamped with an explicit time. Older stamps never move the
    /// deadline backwards. Unknown components are ignored.
    pub fn heartbeat_at(&mut self, component_id: &str, timestamp_ms: u64) {
        if let Some(entry) = self.components.get_mut(component_id) {
            entry.last_heartbeat_ms = entry.last_heartbeat_ms.max(timestamp_ms);
        }
    }

    /// Unknown components report [`ComponentHealth::TimedOut`].
    pub fn health(&self, component_id: &str) -> ComponentHealth {
        let now = self.clock.now_ms();
        match self.components.get(component_id) {
            Some(entry) if !entry.expired(now) => ComponentHealth::Healthy,
            _ => ComponentHealth::TimedOut,
        }
    }

    /// IDs of every timed-out component, sorted.
    pub fn check_all(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut stale: Vec<String> = self
            .components
            .iter()
            .filter(|(_, entry)| entry.expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        stale.sort();
        stale
    }
}

impl ComponentEntry {
    fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat_ms) > self.timeout_ms
    }
}
