//! Two-threshold latch for "too close" detection.
//!
//! A reading at or below the *on* threshold activates the latch. Once active
//! it only releases when a reading rises strictly above the *off* threshold,
//! so a distance hovering around one cutoff does not flap.

/// What an update did to the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Activated,
    Deactivated,
}

/// Distance hysteresis: active when `value <= on`, released when `value > off`.
///
/// ```
/// use rover_kernel::hysteresis::{Hysteresis, Transition};
///
/// let mut h = Hysteresis::with_delta(250.0, 60.0);
/// assert_eq!(h.update(240.0), Transition::Activated);
/// assert_eq!(h.update(290.0), Transition::Unchanged);
/// assert_eq!(h.update(311.0), Transition::Deactivated);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Hysteresis {
    on: f64,
    off: f64,
    active: bool,
}

impl Hysteresis {
    /// `off` below `on` is raised to `on`.
    pub fn new(on: f64, off: f64) -> Self {
        Self {
            on,
            off: off.max(on),
            active: false,
        }
    }

    /// Release threshold expressed as a margin above `on`.
    pub fn with_delta(on: f64, off_delta: f64) -> Self {
        Self::new(on, on + off_delta.max(0.0))
    }

    pub fn update(&mut self, value: f64) -> Transition {
        if !value.is_finite() {
            return self.force_off();
        }
        if !self.active && value <= self.on {
            self.active = true;
            Transition::Activated
        } else if self.active && value > self.off {
            self.active = false;
            Transition::Deactivated
        } else {
            Transition::Unchanged
        }
    }

    /// Release unconditionally (stale or missing input).
    pub fn force_off(&mut self) -> Transition {
        if self.active {
            self.active = false;
            Transition::Deactivated
        } else {
            Transition::Unchanged
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn on_threshold(&self) -> f64 {
        self.on
    }

    pub fn off_threshold(&self) -> f64 {
        self.off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activates_at_threshold() {
        let mut h = Hysteresis::with_delta(250.0, 60.0);
        assert_eq!(h.update(251.0), Transition::Unchanged);
        assert_eq!(h.update(250.0), Transition::Activated);
        assert!(h.is_active());
    }

    #[test]
    fn stays_active_inside_band() {
        let mut h = Hysteresis::with_delta(250.0, 60.0);
        h.update(240.0);
        assert_eq!(h.update(290.0), Transition::Unchanged);
        assert_eq!(h.update(310.0), Transition::Unchanged);
        assert!(h.is_active());
        assert_eq!(h.update(311.0), Transition::Deactivated);
        assert!(!h.is_active());
    }

    #[test]
    fn inactive_latch_ignores_band() {
        let mut h = Hysteresis::with_delta(250.0, 60.0);
        assert_eq!(h.update(290.0), Transition::Unchanged);
        assert!(!h.is_active());
    }

    #[test]
    fn non_finite_forces_off() {
        let mut h = Hysteresis::new(350.0, 400.0);
        h.update(100.0);
        assert_eq!(h.update(f64::NAN), Transition::Deactivated);
        assert_eq!(h.force_off(), Transition::Unchanged);
    }

    #[test]
    fn off_below_on_is_raised() {
        let h = Hysteresis::new(300.0, 200.0);
        assert_eq!(h.off_threshold(), 300.0);
        assert_eq!(h.on_threshold(), 300.0);
    }
}
