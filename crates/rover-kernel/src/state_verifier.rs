//! [`StateVerifier`] – drive-command interlocks.
//!
//! Before a [`DriveCommand`] reaches the motors it is checked against the
//! current [`SafetyState`] by every registered [`Rule`], in order. The first
//! violation is returned and the command is **not** applied.
//!
//! Built-in rules:
//! - [`EmergencyStopInterlock`] – no non-zero command while the e-stop latch
//!   is set.
//! - [`CommandRangeRule`] – both sides finite and within `±max`.
//! - [`ObstacleForwardInterlock`] – optional; no forward motion while an
//!   obstacle is reported.

use rover_types::{DriveCommand, RoverError, SafetyState};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant a drive command must satisfy.
pub trait Rule: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn check(&self, command: &DriveCommand, state: &SafetyState) -> Result<(), RoverError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StateVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Ordered list of [`Rule`]s.
///
/// ```
/// use rover_kernel::state_verifier::StateVerifier;
/// use rover_types::{DriveCommand, SafetyState};
///
/// let verifier = StateVerifier::standard();
/// let latched = SafetyState { emergency_stop_active: true, ..SafetyState::default() };
///
/// assert!(verifier.verify(&DriveCommand::STOP, &latched).is_ok());
/// assert!(verifier.verify(&DriveCommand::new(0.2, 0.2), &latched).is_err());
/// ```
#[derive(Default)]
pub struct StateVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl StateVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// E-stop interlock followed by the unit range check.
    pub fn standard() -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(EmergencyStopInterlock));
        verifier.add_rule(Box::new(CommandRangeRule { max: 1.0 }));
        verifier
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn verify(&self, command: &DriveCommand, state: &SafetyState) -> Result<(), RoverError> {
        for rule in &self.rules {
            rule.check(command, state)?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects every non-zero command while the emergency stop is latched.
pub struct EmergencyStopInterlock;

impl Rule for EmergencyStopInterlock {
    fn name(&self) -> &str {
        "emergency_stop"
    }

    fn check(&self, command: &DriveCommand, state: &SafetyState) -> Result<(), RoverError> {
        if state.emergency_stop_active && !command.is_zero() {
            return Err(RoverError::EmergencyStopActive);
        }
        Ok(())
    }
}

/// Rejects non-finite or out-of-range wheel commands.
pub struct CommandRangeRule {
    pub max: f64,
}

impl Rule for CommandRangeRule {
    fn name(&self) -> &str {
        "command_range"
    }

    fn check(&self, command: &DriveCommand, _state: &SafetyState) -> Result<(), RoverError> {
        for (side, value) in [("left", command.left), ("right", command.right)] {
            if !value.is_finite() || value.abs() > self.max {
                return Err(RoverError::InvalidCommand(format!(
                    "{side} = {value} outside ±{}",
                    self.max
                )));
            }
        }
        Ok(())
    }
}

/// Rejects commands that move forward while an obstacle is reported.
/// Turning in place and reversing stay allowed.
pub struct ObstacleForwardInterlock;

impl Rule for ObstacleForwardInterlock {
    fn name(&self) -> &str {
        "obstacle_forward"
    }

    fn check(&self, command: &DriveCommand, state: &SafetyState) -> Result<(), RoverError> {
        if state.obstacle_active && command.linear() > 0.0 {
            return Err(RoverError::InvalidCommand(
                "forward motion blocked by obstacle".into(),
            ));
        }
        Ok(())
    }
}
