//! Battery runtime calibration state machine.
//!
//! A calibration run discharges the battery from 100% down to about 25%
//! while the UPS remeasures its runtime constant. The lifecycle is a
//! finite-state machine whose transitions all go through [`transition`];
//! terminal states stay visible until the caller acknowledges them, so the
//! outcome can always be inspected.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::CALIBRATION_END_PCT;

/// Calibration lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationState {
    /// No calibration in progress
    Idle,
    /// Start requested, waiting for the device to accept `D`
    Checking,
    /// Device accepted; battery discharging toward the end threshold
    Running,
    /// Device finished the discharge
    Completed,
    /// User sent `D` again mid-run
    Aborted,
    /// Device rejected the start, or the transport failed mid-run
    Failed,
}

/// Events that drive the calibration lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    /// Caller asked to start and the pre-check passed
    StartRequested,
    /// Device answered `OK` to `D`
    DeviceAccepted,
    /// Device answered `NO` or anything unexpected to `D`
    DeviceRejected(String),
    /// Battery reached the end threshold or the device reported done
    CompletionDetected,
    /// Caller sent `D` again to cancel
    AbortRequested,
    /// Transport or protocol failure mid-run
    TransportFailed(String),
    /// Caller acknowledged a terminal outcome
    Acknowledged,
}

/// The transition table. Total over `(state, event)`: pairs outside the
/// lifecycle leave the state unchanged.
pub fn transition(state: CalibrationState, event: &CalibrationEvent) -> CalibrationState {
    use CalibrationEvent::*;
    use CalibrationState::*;
    match (state, event) {
        (Idle, StartRequested) => Checking,
        (Checking, DeviceAccepted) => Running,
        (Checking, DeviceRejected(_)) => Failed,
        (Checking, TransportFailed(_)) => Failed,
        (Running, CompletionDetected) => Completed,
        (Running, AbortRequested) => Aborted,
        (Running, TransportFailed(_)) => Failed,
        (Completed, Acknowledged) => Idle,
        (Aborted, Acknowledged) => Idle,
        (Failed, Acknowledged) => Idle,
        (s, _) => s,
    }
}

/// Result of the pre-start check.
#[derive(Debug, Clone, Serialize)]
pub struct StartCheck {
    /// Whether a calibration may begin
    pub allowed: bool,
    /// Why not, when `allowed` is false
    pub reason: Option<String>,
    /// Advisory only: set when smart constant 0 differs from its factory
    /// default, which skews the measured runtime
    pub constant_warning: Option<String>,
}

/// One calibration run. Created alongside the session; reset to
/// [`CalibrationState::Idle`] by acknowledging a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSession {
    state: CalibrationState,
    /// Battery percentage when the run started
    pub start_battery_pct: f64,
    /// Most recent battery percentage
    pub current_battery_pct: f64,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// Failure detail for the `Failed` state
    pub error: String,
    /// Smart constant 0 recorded before the run
    pub pre_cal_constant: String,
    /// Advisory warning from the pre-check
    pub constant_warning: Option<String>,
}

impl CalibrationSession {
    pub fn new() -> Self {
        CalibrationSession {
            state: CalibrationState::Idle,
            start_battery_pct: 0.0,
            current_battery_pct: 0.0,
            started_at: None,
            error: String::new(),
            pre_cal_constant: String::new(),
            constant_warning: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Whether a run is underway (checking or discharging).
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            CalibrationState::Checking | CalibrationState::Running
        )
    }

    /// Pre-start check: the battery must be at a full 100.0%, and the
    /// session must be idle. Also surfaces, without enforcing, whether
    /// smart constant 0 has drifted from the supplied factory default.
    pub fn can_start(&self, battery_pct: f64) -> StartCheck {
        let mut check = StartCheck {
            allowed: true,
            reason: None,
            constant_warning: self.constant_warning.clone(),
        };
        if self.state != CalibrationState::Idle {
            check.allowed = false;
            check.reason = Some(format!("Calibration already in state {:?}", self.state));
        } else if battery_pct < 100.0 {
            check.allowed = false;
            check.reason = Some(format!(
                "Battery must be at 100% to calibrate (currently {battery_pct}%)"
            ));
        }
        check
    }

    /// Record smart constant 0 before a run. When a factory default is
    /// known and differs, an advisory warning is kept for `can_start`.
    pub fn set_pre_cal_constant(&mut self, constant: &str, factory_default: Option<&str>) {
        self.pre_cal_constant = constant.to_string();
        self.constant_warning = match factory_default {
            Some(default) if !constant.is_empty() && constant != default => Some(format!(
                "Smart constant 0 is {constant:?} (factory default {default:?}); \
                 consider resetting it before calibrating"
            )),
            _ => None,
        };
    }

    /// Apply one lifecycle event. Field bookkeeping rides along with the
    /// state change; the state itself only moves through [`transition`].
    pub fn handle(&mut self, event: CalibrationEvent, battery_pct: f64) {
        let next = transition(self.state, &event);
        if next != self.state {
            log::info!("Calibration: {:?} -> {:?} on {:?}", self.state, next, event);
        }
        match &event {
            CalibrationEvent::StartRequested => {
                self.start_battery_pct = battery_pct;
                self.current_battery_pct = battery_pct;
                self.started_at = Some(Utc::now());
                self.error.clear();
            }
            CalibrationEvent::DeviceRejected(reason)
            | CalibrationEvent::TransportFailed(reason) => {
                self.error = reason.clone();
            }
            CalibrationEvent::Acknowledged => {
                if next == CalibrationState::Idle && self.state != CalibrationState::Idle {
                    let kept_warning = self.constant_warning.clone();
                    let kept_constant = self.pre_cal_constant.clone();
                    *self = CalibrationSession::new();
                    self.constant_warning = kept_warning;
                    self.pre_cal_constant = kept_constant;
                    return;
                }
            }
            _ => {}
        }
        self.state = next;
    }

    /// Feed a fresh battery reading. Detects completion when the battery
    /// reaches the end threshold during a run.
    pub fn update_battery(&mut self, battery_pct: f64) {
        self.current_battery_pct = battery_pct;
        if self.state == CalibrationState::Running && battery_pct <= CALIBRATION_END_PCT {
            self.handle(CalibrationEvent::CompletionDetected, battery_pct);
        }
    }

    /// Estimated progress: linear interpolation of battery percentage from
    /// the start value (0%) down to the end threshold (100%), clamped.
    /// Derived locally; the device reports no progress figure.
    pub fn progress_pct(&self) -> f64 {
        if self.state != CalibrationState::Running && self.state != CalibrationState::Completed {
            return 0.0;
        }
        let range = self.start_battery_pct - CALIBRATION_END_PCT;
        if range <= 0.0 {
            return 0.0;
        }
        let used = self.start_battery_pct - self.current_battery_pct;
        (used / range * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_start_boundary_is_exactly_100() {
        let session = CalibrationSession::new();
        assert!(!session.can_start(99.9).allowed);
        assert!(session.can_start(100.0).allowed);
        assert!(!session.can_start(0.0).allowed);
    }

    #[test]
    fn can_start_refuses_while_active() {
        let mut session = CalibrationSession::new();
        session.handle(CalibrationEvent::StartRequested, 100.0);
        assert!(!session.can_start(100.0).allowed);
    }

    #[test]
    fn happy_path_runs_to_completion() {
        let mut session = CalibrationSession::new();
        session.handle(CalibrationEvent::StartRequested, 100.0);
        assert_eq!(session.state(), CalibrationState::Checking);
        session.handle(CalibrationEvent::DeviceAccepted, 100.0);
        assert_eq!(session.state(), CalibrationState::Running);

        session.update_battery(75.0);
        assert!((session.progress_pct() - 100.0 / 3.0).abs() < 0.5);
        session.update_battery(50.0);
        assert!((session.progress_pct() - 200.0 / 3.0).abs() < 0.5);
        session.update_battery(25.0);
        assert_eq!(session.state(), CalibrationState::Completed);
        assert_eq!(session.progress_pct(), 100.0);
    }

    #[test]
    fn abort_from_running() {
        let mut session = CalibrationSession::new();
        session.handle(CalibrationEvent::StartRequested, 100.0);
        session.handle(CalibrationEvent::DeviceAccepted, 100.0);
        session.handle(CalibrationEvent::AbortRequested, 80.0);
        assert_eq!(session.state(), CalibrationState::Aborted);
    }

    #[test]
    fn rejection_fails_with_reason() {
        let mut session = CalibrationSession::new();
        session.handle(CalibrationEvent::StartRequested, 100.0);
        session.handle(
            CalibrationEvent::DeviceRejected("NO".to_string()),
            100.0,
        );
        assert_eq!(session.state(), CalibrationState::Failed);
        assert_eq!(session.error, "NO");
    }

    #[test]
    fn terminal_states_require_acknowledgment() {
        let mut session = CalibrationSession::new();
        session.handle(CalibrationEvent::StartRequested, 100.0);
        session.handle(CalibrationEvent::DeviceAccepted, 100.0);
        session.handle(CalibrationEvent::AbortRequested, 60.0);

        // A new start cannot begin from a terminal state.
        session.handle(CalibrationEvent::StartRequested, 100.0);
        assert_eq!(session.state(), CalibrationState::Aborted);

        session.handle(CalibrationEvent::Acknowledged, 60.0);
        assert_eq!(session.state(), CalibrationState::Idle);
    }

    #[test]
    fn transition_is_total() {
        use CalibrationEvent::*;
        use CalibrationState::*;
        let states = [Idle, Checking, Running, Completed, Aborted, Failed];
        let events = [
            StartRequested,
            DeviceAccepted,
            DeviceRejected(String::new()),
            CompletionDetected,
            AbortRequested,
            TransportFailed(String::new()),
            Acknowledged,
        ];
        for state in states {
            for event in &events {
                // Must never panic, and only defined transitions move.
                let _ = transition(state, event);
            }
        }
        assert_eq!(transition(Idle, &Acknowledged), Idle);
        assert_eq!(transition(Running, &StartRequested), Running);
    }

    #[test]
    fn constant_warning_is_advisory() {
        let mut session = CalibrationSession::new();
        session.set_pre_cal_constant("085", Some("100"));
        let check = session.can_start(100.0);
        assert!(check.allowed);
        assert!(check.constant_warning.is_some());

        session.set_pre_cal_constant("100", Some("100"));
        assert!(session.can_start(100.0).constant_warning.is_none());
    }

    #[test]
    fn progress_is_clamped() {
        let mut session = CalibrationSession::new();
        session.handle(CalibrationEvent::StartRequested, 100.0);
        session.handle(CalibrationEvent::DeviceAccepted, 100.0);
        session.update_battery(101.0);
        assert_eq!(session.progress_pct(), 0.0);
        session.update_battery(10.0);
        assert_eq!(session.progress_pct(), 100.0);
    }
}
