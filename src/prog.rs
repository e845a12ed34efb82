//! PROG-mode controller.
//!
//! PROG is the undocumented service sub-protocol used to fine-tune the
//! voltage calibration constants in EEPROM. Entry is a strict handshake:
//! `1`, a wait of exactly 4 seconds, `1` again, then the literal `PROG`
//! reply. While the mode is active the same characters the normal
//! protocol uses mean different things (`R` saves to EEPROM instead of
//! exiting Smart Mode); that separation lives in this controller's state,
//! not in the command catalog.
//!
//! PROG mode is mutually exclusive with normal polling; the manager keeps
//! the cadences suspended from entry until a confirmed exit.

use std::sync::Arc;
use std::time::Instant;

use crate::constants::{PROG_EXIT_CMD, PROG_MODE_CMD, PROG_MODE_DELAY, PROG_MODE_RESPONSE};
use crate::error::{Result, UpsError};
use crate::protocol::ProtocolEngine;

/// PROG controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgState {
    /// Normal operation
    Out,
    /// First `1` sent, waiting out the 4 second gap
    Entering,
    /// Handshake confirmed, nudge/save/read available
    In,
    /// Escape sent, waiting for the device to drop out
    Exiting,
}

/// The measurement a nudge applies to while in PROG mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgMeasurement {
    /// `L`
    LineVoltage,
    /// `O`
    OutputVoltage,
    /// `B`
    BatteryVoltage,
}

impl ProgMeasurement {
    pub fn code(self) -> char {
        match self {
            ProgMeasurement::LineVoltage => 'L',
            ProgMeasurement::OutputVoltage => 'O',
            ProgMeasurement::BatteryVoltage => 'B',
        }
    }
}

/// Direction of a calibration nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    Up,
    Down,
}

impl Nudge {
    fn byte(self) -> u8 {
        match self {
            Nudge::Up => b'+',
            Nudge::Down => b'-',
        }
    }
}

/// Drives the PROG handshake and the in-mode operations.
pub struct ProgController {
    engine: Arc<ProtocolEngine>,
    state: ProgState,
    entry_started: Option<Instant>,
}

impl ProgController {
    pub fn new(engine: Arc<ProtocolEngine>) -> Self {
        ProgController {
            engine,
            state: ProgState::Out,
            entry_started: None,
        }
    }

    pub fn state(&self) -> ProgState {
        self.state
    }

    /// Send the first `1` and start the entry gap.
    pub fn begin_entry(&mut self) -> Result<()> {
        if self.state != ProgState::Out {
            return Err(UpsError::HandshakeFailed {
                actual: format!("entry attempted from {:?}", self.state),
            });
        }
        let mut ex = self.engine.session();
        ex.flush_input()?;
        ex.write(&[PROG_MODE_CMD])?;
        self.entry_started = Some(self.engine.clock().now());
        self.state = ProgState::Entering;
        Ok(())
    }

    /// Send the second `1` and require the `PROG` reply. Refuses to touch
    /// the wire before the 4 second gap has elapsed; a violation leaves
    /// the handshake pending so the caller can wait and retry.
    pub fn complete_entry(&mut self) -> Result<()> {
        if self.state != ProgState::Entering {
            return Err(UpsError::HandshakeFailed {
                actual: format!("completion attempted from {:?}", self.state),
            });
        }
        let started = self.entry_started.expect("Entering implies a start time");
        let elapsed = self.engine.clock().now().saturating_duration_since(started);
        if elapsed < PROG_MODE_DELAY {
            return Err(UpsError::TimingViolation {
                command: '1',
                elapsed_ms: elapsed.as_millis() as u64,
                required_ms: PROG_MODE_DELAY.as_millis() as u64,
            });
        }

        let mut ex = self.engine.session();
        ex.write(&[PROG_MODE_CMD])?;
        match ex.read_terminated('1') {
            Ok(response) if response == PROG_MODE_RESPONSE => {
                drop(ex);
                self.state = ProgState::In;
                self.entry_started = None;
                log::info!("Entered PROG mode");
                Ok(())
            }
            Ok(response) => {
                drop(ex);
                self.state = ProgState::Out;
                self.entry_started = None;
                Err(UpsError::HandshakeFailed { actual: response })
            }
            Err(UpsError::Timeout { .. }) => {
                drop(ex);
                self.state = ProgState::Out;
                self.entry_started = None;
                Err(UpsError::HandshakeFailed {
                    actual: "no response".to_string(),
                })
            }
            Err(e) => {
                self.state = ProgState::Out;
                self.entry_started = None;
                Err(e)
            }
        }
    }

    /// Full entry handshake: first byte, 4 second wait, second byte.
    pub fn enter(&mut self) -> Result<()> {
        self.begin_entry()?;
        self.engine.clock().sleep(PROG_MODE_DELAY);
        self.complete_entry()
    }

    fn require_in(&self) -> Result<()> {
        if self.state == ProgState::In {
            Ok(())
        } else {
            Err(UpsError::NotInProgMode)
        }
    }

    /// Read the current value of a measurement without adjusting it.
    pub fn read(&mut self, measurement: ProgMeasurement) -> Result<String> {
        self.require_in()?;
        let mut ex = self.engine.session();
        ex.command_char(measurement.code())
    }

    /// Nudge the selected calibration value and return the device's fresh
    /// reading.
    pub fn nudge(&mut self, direction: Nudge) -> Result<String> {
        self.require_in()?;
        let mut ex = self.engine.session();
        ex.flush_input()?;
        ex.write(&[direction.byte()])?;
        ex.read_terminated(direction.byte() as char)
    }

    /// Save the adjusted value to EEPROM. `R` here is the PROG-mode save,
    /// not the normal-mode exit; the controller state is what guarantees
    /// the device interprets it that way.
    pub fn save(&mut self) -> Result<String> {
        self.require_in()?;
        let mut ex = self.engine.session();
        ex.flush_input()?;
        ex.write(&[b'R'])?;
        let response = ex.read_terminated('R')?;
        log::info!("PROG calibration saved to EEPROM");
        Ok(response)
    }

    /// Leave PROG mode. Unsaved nudges are discarded by the device itself;
    /// no attempt is made to undo them. A silent device still counts as
    /// exited, since the escape is fire-and-forget.
    pub fn exit(&mut self) -> Result<()> {
        if self.state != ProgState::In && self.state != ProgState::Entering {
            return Err(UpsError::NotInProgMode);
        }
        self.state = ProgState::Exiting;
        let mut ex = self.engine.session();
        ex.flush_input()?;
        ex.write(&[PROG_EXIT_CMD])?;
        match ex.read_terminated('\x1b') {
            Ok(_) | Err(UpsError::Timeout { .. }) => {}
            Err(e) => {
                drop(ex);
                self.state = ProgState::Out;
                return Err(e);
            }
        }
        drop(ex);
        self.state = ProgState::Out;
        self.entry_started = None;
        log::info!("Exited PROG mode");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AlertLog;
    use crate::mock::{ManualClock, MockUps};

    fn controller(mock: MockUps) -> (ProgController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let alerts = Arc::new(AlertLog::new());
        let engine = Arc::new(ProtocolEngine::new(
            Box::new(mock),
            clock.clone(),
            alerts,
        ));
        engine.enter_smart_mode().unwrap();
        (ProgController::new(engine), clock)
    }

    #[test]
    fn entry_sends_two_bytes_with_the_full_gap() {
        let mock = MockUps::new();
        let written = mock.written_handle();
        let (mut prog, clock) = controller(mock);
        prog.enter().unwrap();
        assert_eq!(prog.state(), ProgState::In);
        assert!(clock.sleeps().contains(&PROG_MODE_DELAY));

        let ones: Vec<u8> = written
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|b| *b == b'1')
            .collect();
        assert_eq!(ones, vec![b'1', b'1']);
    }

    #[test]
    fn early_second_byte_is_a_timing_violation_not_a_handshake() {
        let mock = MockUps::new();
        let written = mock.written_handle();
        let (mut prog, _clock) = controller(mock);
        prog.begin_entry().unwrap();
        match prog.complete_entry() {
            Err(UpsError::TimingViolation { required_ms, .. }) => {
                assert_eq!(required_ms, 4000)
            }
            other => panic!("expected TimingViolation, got {other:?}"),
        }
        // Still pending: only one byte has gone out.
        assert_eq!(prog.state(), ProgState::Entering);
        let ones = written
            .lock()
            .unwrap()
            .iter()
            .filter(|b| **b == b'1')
            .count();
        assert_eq!(ones, 1);
    }

    #[test]
    fn wrong_reply_fails_the_handshake_and_stays_out() {
        let mut mock = MockUps::new();
        mock.set_prog_response("NA");
        let (mut prog, _clock) = controller(mock);
        match prog.enter() {
            Err(UpsError::HandshakeFailed { actual }) => assert_eq!(actual, "NA"),
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
        assert_eq!(prog.state(), ProgState::Out);
    }

    #[test]
    fn nudge_save_and_exit() {
        let (mut prog, _clock) = controller(MockUps::new());
        prog.enter().unwrap();

        assert_eq!(prog.nudge(Nudge::Up).unwrap(), "222.5");
        assert_eq!(prog.nudge(Nudge::Down).unwrap(), "222.4");
        assert_eq!(prog.save().unwrap(), "OK");
        prog.exit().unwrap();
        assert_eq!(prog.state(), ProgState::Out);
    }

    #[test]
    fn in_mode_operations_require_in_state() {
        let (mut prog, _clock) = controller(MockUps::new());
        assert!(matches!(
            prog.nudge(Nudge::Up),
            Err(UpsError::NotInProgMode)
        ));
        assert!(matches!(prog.save(), Err(UpsError::NotInProgMode)));
        assert!(matches!(
            prog.read(ProgMeasurement::LineVoltage),
            Err(UpsError::NotInProgMode)
        ));
        assert!(matches!(prog.exit(), Err(UpsError::NotInProgMode)));
    }

    #[test]
    fn reads_pass_through_while_in_prog() {
        let (mut prog, _clock) = controller(MockUps::new());
        prog.enter().unwrap();
        assert_eq!(prog.read(ProgMeasurement::LineVoltage).unwrap(), "222.4");
    }
}
