//! UPS-Link protocol engine.
//!
//! Executes one command exchange at a time against the transport and is the
//! only module that speaks wire bytes. Asynchronous alert characters can
//! arrive at any point, including inside a response; the engine classifies
//! them as they are read and records them in the session's [`AlertLog`]
//! in arrival order, so an alert observed before a response byte is logged
//! before that response reaches the caller.
//!
//! Smart Mode entry (`Y` answered by `SM`) must precede everything else;
//! the engine refuses other commands with [`UpsError::NotInSmartMode`]
//! until entry succeeds. Timed-double commands (shutdown class) are also
//! owned here: the two identical bytes must be separated by more than
//! 1.5 s, and the engine enforces the gap itself instead of trusting the
//! caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::commands::{self, Category, CommandDef, ResponseShape};
use crate::constants::{
    READ_RETRY_LIMIT, READ_TIMEOUT, RESPONSE_TERMINATOR, SMART_MODE_CMD, SMART_MODE_RESPONSE,
    TIMED_CMD_DELAY, TIMED_CMD_MIN_GAP,
};
use crate::error::{Result, UpsError};
use crate::events::{Alert, AlertLog};
use crate::transport::{Clock, Transport};

/// In-flight timed-double command: the first byte has been sent, the
/// second may only follow after the mandatory gap.
pub struct TimedHandle {
    code: char,
    first_sent: Instant,
}

/// Protocol engine for one connected session.
///
/// The transport lives behind a mutex that is held for the duration of a
/// full command exchange (or an entire edit/PROG sequence via
/// [`ProtocolEngine::session`]), which is what guarantees that request and
/// response framing never interleave across threads.
pub struct ProtocolEngine {
    transport: Mutex<Box<dyn Transport>>,
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertLog>,
    smart_mode: AtomicBool,
    read_timeout: Duration,
}

impl ProtocolEngine {
    pub fn new(transport: Box<dyn Transport>, clock: Arc<dyn Clock>, alerts: Arc<AlertLog>) -> Self {
        ProtocolEngine {
            transport: Mutex::new(transport),
            clock,
            alerts,
            smart_mode: AtomicBool::new(false),
            read_timeout: READ_TIMEOUT,
        }
    }

    /// Acquire exclusive transport access for one exchange or one
    /// multi-step sequence. Poll cadences and write operations all come
    /// through here; the lock is released when the guard drops.
    pub fn session(&self) -> Exchange<'_> {
        Exchange {
            transport: self.transport.lock().unwrap(),
            clock: self.clock.as_ref(),
            alerts: self.alerts.as_ref(),
            read_timeout: self.read_timeout,
        }
    }

    /// Send `Y` and require the `SM` acknowledgment. Must be the first
    /// exchange of a session.
    pub fn enter_smart_mode(&self) -> Result<()> {
        let mut ex = self.session();
        ex.flush_input()?;
        ex.write(&[SMART_MODE_CMD])?;
        let response = ex.read_terminated('Y')?;
        if response != SMART_MODE_RESPONSE {
            return Err(UpsError::UnexpectedResponse {
                command: 'Y',
                expected: SMART_MODE_RESPONSE.to_string(),
                actual: response,
            });
        }
        drop(ex);
        self.smart_mode.store(true, Ordering::SeqCst);
        log::info!("Entered Smart Mode");
        Ok(())
    }

    /// Mark the session as no longer in Smart Mode (after a normal-mode
    /// `R`, or when tearing the session down).
    pub fn leave_smart_mode(&self) {
        self.smart_mode.store(false, Ordering::SeqCst);
    }

    pub fn is_smart_mode(&self) -> bool {
        self.smart_mode.load(Ordering::SeqCst)
    }

    fn require_smart_mode(&self, command: char) -> Result<()> {
        if self.is_smart_mode() {
            Ok(())
        } else {
            Err(UpsError::NotInSmartMode { command })
        }
    }

    /// Execute one command exchange and return the raw response string.
    pub fn execute(&self, def: &CommandDef) -> Result<String> {
        if def.code != 'Y' {
            self.require_smart_mode(def.code)?;
        }
        let mut ex = self.session();
        ex.command(def)
    }

    /// Execute a command looked up by its normal-mode character.
    pub fn execute_char(&self, code: char) -> Result<String> {
        self.execute(commands::normal_command(code)?)
    }

    /// Execute with bounded retry on read timeout. Only timeouts are
    /// retried; an unexpected response may mean the stream is
    /// desynchronized and is surfaced immediately.
    pub fn execute_with_retry(&self, def: &CommandDef) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute(def) {
                Err(UpsError::Timeout { command }) if attempt < READ_RETRY_LIMIT => {
                    log::debug!("Timeout on {command:?}, retrying ({attempt}/{READ_RETRY_LIMIT})");
                }
                other => return other,
            }
        }
    }

    /// Send the first byte of a timed-double command.
    pub fn begin_timed(&self, def: &CommandDef) -> Result<TimedHandle> {
        if def.category != Category::TimedDouble {
            return Err(UpsError::Parse(format!(
                "{:?} is not a timed-double command",
                def.code
            )));
        }
        self.require_smart_mode(def.code)?;
        let mut ex = self.session();
        ex.flush_input()?;
        ex.write(&[def.code as u8])?;
        Ok(TimedHandle {
            code: def.code,
            first_sent: self.clock.now(),
        })
    }

    /// Send the second byte of a timed-double command and read the reply.
    /// Fails with [`UpsError::TimingViolation`] without touching the wire
    /// if the mandatory gap has not yet elapsed.
    pub fn confirm_timed(&self, handle: &TimedHandle) -> Result<String> {
        let elapsed = self.clock.now().saturating_duration_since(handle.first_sent);
        if elapsed < TIMED_CMD_MIN_GAP {
            return Err(UpsError::TimingViolation {
                command: handle.code,
                elapsed_ms: elapsed.as_millis() as u64,
                required_ms: TIMED_CMD_MIN_GAP.as_millis() as u64,
            });
        }
        let mut ex = self.session();
        ex.write(&[handle.code as u8])?;
        ex.read_terminated(handle.code)
    }

    /// Full timed-double exchange: first byte, enforced gap, second byte.
    pub fn send_timed(&self, def: &CommandDef) -> Result<String> {
        let handle = self.begin_timed(def)?;
        self.clock.sleep(TIMED_CMD_DELAY);
        self.confirm_timed(&handle)
    }

    pub fn alerts(&self) -> &Arc<AlertLog> {
        &self.alerts
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Exclusive transport access for the duration of one exchange or one
/// multi-step write sequence.
pub struct Exchange<'a> {
    transport: MutexGuard<'a, Box<dyn Transport>>,
    clock: &'a dyn Clock,
    alerts: &'a AlertLog,
    read_timeout: Duration,
}

impl Exchange<'_> {
    pub fn flush_input(&mut self) -> Result<()> {
        self.transport.flush_input()
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.transport.write(data)
    }

    /// Write a command character, flushing stale input first, and read its
    /// `\r\n`-terminated response.
    pub fn command_char(&mut self, code: char) -> Result<String> {
        self.flush_input()?;
        self.write(&[code as u8])?;
        self.read_terminated(code)
    }

    /// Full exchange for a catalog command.
    pub fn command(&mut self, def: &CommandDef) -> Result<String> {
        self.flush_input()?;
        self.write(&[def.code as u8])?;
        match def.shape {
            ResponseShape::Terminated => self.read_terminated(def.code),
            ResponseShape::Fixed(len) => self.read_fixed(def.code, len),
        }
    }

    /// Read until the response terminator, demultiplexing alert bytes as
    /// they are encountered. Alerts are recorded immediately and never
    /// buffered into the response.
    pub fn read_terminated(&mut self, command: char) -> Result<String> {
        let deadline = self.clock.now() + self.read_timeout;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let byte = self.next_byte(command, deadline)?;
            buf.push(byte);
            if buf.ends_with(RESPONSE_TERMINATOR) {
                buf.truncate(buf.len() - RESPONSE_TERMINATOR.len());
                // Not trimmed: trailing space is significant in edit-cycle
                // values such as the "ON " self-test interval.
                return Ok(String::from_utf8_lossy(&buf).to_string());
            }
        }
    }

    /// Read a fixed-length unterminated reply, with the same alert
    /// demultiplexing as [`Exchange::read_terminated`].
    pub fn read_fixed(&mut self, command: char, len: usize) -> Result<String> {
        let deadline = self.clock.now() + self.read_timeout;
        let mut buf: Vec<u8> = Vec::new();
        while buf.len() < len {
            buf.push(self.next_byte(command, deadline)?);
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    fn next_byte(&mut self, command: char, deadline: Instant) -> Result<u8> {
        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Err(UpsError::Timeout { command });
            }
            match self.transport.read_byte(remaining)? {
                None => return Err(UpsError::Timeout { command }),
                Some(byte) => {
                    if let Some(alert) = Alert::from_byte(byte) {
                        self.alerts.record(alert);
                        continue;
                    }
                    return Ok(byte);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::normal_command;
    use crate::mock::{ManualClock, MockUps};

    fn engine_with(mock: MockUps) -> (Arc<ProtocolEngine>, Arc<ManualClock>, Arc<AlertLog>) {
        let clock = Arc::new(ManualClock::new());
        let alerts = Arc::new(AlertLog::new());
        let engine = Arc::new(ProtocolEngine::new(
            Box::new(mock),
            clock.clone(),
            alerts.clone(),
        ));
        (engine, clock, alerts)
    }

    fn connected_engine(mock: MockUps) -> (Arc<ProtocolEngine>, Arc<ManualClock>, Arc<AlertLog>) {
        let (engine, clock, alerts) = engine_with(mock);
        engine.enter_smart_mode().unwrap();
        (engine, clock, alerts)
    }

    #[test]
    fn smart_mode_entry_succeeds() {
        let (engine, _, _) = engine_with(MockUps::new());
        engine.enter_smart_mode().unwrap();
        assert!(engine.is_smart_mode());
    }

    #[test]
    fn smart_mode_entry_rejects_wrong_reply() {
        let mut mock = MockUps::new();
        mock.set_response('Y', "NOPE");
        let (engine, _, _) = engine_with(mock);
        match engine.enter_smart_mode() {
            Err(UpsError::UnexpectedResponse { actual, .. }) => assert_eq!(actual, "NOPE"),
            other => panic!("expected UnexpectedResponse, got {other:?}"),
        }
        assert!(!engine.is_smart_mode());
    }

    #[test]
    fn commands_before_smart_mode_are_refused() {
        let (engine, _, _) = engine_with(MockUps::new());
        match engine.execute_char('f') {
            Err(UpsError::NotInSmartMode { command }) => assert_eq!(command, 'f'),
            other => panic!("expected NotInSmartMode, got {other:?}"),
        }
    }

    #[test]
    fn inquiry_round_trip() {
        let (engine, _, _) = connected_engine(MockUps::new());
        assert_eq!(engine.execute_char('f').unwrap(), "100.0");
        assert_eq!(engine.execute_char('Q').unwrap(), "08");
        assert_eq!(engine.execute_char('\x01').unwrap(), "Smart-UPS 2200 XL");
    }

    #[test]
    fn alert_before_response_is_demultiplexed() {
        let mut mock = MockUps::new();
        mock.queue_alert(Alert::LineFail);
        let (engine, _, alerts) = engine_with(mock);

        // The alert byte sits between the command write and the response.
        let mut ex = engine.session();
        let response = ex.command_char('f').unwrap();
        assert_eq!(response, "100.0");
        let events = alerts.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert, Alert::LineFail);
    }

    #[test]
    fn alert_inside_response_never_reaches_the_caller() {
        let mut mock = MockUps::new();
        mock.queue_alert_mid_response(Alert::LowBattery);
        let (engine, _, alerts) = engine_with(mock);

        let mut ex = engine.session();
        let response = ex.command_char('B').unwrap();
        assert_eq!(response, "055.35");
        assert!(!response.contains('%'));
        assert_eq!(alerts.events()[0].alert, Alert::LowBattery);
    }

    #[test]
    fn timeout_when_device_stays_silent() {
        let mut mock = MockUps::new();
        mock.set_silent_for('f');
        let (engine, _, _) = engine_with(mock);
        let mut ex = engine.session();
        match ex.command_char('f') {
            Err(UpsError::Timeout { command }) => assert_eq!(command, 'f'),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn timed_double_enforces_its_own_gap() {
        let (engine, clock, _) = connected_engine(MockUps::new());
        let def = normal_command('K').unwrap();

        let response = engine.send_timed(def).unwrap();
        assert_eq!(response, "OK");
        assert!(clock
            .sleeps()
            .contains(&crate::constants::TIMED_CMD_DELAY));
    }

    #[test]
    fn early_second_byte_is_a_timing_violation() {
        let (engine, _, _) = connected_engine(MockUps::new());
        let def = normal_command('Z').unwrap();

        let handle = engine.begin_timed(def).unwrap();
        // No clock advance: the second byte comes too soon.
        match engine.confirm_timed(&handle) {
            Err(UpsError::TimingViolation {
                command,
                required_ms,
                ..
            }) => {
                assert_eq!(command, 'Z');
                assert_eq!(required_ms, 1500);
            }
            other => panic!("expected TimingViolation, got {other:?}"),
        }
    }

    #[test]
    fn fixed_length_replies_are_supported() {
        let mut mock = MockUps::new();
        mock.push_raw(b"FF");
        let (engine, _, _) = engine_with(mock);
        let mut ex = engine.session();
        ex.write(b"9").unwrap();
        assert_eq!(ex.read_fixed('9', 2).unwrap(), "FF");
    }

    #[test]
    fn retry_is_bounded_and_surfaces_timeout() {
        let mut mock = MockUps::new();
        mock.set_silent_for('f');
        let (engine, _, _) = connected_engine(mock);
        let def = normal_command('f').unwrap();
        match engine.execute_with_retry(def) {
            Err(UpsError::Timeout { command }) => assert_eq!(command, 'f'),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
