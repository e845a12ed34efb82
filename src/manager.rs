//! High-level UPS session orchestrator.
//!
//! [`UpsManager`] owns the connection lifecycle: it opens the transport,
//! enters Smart Mode, starts the poll cadences and exposes every
//! operation the UI layer consumes, pausing the cadences around each
//! write sequence. There is no global state; everything lives in this
//! session object.

use std::sync::{Arc, Mutex};

use crate::calibration::{CalibrationEvent, CalibrationSession, StartCheck};
use crate::commands::{self, parse_numeric, ParsedValue, REGISTER_CMDS, SETTING_CMDS};
use crate::constants::{FACTORY_RESET_RESPONSE, SIMPLE_MODE_RESPONSE};
use crate::edit;
use crate::error::{Result, UpsError};
use crate::events::{AlertEvent, AlertLog};
use crate::poller::{PollPause, PollerPool};
use crate::prog::{Nudge, ProgController, ProgMeasurement, ProgState};
use crate::protocol::ProtocolEngine;
use crate::settings::{find_setting, EditableSetting, SETTINGS};
use crate::state::{PollTier, SharedState, UpsState};
use crate::transport::{Clock, SerialTransport, SystemClock, Transport};

/// Outcome of the bypass toggle (`^`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassTransition {
    /// Device answered `BYP`: transferring to bypass
    ToBypass,
    /// Device answered `INV`: transferring back to the inverter
    ToNormal,
}

/// High-level orchestrator for one UPS session.
pub struct UpsManager {
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertLog>,
    state: SharedState,
    calibration: Arc<Mutex<CalibrationSession>>,
    engine: Option<Arc<ProtocolEngine>>,
    pollers: Option<PollerPool>,
    prog: Option<ProgController>,
    prog_pause: Option<PollPause>,
    factory_constant_0: Option<String>,
}

impl UpsManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Construct with an explicit clock; tests drive the protocol's
    /// multi-second waits through a manual clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        UpsManager {
            clock,
            alerts: Arc::new(AlertLog::new()),
            state: SharedState::new(),
            calibration: Arc::new(Mutex::new(CalibrationSession::new())),
            engine: None,
            pollers: None,
            prog: None,
            prog_pause: None,
            factory_constant_0: None,
        }
    }

    /// List serial ports available on this machine.
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        SerialTransport::list_ports()
    }

    /// Open the named serial port, enter Smart Mode and start polling.
    pub fn connect(&mut self, port: &str) -> Result<()> {
        let transport = SerialTransport::open(port)?;
        self.connect_with(Box::new(transport), port)
    }

    /// Connect over an already-built transport (a mock, typically).
    pub fn connect_with(&mut self, transport: Box<dyn Transport>, port: &str) -> Result<()> {
        if self.engine.is_some() {
            self.disconnect();
        }

        let engine = Arc::new(ProtocolEngine::new(
            transport,
            self.clock.clone(),
            self.alerts.clone(),
        ));
        engine.enter_smart_mode()?;

        self.state.update(|s| {
            s.connected = true;
            s.port = port.to_string();
            s.smart_mode = true;
        });

        self.pollers = Some(PollerPool::start(
            engine.clone(),
            self.state.clone(),
            self.calibration.clone(),
        ));
        self.prog = Some(ProgController::new(engine.clone()));
        self.engine = Some(engine);
        log::info!("Connected to UPS on {port}");
        Ok(())
    }

    /// Stop polling, close the port and clear the session state.
    /// Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        // Mark disconnected first so readers see the session going away
        // before the transport does.
        self.state.update(|s| {
            s.connected = false;
            s.smart_mode = false;
        });

        if let Some(mut prog) = self.prog.take() {
            if prog.state() != ProgState::Out {
                if let Err(e) = prog.exit() {
                    log::warn!("PROG exit during disconnect failed: {e}");
                }
            }
        }
        self.prog_pause = None;

        if let Some(pollers) = self.pollers.take() {
            pollers.stop();
        }
        // Dropping the engine drops the transport, which closes the port.
        self.engine = None;

        *self.calibration.lock().unwrap() = CalibrationSession::new();
        self.state.update(|s| s.reset());
        log::info!("Disconnected from UPS");
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_some()
    }

    /// Copy of the current UPS state.
    pub fn snapshot(&self) -> UpsState {
        self.state.snapshot()
    }

    /// The session's append-only alert log.
    pub fn alerts(&self) -> &Arc<AlertLog> {
        &self.alerts
    }

    /// Receive alert events over a channel as they arrive.
    pub fn subscribe_alerts(&self) -> std::sync::mpsc::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    /// The editable-setting catalog, for building pick lists.
    pub fn settings() -> &'static [EditableSetting] {
        SETTINGS
    }

    fn engine(&self) -> Result<&Arc<ProtocolEngine>> {
        self.engine.as_ref().ok_or(UpsError::NotConnected)
    }

    fn require_normal_mode(&self) -> Result<()> {
        match &self.prog {
            Some(prog) if prog.state() != ProgState::Out => Err(UpsError::ProgModeActive),
            _ => Ok(()),
        }
    }

    fn pause_polling(&self) -> Option<PollPause> {
        self.pollers.as_ref().map(|p| p.pause())
    }

    fn read_group(&self, cmds: &[char], tier: PollTier) -> Result<()> {
        let engine = self.engine()?;
        for &code in cmds {
            let response = engine.execute_with_retry(commands::normal_command(code)?)?;
            self.state.apply(code, &response, tier);
        }
        Ok(())
    }

    /// Ad-hoc inquiry for any catalog command, including those without a
    /// dedicated state field (Matrix-only load current, the EEPROM dump).
    /// The response is folded into the state where a field exists.
    pub fn inquire(&mut self, code: char) -> Result<ParsedValue> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let def = commands::normal_command(code)?;
        let response = engine.execute_with_retry(def)?;
        self.state.apply(code, &response, PollTier::Manual);
        Ok(def.kind.parse(&response))
    }

    // --- Setting changes ---

    /// Change an editable setting to `target`, verifying the stored value.
    /// Returns the value the device reports after the edit.
    pub fn change_setting(&mut self, key: &str, target: &str) -> Result<String> {
        let setting = find_setting(key).ok_or_else(|| UpsError::UnknownSetting(key.to_string()))?;
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let stored = edit::change_setting(&engine, setting, target)?;
        self.state.apply(setting.code, &stored, PollTier::Manual);
        Ok(stored)
    }

    // --- Action commands ---

    fn action(&mut self, code: char, accept: &[&str]) -> Result<String> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let response = engine.execute_char(code)?;
        if accept.contains(&response.as_str()) {
            Ok(response)
        } else {
            Err(UpsError::WriteRejected { response })
        }
    }

    /// Run a battery self-test (`W`). The result arrives later via the
    /// `X` inquiry.
    pub fn run_self_test(&mut self) -> Result<()> {
        self.action('W', &["OK"])?;
        log::info!("Self-test initiated");
        Ok(())
    }

    /// Illuminate the LEDs and sound the beeper for a couple of seconds.
    pub fn test_lights_and_alarm(&mut self) -> Result<()> {
        self.action('A', &["OK"])?;
        Ok(())
    }

    /// Briefly transfer to battery (`U`).
    pub fn simulate_power_failure(&mut self) -> Result<()> {
        self.action('U', &["OK"])?;
        log::info!("Power failure simulation started");
        Ok(())
    }

    /// Toggle bypass mode (`^`).
    pub fn toggle_bypass(&mut self) -> Result<BypassTransition> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let response = engine.execute_char('^')?;
        match response.as_str() {
            "BYP" => Ok(BypassTransition::ToBypass),
            "INV" => Ok(BypassTransition::ToNormal),
            _ => Err(UpsError::WriteRejected { response }),
        }
    }

    /// Shut down on battery (`S`); the UPS restarts when line power
    /// returns.
    pub fn shutdown_on_battery(&mut self) -> Result<()> {
        self.action('S', &["OK"])?;
        log::warn!("Shutdown on battery initiated");
        Ok(())
    }

    fn timed_action(&mut self, code: char) -> Result<String> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        engine.send_timed(commands::normal_command(code)?)
    }

    /// `K` pair: turn the UPS off after the configured shutdown delay.
    pub fn turn_off_after_delay(&mut self) -> Result<()> {
        let response = self.timed_action('K')?;
        if response == "OK" {
            log::warn!("Turn off after delay initiated");
            Ok(())
        } else {
            Err(UpsError::WriteRejected { response })
        }
    }

    /// `Z` pair: turn the UPS off immediately.
    pub fn turn_off_immediate(&mut self) -> Result<()> {
        let response = self.timed_action('Z')?;
        if response == "OK" {
            log::warn!("Immediate turn off initiated");
            Ok(())
        } else {
            Err(UpsError::WriteRejected { response })
        }
    }

    /// Ctrl+N pair: turn the UPS on.
    pub fn turn_on(&mut self) -> Result<()> {
        let response = self.timed_action('\x0e')?;
        if response == "OK" {
            Ok(())
        } else {
            Err(UpsError::WriteRejected { response })
        }
    }

    /// `@ddd`: shut down, then wake after `tenths_of_hour` tenths of an
    /// hour.
    pub fn shutdown_with_wake(&mut self, tenths_of_hour: u16) -> Result<()> {
        if tenths_of_hour > 999 {
            return Err(UpsError::InvalidValue {
                setting: "wake delay".to_string(),
                value: tenths_of_hour.to_string(),
            });
        }
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let mut ex = engine.session();
        ex.flush_input()?;
        ex.write(format!("@{tenths_of_hour:03}").as_bytes())?;
        let response = ex.read_terminated('@')?;
        if response == "OK" {
            log::warn!("Shutdown with wake after {tenths_of_hour} tenths of an hour");
            Ok(())
        } else {
            Err(UpsError::WriteRejected { response })
        }
    }

    /// DEL: abort a pending shutdown. Some firmware revisions stay
    /// silent, so a timeout is treated as sent.
    pub fn abort_shutdown(&mut self) -> Result<Option<String>> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let mut ex = engine.session();
        ex.flush_input()?;
        ex.write(&[0x7f])?;
        match ex.read_terminated('\x7f') {
            Ok(response) => Ok(Some(response)),
            Err(UpsError::Timeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `z`: reset every EEPROM variable to factory defaults, then re-read
    /// all settings and registers.
    pub fn factory_reset(&mut self) -> Result<()> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let response = engine.execute_char('z')?;
        if response != FACTORY_RESET_RESPONSE {
            return Err(UpsError::UnexpectedResponse {
                command: 'z',
                expected: FACTORY_RESET_RESPONSE.to_string(),
                actual: response,
            });
        }
        log::warn!("EEPROM reset to factory defaults");
        self.read_group(SETTING_CMDS, PollTier::Manual)?;
        self.read_group(REGISTER_CMDS, PollTier::Manual)?;
        Ok(())
    }

    /// `R` in normal mode: leave Smart Mode. The session stays open but
    /// commands are refused until Smart Mode is re-entered.
    pub fn return_to_simple_mode(&mut self) -> Result<()> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let response = engine.execute_char('R')?;
        if response != SIMPLE_MODE_RESPONSE {
            return Err(UpsError::UnexpectedResponse {
                command: 'R',
                expected: SIMPLE_MODE_RESPONSE.to_string(),
                actual: response,
            });
        }
        engine.leave_smart_mode();
        self.state.update(|s| s.smart_mode = false);
        Ok(())
    }

    /// Force a re-read of the status and fault registers.
    pub fn refresh_registers(&mut self) -> Result<()> {
        self.require_normal_mode()?;
        let _pause = self.pause_polling();
        self.read_group(REGISTER_CMDS, PollTier::Manual)
    }

    /// Force a re-read of every editable setting.
    pub fn refresh_settings(&mut self) -> Result<()> {
        self.require_normal_mode()?;
        let _pause = self.pause_polling();
        self.read_group(SETTING_CMDS, PollTier::Manual)
    }

    // --- Calibration ---

    /// Record the factory default for smart constant 0, enabling the
    /// advisory drift warning in the calibration pre-check.
    pub fn set_factory_constant(&mut self, value: &str) {
        self.factory_constant_0 = Some(value.to_string());
    }

    /// Current calibration session snapshot.
    pub fn calibration(&self) -> CalibrationSession {
        self.calibration.lock().unwrap().clone()
    }

    /// Start a runtime calibration. Returns the pre-check; when it is not
    /// allowed nothing was sent. A device rejection surfaces as
    /// [`UpsError::WriteRejected`] with the session left `Failed`.
    pub fn start_calibration(&mut self) -> Result<StartCheck> {
        self.require_normal_mode()?;
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();

        // Fresh battery reading: the fast cadence may be seconds stale.
        let response = engine.execute_char('f')?;
        self.state.apply('f', &response, PollTier::Manual);
        let battery_pct = parse_numeric(&response)
            .ok_or_else(|| UpsError::Parse(format!("battery inquiry returned {response:?}")))?;

        let snapshot = self.state.snapshot();
        let mut session = self.calibration.lock().unwrap();
        session.set_pre_cal_constant(
            &snapshot.smart_constant_0,
            self.factory_constant_0.as_deref(),
        );
        let check = session.can_start(battery_pct);
        if !check.allowed {
            return Ok(check);
        }

        session.handle(CalibrationEvent::StartRequested, battery_pct);
        match engine.execute_char('D') {
            Ok(response) if response == "OK" => {
                session.handle(CalibrationEvent::DeviceAccepted, battery_pct);
                log::info!("Runtime calibration started at {battery_pct}%");
                Ok(check)
            }
            Ok(response) => {
                session.handle(CalibrationEvent::DeviceRejected(response.clone()), battery_pct);
                Err(UpsError::WriteRejected { response })
            }
            Err(e) => {
                session.handle(CalibrationEvent::TransportFailed(e.to_string()), battery_pct);
                Err(e)
            }
        }
    }

    /// Abort a running calibration by re-issuing `D`. Returns false when
    /// no calibration was active.
    pub fn abort_calibration(&mut self) -> Result<bool> {
        self.require_normal_mode()?;
        if !self.calibration.lock().unwrap().is_active() {
            return Ok(false);
        }
        let engine = self.engine()?.clone();
        let _pause = self.pause_polling();
        let response = engine.execute_char('D')?;
        log::info!("Calibration abort acknowledged with {response:?}");
        let mut session = self.calibration.lock().unwrap();
        let pct = session.current_battery_pct;
        session.handle(CalibrationEvent::AbortRequested, pct);
        Ok(true)
    }

    /// Acknowledge a terminal calibration outcome, returning the session
    /// to idle.
    pub fn acknowledge_calibration(&mut self) {
        let mut session = self.calibration.lock().unwrap();
        let pct = session.current_battery_pct;
        session.handle(CalibrationEvent::Acknowledged, pct);
    }

    // --- PROG mode ---

    /// Enter PROG mode. Polling stays suspended until the mode is exited.
    pub fn enter_prog_mode(&mut self) -> Result<()> {
        self.engine()?;
        if self.calibration.lock().unwrap().is_active() {
            return Err(UpsError::WriteRejected {
                response: "calibration in progress".to_string(),
            });
        }
        let pause = self.pause_polling();
        let prog = self.prog.as_mut().ok_or(UpsError::NotConnected)?;
        match prog.enter() {
            Ok(()) => {
                self.prog_pause = pause;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current PROG controller state.
    pub fn prog_state(&self) -> ProgState {
        self.prog
            .as_ref()
            .map(|p| p.state())
            .unwrap_or(ProgState::Out)
    }

    /// Read a measurement while in PROG mode.
    pub fn prog_read(&mut self, measurement: ProgMeasurement) -> Result<String> {
        self.prog
            .as_mut()
            .ok_or(UpsError::NotConnected)?
            .read(measurement)
    }

    /// Nudge the selected calibration value.
    pub fn prog_nudge(&mut self, direction: Nudge) -> Result<String> {
        self.prog
            .as_mut()
            .ok_or(UpsError::NotConnected)?
            .nudge(direction)
    }

    /// Save the adjusted value to EEPROM.
    pub fn prog_save(&mut self) -> Result<String> {
        self.prog
            .as_mut()
            .ok_or(UpsError::NotConnected)?
            .save()
    }

    /// Exit PROG mode and resume polling.
    pub fn exit_prog_mode(&mut self) -> Result<()> {
        let result = self
            .prog
            .as_mut()
            .ok_or(UpsError::NotConnected)?
            .exit();
        if result.is_ok() {
            // Dropping the pause resumes every cadence.
            self.prog_pause = None;
        }
        result
    }
}

impl Default for UpsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UpsManager {
    fn drop(&mut self) {
        if self.engine.is_some() {
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationState;
    use crate::mock::{ManualClock, MockUps};
    use std::time::Duration;

    fn connected(mock: MockUps) -> UpsManager {
        let mut manager = UpsManager::with_clock(Arc::new(ManualClock::new()));
        manager.connect_with(Box::new(mock), "MOCK").unwrap();
        manager
    }

    fn wait_for_identity(manager: &UpsManager) {
        for _ in 0..100 {
            if !manager.snapshot().model.is_empty() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("one-time poll never filled identity fields");
    }

    #[test]
    fn connect_enters_smart_mode_and_reads_identity() {
        let manager = connected(MockUps::new());
        wait_for_identity(&manager);

        let snapshot = manager.snapshot();
        assert!(snapshot.connected);
        assert!(snapshot.smart_mode);
        assert_eq!(snapshot.model, "Smart-UPS 2200 XL");
        assert_eq!(snapshot.firmware, "MWI");
        assert_eq!(snapshot.ups_id, "UPS_IDEN");
    }

    #[test]
    fn disconnect_clears_the_state() {
        let mut manager = connected(MockUps::new());
        wait_for_identity(&manager);
        manager.disconnect();

        let snapshot = manager.snapshot();
        assert!(!snapshot.connected);
        assert!(snapshot.model.is_empty());
        assert!(!manager.is_connected());
        // Idempotent.
        manager.disconnect();
    }

    #[test]
    fn change_setting_updates_state() {
        let mut manager = connected(MockUps::new());
        wait_for_identity(&manager);

        let stored = manager.change_setting("alarm_control", "L").unwrap();
        assert_eq!(stored, "L");
        assert_eq!(manager.snapshot().alarm_control, "L");
        assert_eq!(
            manager.snapshot().tier_of('k'),
            Some(PollTier::Manual)
        );
    }

    #[test]
    fn rejected_direct_edit_leaves_stored_id_alone() {
        let mut mock = MockUps::new();
        mock.set_refuse_edits(true);
        let mut manager = connected(mock);
        wait_for_identity(&manager);

        let before = manager.snapshot().ups_id;
        let err = manager.change_setting("ups_id", "SERVER01").unwrap_err();
        assert!(matches!(err, UpsError::WriteRejected { .. }));
        assert_eq!(manager.snapshot().ups_id, before);
    }

    #[test]
    fn unknown_setting_is_refused() {
        let mut manager = connected(MockUps::new());
        assert!(matches!(
            manager.change_setting("nonsense", "1"),
            Err(UpsError::UnknownSetting(_))
        ));
    }

    #[test]
    fn calibration_lifecycle_via_the_device() {
        let mut manager = connected(MockUps::new());
        let check = manager.start_calibration().unwrap();
        assert!(check.allowed);
        assert_eq!(manager.calibration().state(), CalibrationState::Running);

        assert!(manager.abort_calibration().unwrap());
        assert_eq!(manager.calibration().state(), CalibrationState::Aborted);

        manager.acknowledge_calibration();
        assert_eq!(manager.calibration().state(), CalibrationState::Idle);
    }

    #[test]
    fn calibration_requires_full_battery() {
        let mut mock = MockUps::new();
        mock.set_response('f', "094.0");
        let mut manager = connected(mock);

        let check = manager.start_calibration().unwrap();
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("100%"));
        assert_eq!(manager.calibration().state(), CalibrationState::Idle);
    }

    #[test]
    fn inquire_decodes_by_catalog_kind() {
        let mut manager = connected(MockUps::new());
        assert_eq!(
            manager.inquire('f').unwrap(),
            ParsedValue::Number(100.0)
        );
        assert_eq!(
            manager.inquire('V').unwrap(),
            ParsedValue::Text("MWI".to_string())
        );
        assert!(matches!(
            manager.inquire('!'),
            Err(UpsError::Parse(_))
        ));
    }

    #[test]
    fn actions_round_trip() {
        let mut manager = connected(MockUps::new());
        manager.run_self_test().unwrap();
        manager.test_lights_and_alarm().unwrap();
        manager.simulate_power_failure().unwrap();
        manager.turn_off_after_delay().unwrap();
        assert_eq!(manager.toggle_bypass().unwrap(), BypassTransition::ToBypass);
    }

    #[test]
    fn factory_reset_rereads_settings() {
        let mut manager = connected(MockUps::new());
        wait_for_identity(&manager);
        manager.factory_reset().unwrap();
        assert_eq!(manager.snapshot().tier_of('E'), Some(PollTier::Manual));
    }

    #[test]
    fn prog_mode_blocks_normal_operations() {
        let mut manager = connected(MockUps::new());
        wait_for_identity(&manager);
        manager.enter_prog_mode().unwrap();
        assert_eq!(manager.prog_state(), ProgState::In);

        assert!(matches!(
            manager.change_setting("alarm_control", "T"),
            Err(UpsError::ProgModeActive)
        ));
        assert!(matches!(
            manager.run_self_test(),
            Err(UpsError::ProgModeActive)
        ));

        assert_eq!(manager.prog_nudge(Nudge::Up).unwrap(), "222.5");
        assert_eq!(manager.prog_save().unwrap(), "OK");
        manager.exit_prog_mode().unwrap();
        assert_eq!(manager.prog_state(), ProgState::Out);

        // Normal traffic works again.
        manager.run_self_test().unwrap();
    }

    #[test]
    fn operations_require_a_connection() {
        let mut manager = UpsManager::new();
        assert!(matches!(
            manager.change_setting("alarm_control", "T"),
            Err(UpsError::NotConnected)
        ));
        assert!(matches!(
            manager.run_self_test(),
            Err(UpsError::NotConnected)
        ));
    }
}
