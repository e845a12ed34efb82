//! Simulated UPS for development and testing without hardware.
//!
//! [`MockUps`] implements [`Transport`] and answers UPS-Link traffic the
//! way a Smart-UPS 2200 does: terminated inquiry replies, EEPROM edit
//! cycling, direct-edit character input, the PROG handshake and alert
//! injection. [`ManualClock`] pairs with it so the protocol's mandatory
//! multi-second waits can be asserted on instead of slept through.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::events::Alert;
use crate::settings::setting_for_command;
use crate::transport::{Clock, Transport};

/// Baseline responses of the simulated device.
const DEFAULT_RESPONSES: &[(char, &str)] = &[
    ('Y', "SM"),
    ('A', "OK"),
    ('W', "OK"),
    ('U', "OK"),
    ('D', "OK"),
    ('S', "OK"),
    ('K', "OK"),
    ('Z', "OK"),
    ('\x0e', "OK"),
    ('\x7f', "OK"),
    ('R', "BYE"),
    ('^', "BYP"),
    ('z', "CLEAR"),
    ('\x01', "Smart-UPS 2200 XL"),
    ('V', "MWI"),
    ('b', "165.12.I"),
    ('n', "AS1139244203"),
    ('m', "09/25/11"),
    ('g', "048"),
    ('y', "(C) APCC"),
    ('f', "100.0"),
    ('B', "055.35"),
    ('P', "024.0"),
    ('L', "222.4"),
    ('O', "222.4"),
    ('C', "023.8"),
    ('F', "50.00"),
    ('j', "0120:"),
    ('M', "225.0"),
    ('N', "218.0"),
    ('Q', "08"),
    ('~', "00"),
    ('\'', "00"),
    ('8', "00"),
    ('7', "00"),
    ('G', "O"),
    ('X', "OK"),
    ('>', "000"),
    ('<', "000"),
    ('9', "FF"),
    ('E', "336"),
    ('c', "UPS_IDEN"),
    ('x', "09/25/11"),
    ('u', "253"),
    ('l', "196"),
    ('e', "15"),
    ('o', "230"),
    ('s', "H"),
    ('q', "02"),
    ('k', "0"),
    ('p', "180"),
    ('r', "000"),
    ('0', "100"),
    ('4', "025"),
    ('5', "050"),
    ('6', "075"),
];

/// Direct character input settings and their widths.
const DIRECT_EDIT_CMDS: &[(char, usize)] = &[('c', 8), ('x', 8)];

struct DirectEdit {
    code: char,
    buf: String,
    expected: usize,
}

/// Scripted UPS behind the [`Transport`] trait.
pub struct MockUps {
    responses: HashMap<char, String>,
    output: VecDeque<u8>,
    written: Arc<Mutex<Vec<u8>>>,
    last_cmd: Option<char>,
    silent: Vec<char>,
    refuse_edits: bool,
    sticky_edits: bool,
    pending_alert: Option<u8>,
    pending_mid_alert: Option<u8>,
    prog_pending: bool,
    prog_mode: bool,
    prog_response: String,
    prog_value: f64,
    direct_edit: Option<DirectEdit>,
    wake_digits_pending: usize,
    // EEPROM slot index per editable command; tracked separately from the
    // value because cycles can contain duplicates.
    edit_state: HashMap<char, usize>,
}

impl MockUps {
    pub fn new() -> Self {
        MockUps {
            responses: DEFAULT_RESPONSES
                .iter()
                .map(|(c, r)| (*c, r.to_string()))
                .collect(),
            output: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            last_cmd: None,
            silent: Vec::new(),
            refuse_edits: false,
            sticky_edits: false,
            pending_alert: None,
            pending_mid_alert: None,
            prog_pending: false,
            prog_mode: false,
            prog_response: "PROG".to_string(),
            prog_value: 222.4,
            direct_edit: None,
            wake_digits_pending: 0,
            edit_state: HashMap::new(),
        }
    }

    /// Override a command's canned response.
    pub fn set_response(&mut self, code: char, response: &str) {
        self.responses.insert(code, response.to_string());
    }

    /// Make the device stay silent for one command character.
    pub fn set_silent_for(&mut self, code: char) {
        self.silent.push(code);
    }

    /// Answer every edit attempt with `NO`, as a DIP-switch-locked
    /// device does.
    pub fn set_refuse_edits(&mut self, refuse: bool) {
        self.refuse_edits = refuse;
    }

    /// Echo edit advances without persisting them, so the post-edit
    /// read-back disagrees with the edit responses.
    pub fn set_sticky_edits(&mut self, sticky: bool) {
        self.sticky_edits = sticky;
    }

    /// Override the PROG handshake reply.
    pub fn set_prog_response(&mut self, response: &str) {
        self.prog_response = response.to_string();
    }

    /// Emit an alert byte immediately before the next response.
    pub fn queue_alert(&mut self, alert: Alert) {
        self.pending_alert = Some(alert.code() as u8);
    }

    /// Emit an alert byte inside the next response, after its first byte.
    pub fn queue_alert_mid_response(&mut self, alert: Alert) {
        self.pending_mid_alert = Some(alert.code() as u8);
    }

    /// Push raw bytes straight into the read buffer.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    /// Handle onto the transcript of every byte written to the device.
    pub fn written_handle(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }

    fn enqueue_response(&mut self, text: &str) {
        let mut bytes: Vec<u8> = format!("{text}\r\n").into_bytes();
        if let Some(alert) = self.pending_mid_alert.take() {
            bytes.insert(1, alert);
        }
        if let Some(alert) = self.pending_alert.take() {
            self.output.push_back(alert);
        }
        self.output.extend(bytes);
    }

    fn process_byte(&mut self, byte: u8) {
        // Direct edit consumes raw characters until the value is complete.
        if let Some(mut edit) = self.direct_edit.take() {
            edit.buf.push(byte as char);
            if edit.buf.len() >= edit.expected {
                self.responses.insert(edit.code, edit.buf.clone());
                self.enqueue_response("OK");
            } else {
                self.direct_edit = Some(edit);
            }
            return;
        }

        if self.prog_mode {
            self.process_prog_byte(byte);
            return;
        }

        if byte == b'1' {
            if self.prog_pending {
                self.prog_pending = false;
                self.prog_mode = true;
                let response = self.prog_response.clone();
                self.enqueue_response(&response);
            } else {
                self.prog_pending = true;
            }
            return;
        }
        self.prog_pending = false;

        if self.wake_digits_pending > 0 {
            self.wake_digits_pending -= 1;
            if self.wake_digits_pending == 0 {
                self.enqueue_response("OK");
            }
            return;
        }
        if byte == b'@' {
            self.wake_digits_pending = 3;
            return;
        }

        if byte == b'-' || byte == b'+' {
            self.process_edit(byte);
            return;
        }

        let code = byte as char;
        self.last_cmd = Some(code);
        if self.silent.contains(&code) {
            return;
        }
        if let Some(response) = self.responses.get(&code).cloned() {
            self.enqueue_response(&response);
        }
        // Unknown commands get no response, like the real device.
    }

    fn process_prog_byte(&mut self, byte: u8) {
        match byte {
            b'+' => {
                self.prog_value += 0.1;
                let text = format!("{:.1}", self.prog_value);
                self.enqueue_response(&text);
            }
            b'-' => {
                self.prog_value -= 0.1;
                let text = format!("{:.1}", self.prog_value);
                self.enqueue_response(&text);
            }
            b'R' => self.enqueue_response("OK"),
            0x1b => {
                self.prog_mode = false;
                self.enqueue_response("BYE");
            }
            _ => {
                let code = byte as char;
                if let Some(response) = self.responses.get(&code).cloned() {
                    self.enqueue_response(&response);
                } else {
                    self.enqueue_response("NA");
                }
            }
        }
    }

    fn process_edit(&mut self, byte: u8) {
        if self.refuse_edits {
            self.enqueue_response("NO");
            return;
        }
        let Some(code) = self.last_cmd else {
            self.enqueue_response("NA");
            return;
        };

        if code == '>' {
            let current: i32 = self
                .responses
                .get(&'>')
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            let next = if byte == b'+' {
                (current + 1).rem_euclid(256)
            } else {
                (current - 1).rem_euclid(256)
            };
            let text = format!("{next:03}");
            self.responses.insert('>', text.clone());
            self.enqueue_response(&text);
            return;
        }

        if let Some((_, width)) = DIRECT_EDIT_CMDS.iter().find(|(c, _)| *c == code) {
            let current = self.responses.get(&code).cloned().unwrap_or_default();
            self.enqueue_response(&current);
            self.direct_edit = Some(DirectEdit {
                code,
                buf: String::new(),
                expected: *width,
            });
            return;
        }

        match setting_for_command(code) {
            Some(setting) if !setting.allowed.is_empty() => {
                let cycle = setting.allowed;
                let current = self.responses.get(&code).cloned().unwrap_or_default();
                let index = *self
                    .edit_state
                    .entry(code)
                    .or_insert_with(|| cycle.iter().position(|v| *v == current).unwrap_or(0));
                let next_index = (index + 1) % cycle.len();
                let next = cycle[next_index].to_string();
                if !self.sticky_edits {
                    self.edit_state.insert(code, next_index);
                    self.responses.insert(code, next.clone());
                }
                self.enqueue_response(&next);
            }
            _ => self.enqueue_response("NA"),
        }
    }
}

impl Default for MockUps {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockUps {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        for &byte in data {
            self.process_byte(byte);
        }
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> Result<Option<u8>> {
        Ok(self.output.pop_front())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.output.clear();
        Ok(())
    }
}

/// Manually advanced clock: `sleep` moves time forward instantly and
/// records the request, so timing contracts become assertions.
pub struct ManualClock {
    base: Instant,
    state: Mutex<ManualClockState>,
}

struct ManualClockState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            base: Instant::now(),
            state: Mutex::new(ManualClockState {
                offset: Duration::ZERO,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, dur: Duration) {
        self.state.lock().unwrap().offset += dur;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.state.lock().unwrap().offset
    }

    fn sleep(&self, dur: Duration) {
        let mut state = self.state.lock().unwrap();
        state.offset += dur;
        state.sleeps.push(dur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_line(mock: &mut MockUps) -> String {
        let mut buf = Vec::new();
        while let Ok(Some(byte)) = mock.read_byte(Duration::ZERO) {
            buf.push(byte);
            if buf.ends_with(b"\r\n") {
                buf.truncate(buf.len() - 2);
                break;
            }
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn answers_smart_mode_entry() {
        let mut mock = MockUps::new();
        mock.write(b"Y").unwrap();
        assert_eq!(read_line(&mut mock), "SM");
    }

    #[test]
    fn edit_cycle_advances_and_wraps() {
        let mut mock = MockUps::new();
        mock.write(b"k").unwrap();
        assert_eq!(read_line(&mut mock), "0");

        let mut seen = Vec::new();
        for _ in 0..5 {
            mock.write(b"-").unwrap();
            seen.push(read_line(&mut mock));
        }
        assert_eq!(seen, vec!["T", "L", "N", "0", "T"]);
    }

    #[test]
    fn prog_handshake_needs_both_bytes() {
        let mut mock = MockUps::new();
        mock.write(b"1").unwrap();
        assert!(mock.read_byte(Duration::ZERO).unwrap().is_none());
        mock.write(b"1").unwrap();
        assert_eq!(read_line(&mut mock), "PROG");

        mock.write(b"+").unwrap();
        assert_eq!(read_line(&mut mock), "222.5");
        mock.write(&[0x1b]).unwrap();
        assert_eq!(read_line(&mut mock), "BYE");
        // Back to normal traffic.
        mock.write(b"f").unwrap();
        assert_eq!(read_line(&mut mock), "100.0");
    }

    #[test]
    fn direct_edit_accumulates_the_full_value() {
        let mut mock = MockUps::new();
        mock.write(b"c").unwrap();
        assert_eq!(read_line(&mut mock), "UPS_IDEN");
        mock.write(b"-").unwrap();
        assert_eq!(read_line(&mut mock), "UPS_IDEN");
        mock.write(b"RACK_07A").unwrap();
        assert_eq!(read_line(&mut mock), "OK");

        mock.write(b"c").unwrap();
        assert_eq!(read_line(&mut mock), "RACK_07A");
    }

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_secs(4));
        assert_eq!(clock.now() - before, Duration::from_secs(4));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(4)]);
    }
}
