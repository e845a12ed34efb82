//! Canonical UPS state aggregator.
//!
//! Thin mutable record of every known field with last-writer-wins
//! semantics. Each write records the poll tier that produced it so
//! consumers can judge staleness. There is exactly one live instance per
//! connected session; it is cleared on disconnect.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::parse_numeric;
use crate::constants::rated_watts;
use crate::registers::{RegisterKind, RegisterSnapshot};

/// Which cadence produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollTier {
    /// About every 2 s
    Fast,
    /// About every 10 s
    Slow,
    /// Read once after connect
    Once,
    /// Written by an explicit operation (edit, refresh, calibration)
    Manual,
}

/// All current UPS readings, settings and connection state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsState {
    // Connection
    pub connected: bool,
    pub port: String,
    pub smart_mode: bool,
    pub last_error: String,

    // Identity (read once)
    pub model: String,
    pub firmware: String,
    pub firmware_decimal: String,
    pub serial_number: String,
    pub manufacture_date: String,
    pub copyright_notice: String,
    pub nominal_battery_voltage: String,

    // Live readings (fast poll)
    pub battery_capacity: f64,
    pub battery_voltage: f64,
    pub load_power: f64,
    pub input_voltage: f64,
    pub output_voltage: f64,

    // Live readings (slow poll)
    pub temperature: f64,
    pub frequency: f64,
    pub runtime_remaining: f64,
    pub max_line_voltage: f64,
    pub min_line_voltage: f64,

    // Register images (raw hex plus decoded flags)
    pub dip_switch: String,
    pub registers: RegisterSnapshot,

    // Status info
    pub transfer_cause: String,
    pub last_test_result: String,
    pub battery_packs: String,
    pub bad_battery_packs: String,

    // Editable settings (current values)
    pub self_test_interval: String,
    pub ups_id: String,
    pub battery_replace_date: String,
    pub upper_transfer_voltage: String,
    pub lower_transfer_voltage: String,
    pub min_battery_restart: String,
    pub output_voltage_setting: String,
    pub sensitivity: String,
    pub low_battery_warning: String,
    pub alarm_control: String,
    pub shutdown_delay: String,
    pub turn_on_delay: String,

    // Smart constants (undocumented battery discharge parameters)
    pub smart_constant_0: String,
    pub smart_constant_4: String,
    pub smart_constant_5: String,
    pub smart_constant_6: String,

    // Load in watts, derived from load% and the model's rating
    pub load_watts: f64,

    // Poll tier that last wrote each command's field
    pub tiers: HashMap<char, PollTier>,

    pub last_update: Option<DateTime<Utc>>,
}

impl UpsState {
    /// Record one command response. Numeric fields that fail to parse keep
    /// their previous value, matching device glitches being transient.
    pub fn apply(&mut self, code: char, response: &str, tier: PollTier) {
        let text = response.trim().to_string();
        if let Some(kind) = RegisterKind::from_command(code) {
            self.registers.update(kind, &text);
            self.tiers.insert(code, tier);
            self.last_update = Some(Utc::now());
            return;
        }
        match code {
            '\x01' => self.model = text,
            'V' => self.firmware = text,
            'b' => self.firmware_decimal = text,
            'n' => self.serial_number = text,
            'm' => self.manufacture_date = text,
            'y' => self.copyright_notice = text,
            'g' => self.nominal_battery_voltage = text,
            'f' => self.apply_numeric(code, response, |s, v| s.battery_capacity = v),
            'B' => self.apply_numeric(code, response, |s, v| s.battery_voltage = v),
            'P' => self.apply_numeric(code, response, |s, v| s.load_power = v),
            'L' => self.apply_numeric(code, response, |s, v| s.input_voltage = v),
            'O' => self.apply_numeric(code, response, |s, v| s.output_voltage = v),
            'C' => self.apply_numeric(code, response, |s, v| s.temperature = v),
            'F' => self.apply_numeric(code, response, |s, v| s.frequency = v),
            'j' => self.apply_numeric(code, response, |s, v| s.runtime_remaining = v),
            'M' => self.apply_numeric(code, response, |s, v| s.max_line_voltage = v),
            'N' => self.apply_numeric(code, response, |s, v| s.min_line_voltage = v),
            '7' => self.dip_switch = text,
            'G' => self.transfer_cause = text,
            'X' => self.last_test_result = text,
            '>' => self.battery_packs = text,
            '<' => self.bad_battery_packs = text,
            '0' => self.smart_constant_0 = text,
            '4' => self.smart_constant_4 = text,
            '5' => self.smart_constant_5 = text,
            '6' => self.smart_constant_6 = text,
            'E' => self.self_test_interval = text,
            'c' => self.ups_id = text,
            'x' => self.battery_replace_date = text,
            'u' => self.upper_transfer_voltage = text,
            'l' => self.lower_transfer_voltage = text,
            'e' => self.min_battery_restart = text,
            'o' => self.output_voltage_setting = text,
            's' => self.sensitivity = text,
            'q' => self.low_battery_warning = text,
            'k' => self.alarm_control = text,
            'p' => self.shutdown_delay = text,
            'r' => self.turn_on_delay = text,
            _ => {
                log::debug!("No state field for command {code:?}");
                return;
            }
        }
        self.tiers.insert(code, tier);
        self.last_update = Some(Utc::now());
    }

    fn apply_numeric(&mut self, code: char, response: &str, set: impl FnOnce(&mut Self, f64)) {
        match parse_numeric(response) {
            Some(value) => set(self, value),
            None => log::warn!("Could not parse {code:?} response {response:?} as a number"),
        }
    }

    /// The tier that last wrote the field behind this command.
    pub fn tier_of(&self, code: char) -> Option<PollTier> {
        self.tiers.get(&code).copied()
    }

    /// Derive load watts from load% and the model's rated wattage.
    pub fn compute_load_watts(&mut self) {
        if let Some(watts) = rated_watts(&self.model) {
            self.load_watts = self.load_power / 100.0 * watts;
        }
    }

    /// Clear everything back to the disconnected state.
    pub fn reset(&mut self) {
        *self = UpsState::default();
    }
}

/// Shared handle to the session state: written by the poll threads and
/// write operations, read freely by external consumers via snapshots.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<UpsState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> UpsState {
        self.inner.read().unwrap().clone()
    }

    /// Mutate under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut UpsState)) {
        f(&mut self.inner.write().unwrap());
    }

    /// Record one command response.
    pub fn apply(&self, code: char, response: &str, tier: PollTier) {
        self.update(|state| state.apply(code, response, tier));
    }

    /// Record a non-fatal error for consumers to display.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|state| state.last_error = message);
    }
}
