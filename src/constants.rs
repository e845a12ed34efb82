//! Protocol constants for APC UPS-Link communication.
//!
//! This module defines the serial parameters, protocol timing, response
//! terminators and the register bit tables used on the wire. Timing values
//! follow the UPS-Link documentation; the PROG mode values come from the
//! characterized parts of the unofficial service sub-protocol.

use std::time::Duration;

/// Baud rate for all UPS-Link devices
pub const BAUD_RATE: u32 = 2400;

/// Read timeout for a single command response
pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Gap inserted between the two bytes of a timed-double command
pub const TIMED_CMD_DELAY: Duration = Duration::from_millis(1700);

/// Minimum legal gap for a timed-double command; the second byte is
/// rejected by the engine if sent earlier than this
pub const TIMED_CMD_MIN_GAP: Duration = Duration::from_millis(1500);

/// Settle time after an EEPROM edit before the next command
pub const EEPROM_WRITE_DELAY: Duration = Duration::from_millis(200);

/// Inter-character delay while typing a direct-edit value
pub const DIRECT_EDIT_CHAR_DELAY: Duration = Duration::from_millis(50);

/// Width of a direct-edit value (UPS ID, battery replacement date)
pub const DIRECT_EDIT_LEN: usize = 8;

/// Fast poll cadence (voltages, load, battery capacity, status register)
pub const POLL_FAST_INTERVAL: Duration = Duration::from_secs(2);

/// Slow poll cadence (temperature, frequency, runtime, fault registers)
pub const POLL_SLOW_INTERVAL: Duration = Duration::from_secs(10);

/// Response terminator for inquiry and editable commands
pub const RESPONSE_TERMINATOR: &[u8] = b"\r\n";

/// Smart Mode entry command byte
pub const SMART_MODE_CMD: u8 = b'Y';

/// Expected response to Smart Mode entry
pub const SMART_MODE_RESPONSE: &str = "SM";

/// Response to the simple-mode exit command (`R` in normal mode)
pub const SIMPLE_MODE_RESPONSE: &str = "BYE";

/// PROG mode entry byte, sent twice with [`PROG_MODE_DELAY`] in between
pub const PROG_MODE_CMD: u8 = b'1';

/// Mandatory delay between the two PROG entry bytes
pub const PROG_MODE_DELAY: Duration = Duration::from_secs(4);

/// Expected response after the second PROG entry byte
pub const PROG_MODE_RESPONSE: &str = "PROG";

/// ESC, exits PROG mode
pub const PROG_EXIT_CMD: u8 = 0x1b;

/// Expected response to the factory reset command `z`
pub const FACTORY_RESET_RESPONSE: &str = "CLEAR";

/// Battery percentage at which the UPS ends a runtime calibration
pub const CALIBRATION_END_PCT: f64 = 25.0;

/// Maximum attempts for a single command exchange; retries apply to read
/// timeouts only, never to unexpected responses
pub const READ_RETRY_LIMIT: u32 = 2;

/// Raw range of the external battery pack counter (`>` command)
pub const BATTERY_PACKS_MODULUS: i32 = 256;

/// UPS Status register (`Q`) bit labels, indexed by bit number 0-7
pub const STATUS_BITS: [&str; 8] = [
    "Runtime Calibration",
    "SmartTrim",
    "SmartBoost",
    "On Line",
    "On Battery",
    "Overloaded Output",
    "Low Battery",
    "Replace Battery",
];

/// State register (`~`) bit labels, indexed by bit number 0-7
pub const STATE_BITS: [&str; 8] = [
    "In wake up mode (startup test)",
    "In bypass due to internal fault (see Trip/Trip1)",
    "Going to bypass via UPS-Link or key command",
    "In bypass via UPS-Link or key command",
    "Returning from bypass",
    "In bypass via manual bypass control",
    "Ready to power load upon user command",
    "Ready to power load upon user command or return of line",
];

/// Trip1 register (`'`) bit labels, indexed by bit number 0-7
pub const TRIP1_BITS: [&str; 8] = [
    "Electronics Unit fan failure; UPS in bypass",
    "Isolation Unit fan failure",
    "Bypass supply failure",
    "Output voltage select failure; UPS in bypass",
    "DC imbalance; UPS in bypass",
    "Commanded out of bypass with no batteries attached",
    "SmartBoost or SmartTrim relay fault",
    "Bad output voltage",
];

/// Trip register (`8`) bit labels, indexed by bit number 0-7
pub const TRIP_BITS: [&str; 8] = [
    "Output unpowered due to low battery shut down",
    "Unable to transfer to battery due to overload",
    "Main relay malfunction; UPS turned off",
    "In sleep mode via '@ddd' command",
    "In shut down mode via 'S' command",
    "Battery charger failure",
    "Bypass relay malfunction",
    "Internal temperature exceeded limits",
];

/// Firmware version, 1st character: model type
pub const FIRMWARE_MODEL_MAP: &[(char, &str)] = &[
    ('2', "Smart-UPS 250"),
    ('4', "Smart-UPS 400, UPS 370ci"),
    ('6', "Smart-UPS 600"),
    ('7', "Smart-UPS 900"),
    ('8', "Smart-UPS 1250"),
    ('9', "Smart-UPS 2000"),
    ('0', "Matrix-UPS 3000"),
    ('5', "Matrix-UPS 5000"),
    ('F', "Smart-UPS 450"),
    ('G', "Smart-UPS 700"),
    ('I', "Smart-UPS 1000"),
    ('K', "Smart-UPS 1400"),
    ('M', "Smart-UPS 2200"),
    ('O', "Smart-UPS 3000"),
];

/// Firmware version, 3rd character: voltage version
pub const FIRMWARE_VOLTAGE_MAP: &[(char, &str)] = &[
    ('A', "100 Vac"),
    ('D', "120 Vac"),
    ('M', "208 Vac"),
    ('I', "220/230/240 Vac"),
    ('J', "200 Vac"),
];

/// Transfer cause codes (`G` command)
pub const TRANSFER_CAUSE: &[(&str, &str)] = &[
    ("R", "Unacceptable utility voltage rate of change"),
    ("H", "High utility voltage"),
    ("L", "Low utility voltage"),
    ("T", "Line voltage notch or spike"),
    ("O", "No transfers have occurred"),
    ("S", "UPS-Link command or self-test"),
];

/// Battery self-test results (`X` command)
pub const TEST_RESULTS: &[(&str, &str)] = &[
    ("OK", "Good battery"),
    ("BT", "Battery failed: insufficient capacity"),
    ("NG", "Invalid test: overload"),
    ("NO", "No test results available"),
];

/// Approximate rated wattage per model, for load watt computation
pub const MODEL_WATTAGE: &[(&str, f64)] = &[
    ("Smart-UPS 450", 280.0),
    ("Smart-UPS 700", 450.0),
    ("Smart-UPS 1000", 670.0),
    ("Smart-UPS 1400", 950.0),
    ("Smart-UPS 2200", 1700.0),
    ("Smart-UPS 3000", 2700.0),
    ("Smart-UPS 250", 160.0),
    ("Smart-UPS 600", 390.0),
    ("Smart-UPS 900", 580.0),
    ("Smart-UPS 1250", 800.0),
    ("Smart-UPS 2000", 1400.0),
];

/// Look up the model description for a firmware version string.
pub fn firmware_model(firmware: &str) -> Option<&'static str> {
    let first = firmware.chars().next()?;
    FIRMWARE_MODEL_MAP
        .iter()
        .find(|(c, _)| *c == first)
        .map(|(_, name)| *name)
}

/// Look up the voltage version for a firmware version string.
pub fn firmware_voltage(firmware: &str) -> Option<&'static str> {
    let third = firmware.chars().nth(2)?;
    FIRMWARE_VOLTAGE_MAP
        .iter()
        .find(|(c, _)| *c == third)
        .map(|(_, name)| *name)
}

/// Describe a transfer-cause code returned by the `G` command.
pub fn transfer_cause_label(code: &str) -> Option<&'static str> {
    TRANSFER_CAUSE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Describe a self-test result returned by the `X` command.
pub fn test_result_label(code: &str) -> Option<&'static str> {
    TEST_RESULTS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// Rated wattage for a model name as reported by the Ctrl+A inquiry.
pub fn rated_watts(model: &str) -> Option<f64> {
    MODEL_WATTAGE
        .iter()
        .find(|(name, _)| model.contains(name))
        .map(|(_, watts)| *watts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_decoding() {
        assert_eq!(firmware_model("MWI"), Some("Smart-UPS 2200"));
        assert_eq!(firmware_voltage("MWI"), Some("220/230/240 Vac"));
        assert_eq!(firmware_model(""), None);
        assert_eq!(firmware_voltage("MW"), None);
    }

    #[test]
    fn label_lookups() {
        assert_eq!(transfer_cause_label("O"), Some("No transfers have occurred"));
        assert_eq!(test_result_label("BT"), Some("Battery failed: insufficient capacity"));
        assert_eq!(transfer_cause_label("Z"), None);
    }

    #[test]
    fn rated_watts_matches_substring() {
        assert_eq!(rated_watts("Smart-UPS 2200 XL"), Some(1700.0));
        assert_eq!(rated_watts("Unknown-UPS"), None);
    }
}
