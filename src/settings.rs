//! Editable EEPROM setting definitions.
//!
//! Each entry names the command character, the ordered allowed-value cycle
//! the device steps through on `-`, and a danger tier that callers can use
//! to gate confirmation. The tier is advisory only; the core never blocks
//! an edit because of it.

use serde::Serialize;

/// How much care a caller should take before changing a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DangerLevel {
    Normal,
    Caution,
    Dangerous,
}

/// Definition of one editable UPS EEPROM setting.
#[derive(Debug, Clone, Copy)]
pub struct EditableSetting {
    /// Stable key used by the API
    pub key: &'static str,
    /// Protocol command character
    pub code: char,
    /// Human-readable name
    pub name: &'static str,
    /// Display unit, empty when unitless
    pub unit: &'static str,
    /// Ordered cycle of allowed values; empty for free-text settings
    pub allowed: &'static [&'static str],
    /// Value to display-label pairs
    pub labels: &'static [(&'static str, &'static str)],
    /// Advisory danger tier
    pub danger: DangerLevel,
    /// Whether the value is typed directly instead of cycled
    pub direct: bool,
}

impl EditableSetting {
    /// Display label for a value, falling back to the raw value.
    pub fn label_for<'a>(&self, value: &'a str) -> &'a str {
        self.labels
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, label)| *label)
            .unwrap_or(value)
    }
}

/// All editable settings, in catalog order.
pub static SETTINGS: &[EditableSetting] = &[
    EditableSetting {
        key: "self_test_interval",
        code: 'E',
        name: "Self Test Interval",
        unit: "Hr",
        allowed: &["336", "168", "ON ", "OFF"],
        labels: &[
            ("336", "Every 336 hours (14 days)"),
            ("168", "Every 168 hours (7 days)"),
            ("ON ", "On startup"),
            ("OFF", "No automatic test"),
        ],
        danger: DangerLevel::Normal,
        direct: false,
    },
    EditableSetting {
        key: "alarm_control",
        code: 'k',
        name: "Alarm Control",
        unit: "",
        allowed: &["0", "T", "L", "N"],
        labels: &[
            ("0", "Immediate (5 sec delay)"),
            ("T", "30-second delay"),
            ("L", "Low battery only"),
            ("N", "Disabled"),
        ],
        danger: DangerLevel::Normal,
        direct: false,
    },
    EditableSetting {
        key: "ups_id",
        code: 'c',
        name: "UPS ID",
        unit: "",
        allowed: &[],
        labels: &[],
        danger: DangerLevel::Normal,
        direct: true,
    },
    EditableSetting {
        key: "battery_replace_date",
        code: 'x',
        name: "Battery Replacement Date",
        unit: "",
        allowed: &[],
        labels: &[],
        danger: DangerLevel::Normal,
        direct: true,
    },
    EditableSetting {
        key: "low_battery_warning",
        code: 'q',
        name: "Low Battery Warning",
        unit: "Min",
        allowed: &["02", "05", "07", "10"],
        labels: &[
            ("02", "2 minutes"),
            ("05", "5 minutes"),
            ("07", "7 minutes"),
            ("10", "10 minutes"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "shutdown_delay",
        code: 'p',
        name: "Shutdown Delay",
        unit: "Sec",
        allowed: &["020", "180", "300", "600"],
        labels: &[
            ("020", "20 seconds"),
            ("180", "180 seconds"),
            ("300", "300 seconds"),
            ("600", "600 seconds"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "turn_on_delay",
        code: 'r',
        name: "Wake Up Delay",
        unit: "Sec",
        allowed: &["000", "060", "180", "300"],
        labels: &[
            ("000", "No delay"),
            ("060", "60 seconds"),
            ("180", "180 seconds"),
            ("300", "300 seconds"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "min_battery_restart",
        code: 'e',
        name: "Min Battery to Restart",
        unit: "%",
        allowed: &["00", "15", "50", "90"],
        labels: &[
            ("00", "0% (restart immediately)"),
            ("15", "15%"),
            ("50", "50%"),
            ("90", "90%"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "sensitivity",
        code: 's',
        name: "Sensitivity",
        unit: "",
        // L appears twice: the EEPROM has four slots
        allowed: &["H", "M", "L", "L"],
        labels: &[("H", "High"), ("M", "Medium"), ("L", "Low")],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "upper_transfer_voltage",
        code: 'u',
        name: "Upper Transfer Voltage",
        unit: "V",
        allowed: &["253", "264", "271", "280"],
        labels: &[
            ("253", "253 V"),
            ("264", "264 V"),
            ("271", "271 V"),
            ("280", "280 V"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "lower_transfer_voltage",
        code: 'l',
        name: "Lower Transfer Voltage",
        unit: "V",
        allowed: &["196", "188", "208", "204"],
        labels: &[
            ("196", "196 V"),
            ("188", "188 V"),
            ("208", "208 V"),
            ("204", "204 V"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "output_voltage_setting",
        code: 'o',
        name: "Output Voltage",
        unit: "V",
        allowed: &["225", "230", "240", "220"],
        labels: &[
            ("225", "225 V"),
            ("230", "230 V"),
            ("240", "240 V"),
            ("220", "220 V"),
        ],
        danger: DangerLevel::Caution,
        direct: false,
    },
    EditableSetting {
        key: "battery_packs",
        code: '>',
        name: "External Battery Packs",
        unit: "",
        // Display range; the raw counter is adjusted with +/- over 0-255
        allowed: &[
            "000", "001", "002", "003", "004", "005", "006", "007", "008", "009", "010", "011",
            "012", "013", "014", "015", "016",
        ],
        labels: &[("000", "0 (no external packs)")],
        danger: DangerLevel::Caution,
        direct: false,
    },
];

/// Look up a setting by its API key.
pub fn find_setting(key: &str) -> Option<&'static EditableSetting> {
    SETTINGS.iter().find(|s| s.key == key)
}

/// Look up a setting by its command character.
pub fn setting_for_command(code: char) -> Option<&'static EditableSetting> {
    SETTINGS.iter().find(|s| s.code == code)
}

/// How many Edit (`-`) commands are needed to cycle from `current` to
/// `target`. Returns `None` when the target is not an allowed value. When a
/// value appears more than once in the cycle (sensitivity's repeated `L`),
/// the first occurrence forward wins. A current value the device reports
/// outside the known cycle counts from position 0.
pub fn count_edits_needed(
    setting: &EditableSetting,
    current: &str,
    target: &str,
) -> Option<usize> {
    let values = setting.allowed;
    if values.is_empty() || !values.contains(&target) {
        return None;
    }
    let current_idx = values.iter().position(|v| *v == current).unwrap_or(0);
    let n = values.len();
    (1..=n).find(|steps| values[(current_idx + steps) % n] == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_setting_is_well_formed() {
        for setting in SETTINGS {
            assert!(!setting.key.is_empty());
            assert!(!setting.name.is_empty());
            if setting.direct {
                assert!(setting.allowed.is_empty(), "{} is direct", setting.key);
            }
        }
    }

    #[test]
    fn alarm_cycle_counts() {
        let setting = find_setting("alarm_control").unwrap();
        assert_eq!(count_edits_needed(setting, "0", "T"), Some(1));
        assert_eq!(count_edits_needed(setting, "0", "L"), Some(2));
        assert_eq!(count_edits_needed(setting, "0", "N"), Some(3));
        assert_eq!(count_edits_needed(setting, "N", "0"), Some(1));
        assert_eq!(count_edits_needed(setting, "T", "0"), Some(3));
    }

    #[test]
    fn full_cycle_returns_to_the_original_value() {
        // Advancing N times over N allowed values lands back where it started.
        let setting = find_setting("alarm_control").unwrap();
        assert_eq!(
            count_edits_needed(setting, "0", "0"),
            Some(setting.allowed.len())
        );
    }

    #[test]
    fn sensitivity_duplicate_takes_first_occurrence() {
        let setting = find_setting("sensitivity").unwrap();
        assert_eq!(count_edits_needed(setting, "H", "M"), Some(1));
        assert_eq!(count_edits_needed(setting, "H", "L"), Some(2));
        assert_eq!(count_edits_needed(setting, "M", "L"), Some(1));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let setting = find_setting("alarm_control").unwrap();
        assert_eq!(count_edits_needed(setting, "0", "INVALID"), None);
    }

    #[test]
    fn unknown_current_counts_from_slot_zero() {
        let setting = find_setting("self_test_interval").unwrap();
        assert_eq!(count_edits_needed(setting, "???", "168"), Some(1));
    }

    #[test]
    fn direct_settings_have_no_cycle() {
        let ups_id = find_setting("ups_id").unwrap();
        assert!(ups_id.direct);
        assert_eq!(count_edits_needed(ups_id, "A", "B"), None);
    }

    #[test]
    fn danger_tiers() {
        assert_eq!(
            find_setting("self_test_interval").unwrap().danger,
            DangerLevel::Normal
        );
        assert_eq!(
            find_setting("shutdown_delay").unwrap().danger,
            DangerLevel::Caution
        );
    }

    #[test]
    fn battery_packs_uses_the_adjustment_path() {
        let setting = find_setting("battery_packs").unwrap();
        assert_eq!(setting.code, '>');
        assert!(!setting.direct);
        assert_eq!(setting.allowed.len(), 17);
    }

    #[test]
    fn labels_fall_back_to_raw_value() {
        let setting = find_setting("sensitivity").unwrap();
        assert_eq!(setting.label_for("H"), "High");
        assert_eq!(setting.label_for("X"), "X");
    }
}
