//! Register bit decoding.
//!
//! Four inquiry commands return a two-digit hex bitmask: Status (`Q`),
//! State (`~`), Trip (`8`) and Trip1 (`'`). Decoding is pure and total:
//! malformed input yields an empty flag set, never an error, and reserved
//! bit patterns simply produce no flags.

use serde::Serialize;

use crate::constants::{STATE_BITS, STATUS_BITS, TRIP1_BITS, TRIP_BITS};

/// The four bitmask registers a Smart-UPS exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterKind {
    /// `Q` command
    Status,
    /// `~` command
    State,
    /// `8` command
    Trip,
    /// `'` command
    Trip1,
}

impl RegisterKind {
    /// The inquiry character that reads this register.
    pub fn command(self) -> char {
        match self {
            RegisterKind::Status => 'Q',
            RegisterKind::State => '~',
            RegisterKind::Trip => '8',
            RegisterKind::Trip1 => '\'',
        }
    }

    /// Bit labels for this register, indexed by bit number.
    pub fn bit_labels(self) -> &'static [&'static str; 8] {
        match self {
            RegisterKind::Status => &STATUS_BITS,
            RegisterKind::State => &STATE_BITS,
            RegisterKind::Trip => &TRIP_BITS,
            RegisterKind::Trip1 => &TRIP1_BITS,
        }
    }

    /// Identify a register by its inquiry character.
    pub fn from_command(code: char) -> Option<RegisterKind> {
        match code {
            'Q' => Some(RegisterKind::Status),
            '~' => Some(RegisterKind::State),
            '8' => Some(RegisterKind::Trip),
            '\'' => Some(RegisterKind::Trip1),
            _ => None,
        }
    }
}

/// A decoded register: the raw byte plus the labels of every set bit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegisterImage {
    /// Raw register value
    pub raw: u8,
    /// Labels of set bits, lowest bit first
    pub flags: Vec<&'static str>,
}

impl RegisterImage {
    /// Whether a named condition is set.
    pub fn is_set(&self, label: &str) -> bool {
        self.flags.iter().any(|f| *f == label)
    }
}

/// Decode a two-digit hex register value into its flag set. Total over all
/// inputs: anything that does not parse as hex decodes to zero.
pub fn decode(kind: RegisterKind, raw_hex: &str) -> RegisterImage {
    let raw = u8::from_str_radix(raw_hex.trim(), 16).unwrap_or(0);
    let labels = kind.bit_labels();
    let flags = (0..8)
        .filter(|bit| raw & (1 << bit) != 0)
        .map(|bit| labels[bit])
        .collect();
    RegisterImage { raw, flags }
}

/// Re-encode a set of flag labels into the raw register value. Labels not
/// belonging to this register are ignored.
pub fn encode(kind: RegisterKind, flags: &[&str]) -> u8 {
    let labels = kind.bit_labels();
    flags
        .iter()
        .filter_map(|flag| labels.iter().position(|l| l == flag))
        .fold(0u8, |acc, bit| acc | (1 << bit))
}

/// Current images of all four registers, recomputed as polls come in.
/// No history is kept beyond the latest image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterSnapshot {
    pub status: RegisterImage,
    pub state: RegisterImage,
    pub trip: RegisterImage,
    pub trip1: RegisterImage,
}

impl RegisterSnapshot {
    /// Replace one register's image from a freshly polled hex value.
    pub fn update(&mut self, kind: RegisterKind, raw_hex: &str) {
        let image = decode(kind, raw_hex);
        match kind {
            RegisterKind::Status => self.status = image,
            RegisterKind::State => self.state = image,
            RegisterKind::Trip => self.trip = image,
            RegisterKind::Trip1 => self.trip1 = image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_online_sets_exactly_one_flag() {
        let image = decode(RegisterKind::Status, "08");
        assert_eq!(image.flags, vec!["On Line"]);
        assert!(!image.is_set("On Battery"));
    }

    #[test]
    fn status_multiple_bits() {
        // C8: replace battery + low battery + on line
        let image = decode(RegisterKind::Status, "C8");
        assert!(image.is_set("Replace Battery"));
        assert!(image.is_set("Low Battery"));
        assert!(image.is_set("On Line"));
        assert_eq!(image.flags.len(), 3);
    }

    #[test]
    fn status_calibration_bit() {
        let image = decode(RegisterKind::Status, "09");
        assert!(image.is_set("Runtime Calibration"));
        assert!(image.is_set("On Line"));
    }

    #[test]
    fn state_bypass_via_upslink_only() {
        let image = decode(RegisterKind::State, "08");
        assert_eq!(image.flags, vec!["In bypass via UPS-Link or key command"]);
    }

    #[test]
    fn trip_registers_decode_low_bits() {
        assert_eq!(
            decode(RegisterKind::Trip, "01").flags,
            vec!["Output unpowered due to low battery shut down"]
        );
        assert_eq!(
            decode(RegisterKind::Trip, "20").flags,
            vec!["Battery charger failure"]
        );
        assert_eq!(
            decode(RegisterKind::Trip1, "01").flags,
            vec!["Electronics Unit fan failure; UPS in bypass"]
        );
    }

    #[test]
    fn decode_is_total_over_malformed_input() {
        for raw in ["ZZ", "", "  ", "1G", "☃"] {
            let image = decode(RegisterKind::Status, raw);
            assert_eq!(image.raw, 0);
            assert!(image.flags.is_empty());
        }
    }

    #[test]
    fn decode_is_deterministic_for_all_values() {
        for value in 0..=255u8 {
            let hex = format!("{value:02X}");
            let a = decode(RegisterKind::State, &hex);
            let b = decode(RegisterKind::State, &hex);
            assert_eq!(a, b);
            assert_eq!(a.raw, value);
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        for kind in [
            RegisterKind::Status,
            RegisterKind::State,
            RegisterKind::Trip,
            RegisterKind::Trip1,
        ] {
            for value in 0..=255u8 {
                let image = decode(kind, &format!("{value:02X}"));
                assert_eq!(encode(kind, &image.flags), value);
            }
        }
    }

    #[test]
    fn encode_ignores_foreign_labels() {
        assert_eq!(encode(RegisterKind::Status, &["not a real flag"]), 0);
    }

    #[test]
    fn snapshot_updates_the_right_register() {
        let mut snapshot = RegisterSnapshot::default();
        snapshot.update(RegisterKind::Status, "10");
        snapshot.update(RegisterKind::Trip, "80");
        assert!(snapshot.status.is_set("On Battery"));
        assert!(snapshot.trip.is_set("Internal temperature exceeded limits"));
        assert!(snapshot.state.flags.is_empty());
    }
}
