//! Command catalog for the UPS-Link protocol.
//!
//! Every supported command is described by a [`CommandDef`]: the character
//! put on the wire, its category, the shape of the reply and how to decode
//! the value. Definitions are keyed by `(mode, character)` because PROG
//! mode reuses characters with different meanings (`R` exits to simple
//! mode in normal mode but saves to EEPROM in PROG mode). The catalog is
//! static and read-only; controllers select which table applies.

use crate::error::{Result, UpsError};

/// Protocol mode a command definition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// Normal Smart Mode traffic
    Normal,
    /// The undocumented PROG calibration sub-protocol
    Prog,
}

/// Broad behavior class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Read-only status or identity inquiry
    Inquiry,
    /// One-shot device action (self-test, bypass toggle, ...)
    Action,
    /// EEPROM setting edited by cycling through allowed values
    EditCycle,
    /// EEPROM setting edited by typing a literal value
    EditDirect,
    /// Two identical characters with a mandatory >1.5 s gap
    TimedDouble,
    /// Undocumented battery discharge-curve constant
    SmartConstant,
    /// PROG-mode calibration command
    Prog,
}

/// How the response bytes are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Terminated by `\r\n`
    Terminated,
    /// Fixed number of bytes, no terminator
    Fixed(usize),
}

/// How a response string decodes into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Decimal reading; a trailing `:` (runtime format) is stripped
    Numeric,
    /// Two-digit hex register image
    Hex,
    /// Free text
    Text,
    /// Date in `dd/mm/yy` or `mm/dd/yy`
    Date,
}

/// A decoded command response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Number(f64),
    Text(String),
}

impl ValueKind {
    /// Decode a raw response according to this kind. Falls back to text
    /// when a numeric reading does not parse.
    pub fn parse(&self, raw: &str) -> ParsedValue {
        match self {
            ValueKind::Numeric => match parse_numeric(raw) {
                Some(n) => ParsedValue::Number(n),
                None => ParsedValue::Text(raw.trim().to_string()),
            },
            _ => ParsedValue::Text(raw.trim().to_string()),
        }
    }
}

/// Parse a numeric reading, tolerating the runtime format `dddd:`.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches(':').trim().parse::<f64>().ok()
}

/// Definition of a single UPS-Link command.
#[derive(Debug, Clone, Copy)]
pub struct CommandDef {
    /// Character put on the wire
    pub code: char,
    /// Human-readable name
    pub name: &'static str,
    /// Behavior class
    pub category: Category,
    /// Value decoding
    pub kind: ValueKind,
    /// Display unit, empty when unitless
    pub unit: &'static str,
    /// Reply delimiting
    pub shape: ResponseShape,
}

const fn cmd(
    code: char,
    name: &'static str,
    category: Category,
    kind: ValueKind,
    unit: &'static str,
) -> CommandDef {
    CommandDef {
        code,
        name,
        category,
        kind,
        unit,
        shape: ResponseShape::Terminated,
    }
}

/// All documented normal-mode commands, plus the characterized
/// undocumented smart constants.
pub static NORMAL_COMMANDS: &[CommandDef] = &[
    // Control
    cmd('Y', "Set UPS to Smart Mode", Category::Action, ValueKind::Text, ""),
    cmd('A', "Test Lights and Beeper", Category::Action, ValueKind::Text, ""),
    cmd('K', "Turn Off after Delay", Category::TimedDouble, ValueKind::Text, ""),
    cmd('S', "Shut Down UPS on Battery", Category::Action, ValueKind::Text, ""),
    cmd('U', "Simulate Power Failure", Category::Action, ValueKind::Text, ""),
    cmd('W', "Battery Self-Test", Category::Action, ValueKind::Text, ""),
    cmd('Z', "Turn Off UPS", Category::TimedDouble, ValueKind::Text, ""),
    cmd('@', "Shut Down with Delayed Wake Up", Category::Action, ValueKind::Text, ""),
    cmd('\x7f', "Abort Shutdown", Category::Action, ValueKind::Text, ""),
    cmd('D', "Runtime Calibration", Category::Action, ValueKind::Text, ""),
    cmd('^', "Toggle Bypass", Category::Action, ValueKind::Text, ""),
    cmd('\x0e', "Turn UPS On", Category::TimedDouble, ValueKind::Text, ""),
    cmd('R', "Return to Simple Mode", Category::Action, ValueKind::Text, ""),
    // Status inquiry
    cmd('X', "Battery Test Result", Category::Inquiry, ValueKind::Text, ""),
    cmd('>', "Number of Battery Packs", Category::EditCycle, ValueKind::Numeric, ""),
    cmd('<', "Number of Bad Battery Packs", Category::Inquiry, ValueKind::Numeric, ""),
    cmd('G', "Transfer Cause", Category::Inquiry, ValueKind::Text, ""),
    cmd('V', "Firmware Version", Category::Inquiry, ValueKind::Text, ""),
    cmd('g', "Nominal Battery Voltage Rating", Category::Inquiry, ValueKind::Numeric, "V"),
    cmd('f', "Battery Capacity", Category::Inquiry, ValueKind::Numeric, "%"),
    cmd('9', "Acceptable Line Quality", Category::Inquiry, ValueKind::Text, ""),
    cmd('Q', "UPS Status Register", Category::Inquiry, ValueKind::Hex, ""),
    cmd('~', "State Register", Category::Inquiry, ValueKind::Hex, ""),
    cmd('\'', "Trip1 Register", Category::Inquiry, ValueKind::Hex, ""),
    cmd('8', "Trip Register", Category::Inquiry, ValueKind::Hex, ""),
    cmd('7', "DIP Switch Position", Category::Inquiry, ValueKind::Hex, ""),
    cmd('n', "UPS Serial Number", Category::Inquiry, ValueKind::Text, ""),
    cmd('m', "UPS Manufacture Date", Category::Inquiry, ValueKind::Date, ""),
    cmd('j', "Runtime Remaining", Category::Inquiry, ValueKind::Numeric, "min"),
    cmd('y', "Copyright", Category::Inquiry, ValueKind::Text, ""),
    cmd('a', "All Commands Available", Category::Inquiry, ValueKind::Text, ""),
    cmd('b', "Version in Decimal", Category::Inquiry, ValueKind::Text, ""),
    cmd('\x01', "UPS Model", Category::Inquiry, ValueKind::Text, ""),
    // Smart constants (battery discharge curve, model specific)
    cmd('0', "Battery Constant (Runtime)", Category::SmartConstant, ValueKind::Text, ""),
    cmd('4', "Battery Constant (Low)", Category::SmartConstant, ValueKind::Text, ""),
    cmd('5', "Battery Constant (Mid)", Category::SmartConstant, ValueKind::Text, ""),
    cmd('6', "Battery Constant (High)", Category::SmartConstant, ValueKind::Text, ""),
    // Power inquiry
    cmd('/', "Load Current", Category::Inquiry, ValueKind::Numeric, "A"),
    cmd('\\', "Apparent Load Power", Category::Inquiry, ValueKind::Numeric, "%"),
    cmd('B', "Battery Voltage", Category::Inquiry, ValueKind::Numeric, "V"),
    cmd('C', "Internal Temperature", Category::Inquiry, ValueKind::Numeric, "C"),
    cmd('F', "Line Frequency", Category::Inquiry, ValueKind::Numeric, "Hz"),
    cmd('L', "Line Voltage", Category::Inquiry, ValueKind::Numeric, "V"),
    cmd('M', "Maximum Line Voltage", Category::Inquiry, ValueKind::Numeric, "V"),
    cmd('N', "Minimum Line Voltage", Category::Inquiry, ValueKind::Numeric, "V"),
    cmd('O', "Output Voltage", Category::Inquiry, ValueKind::Numeric, "V"),
    cmd('P', "Load Power", Category::Inquiry, ValueKind::Numeric, "%"),
    // Customizing
    cmd('\x1a', "Read All EEPROM Parameters", Category::Inquiry, ValueKind::Text, ""),
    cmd('z', "Reset EEPROM to Factory Defaults", Category::Action, ValueKind::Text, ""),
    cmd('-', "Edit (advance EEPROM value)", Category::Action, ValueKind::Text, ""),
    cmd('E', "Automatic Battery Test Interval", Category::EditCycle, ValueKind::Text, "Hr"),
    cmd('c', "UPS ID", Category::EditDirect, ValueKind::Text, ""),
    cmd('x', "Battery Replacement Date", Category::EditDirect, ValueKind::Date, ""),
    cmd('u', "Upper Transfer Voltage", Category::EditCycle, ValueKind::Numeric, "V"),
    cmd('l', "Lower Transfer Voltage", Category::EditCycle, ValueKind::Numeric, "V"),
    cmd('e', "Minimum Battery Capacity to Restart", Category::EditCycle, ValueKind::Numeric, "%"),
    cmd('o', "Output Voltage Setting", Category::EditCycle, ValueKind::Numeric, "V"),
    cmd('s', "Utility Failure Sensitivity", Category::EditCycle, ValueKind::Text, ""),
    cmd('q', "Low Battery Warning", Category::EditCycle, ValueKind::Numeric, "min"),
    cmd('k', "Audible Alarm Control", Category::EditCycle, ValueKind::Text, ""),
    cmd('p', "Shutdown Delay", Category::EditCycle, ValueKind::Numeric, "sec"),
    cmd('r', "Turn On Delay", Category::EditCycle, ValueKind::Numeric, "sec"),
];

/// PROG-mode command table. `R` here saves to EEPROM; the context
/// separation from normal-mode `R` is enforced by the PROG controller's
/// state, this table only documents the PROG meanings.
pub static PROG_COMMANDS: &[CommandDef] = &[
    cmd('+', "Nudge Calibration Up", Category::Prog, ValueKind::Numeric, ""),
    cmd('-', "Nudge Calibration Down", Category::Prog, ValueKind::Numeric, ""),
    cmd('R', "Save Calibration to EEPROM", Category::Prog, ValueKind::Text, ""),
    cmd('\x1b', "Exit PROG Mode", Category::Prog, ValueKind::Text, ""),
    cmd('L', "Line Voltage", Category::Prog, ValueKind::Numeric, "V"),
    cmd('O', "Output Voltage", Category::Prog, ValueKind::Numeric, "V"),
    cmd('B', "Battery Voltage", Category::Prog, ValueKind::Numeric, "V"),
];

/// Commands polled at the fast cadence (about every 2 s).
pub const FAST_POLL_CMDS: &[char] = &['f', 'B', 'P', 'L', 'O', 'Q'];

/// Commands polled at the slow cadence (about every 10 s). The fault
/// registers ride here so the register snapshot stays current.
pub const SLOW_POLL_CMDS: &[char] = &['C', 'F', 'j', 'M', 'N', '~', '\'', '8'];

/// Commands read once after connecting and never re-polled unless reset.
pub const ONCE_CMDS: &[char] = &[
    '\x01', 'V', 'b', 'n', 'm', 'g', 'y', 'G', 'X', '>', '<', '7', '0', '4', '5', '6', 'E', 'c',
    'x', 'u', 'l', 'e', 'o', 's', 'q', 'k', 'p', 'r',
];

/// Editable-setting commands re-read after a factory reset.
pub const SETTING_CMDS: &[char] = &[
    'E', 'c', 'x', 'u', 'l', 'e', 'o', 's', 'q', 'k', 'p', 'r', '>',
];

/// Register commands re-read by a register refresh.
pub const REGISTER_CMDS: &[char] = &['Q', '~', '\'', '8', 'G', 'X'];

/// Look up a command definition by mode and character.
pub fn lookup(mode: CommandMode, code: char) -> Option<&'static CommandDef> {
    let table = match mode {
        CommandMode::Normal => NORMAL_COMMANDS,
        CommandMode::Prog => PROG_COMMANDS,
    };
    table.iter().find(|def| def.code == code)
}

/// Look up a normal-mode command, failing with a parse error for unknown
/// characters so callers can surface the offending code.
pub fn normal_command(code: char) -> Result<&'static CommandDef> {
    lookup(CommandMode::Normal, code)
        .ok_or_else(|| UpsError::Parse(format!("unknown command character {code:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn no_duplicate_codes_within_a_mode() {
        for table in [NORMAL_COMMANDS, PROG_COMMANDS] {
            let mut seen = HashSet::new();
            for def in table {
                assert!(seen.insert(def.code), "duplicate code {:?}", def.code);
            }
        }
    }

    #[test]
    fn r_has_distinct_meanings_per_mode() {
        let normal = lookup(CommandMode::Normal, 'R').unwrap();
        let prog = lookup(CommandMode::Prog, 'R').unwrap();
        assert_eq!(normal.name, "Return to Simple Mode");
        assert_eq!(prog.name, "Save Calibration to EEPROM");
    }

    #[test]
    fn poll_lists_resolve_in_the_catalog() {
        for &code in FAST_POLL_CMDS
            .iter()
            .chain(SLOW_POLL_CMDS)
            .chain(ONCE_CMDS)
            .chain(SETTING_CMDS)
            .chain(REGISTER_CMDS)
        {
            assert!(
                lookup(CommandMode::Normal, code).is_some(),
                "command {code:?} missing from catalog"
            );
        }
    }

    #[test]
    fn numeric_parse_strips_runtime_colon() {
        assert_eq!(parse_numeric("0120:"), Some(120.0));
        assert_eq!(parse_numeric("222.4"), Some(222.4));
        assert_eq!(parse_numeric("abc"), None);
    }

    #[test]
    fn value_kind_parses_numeric_with_text_fallback() {
        assert_eq!(
            ValueKind::Numeric.parse("055.35"),
            ParsedValue::Number(55.35)
        );
        assert_eq!(
            ValueKind::Text.parse(" MWI "),
            ParsedValue::Text("MWI".to_string())
        );
        assert_eq!(
            ValueKind::Numeric.parse("NA"),
            ParsedValue::Text("NA".to_string())
        );
    }

    #[test]
    fn editable_categories_match_the_edit_protocols() {
        assert_eq!(
            lookup(CommandMode::Normal, 'c').unwrap().category,
            Category::EditDirect
        );
        assert_eq!(
            lookup(CommandMode::Normal, 'E').unwrap().category,
            Category::EditCycle
        );
        assert_eq!(
            lookup(CommandMode::Normal, 'K').unwrap().category,
            Category::TimedDouble
        );
    }
}
