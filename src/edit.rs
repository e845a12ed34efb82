//! EEPROM edit controller.
//!
//! Three write paths, selected by the setting's definition:
//!
//! - **Cycle-edit**: read the current value, then repeat "command
//!   character, `-`" until the device has advanced its EEPROM slot to the
//!   target, and re-read to verify. The allowed-value cycle wraps, so the
//!   step count is `(target_index - current_index) mod len`.
//! - **Direct-edit** (UPS ID, battery replacement date): command, `-`,
//!   then the literal 8-character value, expecting `OK`.
//! - **Battery packs** (`>`): the raw counter is stepped with `+`/`-`
//!   over 0-255, taking the shorter direction.
//!
//! Every path runs under a single transport session with polling
//! suspended, and finishes with a read-back. EEPROM writes are not
//! transactional on the device: a failure mid-sequence can leave it at an
//! intermediate allowed value, which is surfaced, never rolled back.

use crate::constants::{
    BATTERY_PACKS_MODULUS, DIRECT_EDIT_CHAR_DELAY, DIRECT_EDIT_LEN, EEPROM_WRITE_DELAY,
};
use crate::error::{Result, UpsError};
use crate::protocol::{Exchange, ProtocolEngine};
use crate::settings::{count_edits_needed, EditableSetting};

/// Replies the device uses to refuse an edit.
fn is_rejection(response: &str) -> bool {
    matches!(response, "NA" | "NO")
}

/// Drive one setting to `target`, returning the verified stored value.
pub fn change_setting(
    engine: &ProtocolEngine,
    setting: &EditableSetting,
    target: &str,
) -> Result<String> {
    if !engine.is_smart_mode() {
        return Err(UpsError::NotInSmartMode {
            command: setting.code,
        });
    }
    log::info!("Changing {} to {target:?}", setting.name);
    let mut ex = engine.session();
    let result = if setting.code == '>' {
        adjust_battery_packs(engine, &mut ex, target)
    } else if setting.direct {
        direct_edit(engine, &mut ex, setting, target)
    } else {
        cycle_edit(engine, &mut ex, setting, target)
    };
    match &result {
        Ok(value) => log::info!("{} now {value:?}", setting.name),
        Err(e) => log::warn!("{} change failed: {e}", setting.name),
    }
    result
}

/// One edit step: per the UPS-Link contract the `-` must directly follow
/// the customizing command character. Returns the value echoed after the
/// advance.
fn cycle_step(engine: &ProtocolEngine, ex: &mut Exchange<'_>, code: char) -> Result<String> {
    ex.command_char(code)?;
    ex.write(b"-")?;
    let advanced = ex.read_terminated(code)?;
    if is_rejection(&advanced) {
        return Err(UpsError::WriteRejected { response: advanced });
    }
    engine.clock().sleep(EEPROM_WRITE_DELAY);
    Ok(advanced)
}

fn cycle_edit(
    engine: &ProtocolEngine,
    ex: &mut Exchange<'_>,
    setting: &EditableSetting,
    target: &str,
) -> Result<String> {
    let current = ex.command_char(setting.code)?;
    if current == target {
        return Ok(current);
    }

    let steps = count_edits_needed(setting, &current, target).ok_or_else(|| {
        UpsError::InvalidValue {
            setting: setting.key.to_string(),
            value: target.to_string(),
        }
    })?;
    log::debug!(
        "{}: {current:?} -> {target:?} in {steps} edit steps",
        setting.name
    );

    for _ in 0..steps {
        cycle_step(engine, ex, setting.code)?;
    }

    // Read back: the device, not our step count, is the authority.
    let stored = ex.command_char(setting.code)?;
    if stored == target {
        Ok(stored)
    } else {
        Err(UpsError::VerificationFailed {
            expected: target.to_string(),
            actual: stored,
        })
    }
}

fn direct_edit(
    engine: &ProtocolEngine,
    ex: &mut Exchange<'_>,
    setting: &EditableSetting,
    target: &str,
) -> Result<String> {
    if target.len() != DIRECT_EDIT_LEN || !target.is_ascii() {
        return Err(UpsError::InvalidValue {
            setting: setting.key.to_string(),
            value: target.to_string(),
        });
    }

    let current = ex.command_char(setting.code)?;
    log::debug!("{} currently {current:?}", setting.name);

    ex.write(b"-")?;
    let edit_ack = ex.read_terminated(setting.code)?;
    if is_rejection(&edit_ack) {
        return Err(UpsError::WriteRejected { response: edit_ack });
    }

    for byte in target.bytes() {
        ex.write(&[byte])?;
        engine.clock().sleep(DIRECT_EDIT_CHAR_DELAY);
    }

    let response = ex.read_terminated(setting.code)?;
    if response == "OK" {
        Ok(target.to_string())
    } else {
        Err(UpsError::WriteRejected { response })
    }
}

/// The external battery pack counter is a raw byte stepped with `+`/`-`,
/// each adjustment preceded by a fresh `>` inquiry. The shorter wrap
/// direction wins.
fn adjust_battery_packs(
    engine: &ProtocolEngine,
    ex: &mut Exchange<'_>,
    target: &str,
) -> Result<String> {
    let target_num: i32 = target.trim().parse().map_err(|_| UpsError::InvalidValue {
        setting: "battery_packs".to_string(),
        value: target.to_string(),
    })?;
    if !(0..BATTERY_PACKS_MODULUS).contains(&target_num) {
        return Err(UpsError::InvalidValue {
            setting: "battery_packs".to_string(),
            value: target.to_string(),
        });
    }
    let target_str = format!("{target_num:03}");

    let current = ex.command_char('>')?;
    let current_num: i32 = current.trim().parse().map_err(|_| UpsError::Parse(format!(
        "battery packs inquiry returned {current:?}"
    )))?;
    if current_num == target_num {
        return Ok(current);
    }

    let dec_steps = (current_num - target_num).rem_euclid(BATTERY_PACKS_MODULUS);
    let inc_steps = (target_num - current_num).rem_euclid(BATTERY_PACKS_MODULUS);
    let (direction, steps) = if inc_steps <= dec_steps {
        (b'+', inc_steps)
    } else {
        (b'-', dec_steps)
    };
    log::debug!(
        "Battery packs: {current_num} -> {target_num} ({steps} x {:?})",
        direction as char
    );

    for _ in 0..steps {
        ex.command_char('>')?;
        ex.write(&[direction])?;
        let adjusted = ex.read_terminated('>')?;
        if is_rejection(&adjusted) {
            return Err(UpsError::WriteRejected { response: adjusted });
        }
        engine.clock().sleep(EEPROM_WRITE_DELAY);
    }

    let stored = ex.command_char('>')?;
    if stored == target_str {
        Ok(stored)
    } else {
        Err(UpsError::VerificationFailed {
            expected: target_str,
            actual: stored,
        })
    }
}
