//! Setting Change Example
//!
//! Lists the editable EEPROM settings, then drives one through the edit
//! cycle (or direct edit) with read-back verification.
//!
//! Usage:
//!   cargo run --example change_setting -- <port> <setting> <value>
//!   cargo run --example change_setting -- mock alarm_control T
//!   cargo run --example change_setting -- /dev/ttyUSB0 ups_id SERVER01
//!
//! Run without arguments to list the available settings.

use log::info;
use upslink::mock::MockUps;
use upslink::{DangerLevel, Result, UpsManager};

fn list_settings() {
    println!("{:<24} {:<4} {:<8} VALUES", "KEY", "CMD", "DANGER");
    for setting in UpsManager::settings() {
        let danger = match setting.danger {
            DangerLevel::Normal => "",
            DangerLevel::Caution => "caution",
            DangerLevel::Dangerous => "DANGER",
        };
        let values = if setting.direct {
            "(free text, 8 chars)".to_string()
        } else {
            setting
                .allowed
                .iter()
                .map(|v| {
                    let label = setting.label_for(v);
                    if label == *v {
                        format!("{v:?}")
                    } else {
                        format!("{v:?} ({label})")
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:<24} {:<4} {:<8} {}",
            setting.key, setting.code, danger, values
        );
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, key, value) = match args.as_slice() {
        [port, key, value] => (port.clone(), key.clone(), value.clone()),
        _ => {
            list_settings();
            return Ok(());
        }
    };

    let mut ups = UpsManager::new();
    if port == "mock" {
        ups.connect_with(Box::new(MockUps::new()), "mock")?;
    } else {
        ups.connect(&port)?;
    }

    info!("Changing {} to {:?}...", key, value);
    let stored = ups.change_setting(&key, &value)?;
    info!("Device now reports {:?}", stored);

    ups.disconnect();
    Ok(())
}
