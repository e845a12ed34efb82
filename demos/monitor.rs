//! Live Monitoring Example
//!
//! Connects to a Smart-UPS, starts the poll cadences and prints the state
//! and any asynchronous alerts for thirty seconds.
//!
//! Usage:
//!   cargo run --example monitor                  # Interactive port selection
//!   cargo run --example monitor -- /dev/ttyUSB0  # Specify port
//!   cargo run --example monitor -- mock          # Run against the built-in mock
//!
//! Set RUST_LOG to control logging:
//!   RUST_LOG=debug cargo run --example monitor

use inquire::Select;
use log::info;
use std::time::Duration;
use upslink::mock::MockUps;
use upslink::{Result, UpsManager};

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = UpsManager::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    let port_name = selection.split(" - ").next().unwrap().to_string();
    Ok(port_name)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    let mut ups = UpsManager::new();
    if port_name == "mock" {
        info!("Connecting to the built-in mock UPS...");
        ups.connect_with(Box::new(MockUps::new()), "mock")?;
    } else {
        info!("Connecting to UPS on {}...", port_name);
        ups.connect(&port_name)?;
    }

    let alert_rx = ups.subscribe_alerts();

    // Give the one-time pass a moment to fill in the identity fields.
    std::thread::sleep(Duration::from_secs(2));
    let state = ups.snapshot();
    info!("Model:    {}", state.model);
    info!("Firmware: {}", state.firmware);
    if let Some(family) = upslink::constants::firmware_model(&state.firmware) {
        info!("Family:   {}", family);
    }
    if let Some(voltage) = upslink::constants::firmware_voltage(&state.firmware) {
        info!("Voltage:  {}", voltage);
    }
    info!("Serial:   {}", state.serial_number);
    if let Some(result) = upslink::constants::test_result_label(&state.last_test_result) {
        info!("Last self-test: {}", result);
    }
    if let Some(cause) = upslink::constants::transfer_cause_label(&state.transfer_cause) {
        info!("Last transfer: {}", cause);
    }

    for _ in 0..15 {
        std::thread::sleep(Duration::from_secs(2));

        let state = ups.snapshot();
        println!(
            "in {:6.1} V  out {:6.1} V  batt {:5.2} V ({:5.1}%)  load {:5.1}%  flags {:?}",
            state.input_voltage,
            state.output_voltage,
            state.battery_voltage,
            state.battery_capacity,
            state.load_power,
            state.registers.status.flags,
        );

        while let Ok(event) = alert_rx.try_recv() {
            println!("ALERT: {}", event.alert.description());
        }
    }

    ups.disconnect();
    Ok(())
}
