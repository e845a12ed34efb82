//! # UPS-Link Protocol Library
//!
//! A Rust library for monitoring and configuring APC Smart-UPS devices
//! over the serial UPS-Link protocol, including the unofficial PROG
//! service sub-protocol used for voltage calibration.
//!
//! ## Features
//!
//! - Full command catalog: 50+ documented commands plus the characterized
//!   undocumented smart constants
//! - Continuous polling on fast/slow cadences with a one-time identity pass
//! - Asynchronous alert demultiplexing: unsolicited single-byte
//!   notifications are captured even mid-response, in arrival order
//! - Safe EEPROM writes: cycle-edit and direct-edit with read-back
//!   verification
//! - Runtime battery calibration and PROG-mode voltage calibration as
//!   explicit state machines
//! - Status/State/Trip/Trip1 register bit decoding
//! - A scripted mock UPS for development without hardware
//!
//! ## Example
//!
//! ```no_run
//! use upslink::UpsManager;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut ups = UpsManager::new();
//!     ups.connect("/dev/ttyUSB0")?;
//!     std::thread::sleep(std::time::Duration::from_secs(3));
//!     let state = ups.snapshot();
//!     println!("Battery: {:.1}%  Load: {:.1}%", state.battery_capacity, state.load_power);
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod commands;
pub mod constants;
pub mod edit;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod poller;
pub mod prog;
pub mod protocol;
pub mod registers;
pub mod settings;
pub mod state;
pub mod transport;

pub use calibration::{CalibrationSession, CalibrationState, StartCheck};
pub use error::{Result, UpsError};
pub use events::{Alert, AlertEvent, AlertLog};
pub use manager::{BypassTransition, UpsManager};
pub use prog::{Nudge, ProgMeasurement, ProgState};
pub use registers::{RegisterKind, RegisterSnapshot};
pub use settings::{DangerLevel, EditableSetting};
pub use state::{PollTier, UpsState};
