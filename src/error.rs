//! Error types for UPS-Link protocol operations.

use thiserror::Error;

/// Result type alias for UPS-Link operations.
pub type Result<T> = std::result::Result<T, UpsError>;

/// Error types for UPS-Link communication.
#[derive(Error, Debug)]
pub enum UpsError {
    /// Serial port could not be opened (busy, missing, or permission denied).
    /// Fatal to the session; the core never retries this.
    #[error("Port unavailable: {port}: {reason}")]
    PortUnavailable {
        /// Port name that failed to open
        port: String,
        /// Underlying reason reported by the OS
        reason: String,
    },

    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the command's allotted window
    #[error("Timeout waiting for response to command {command:?}")]
    Timeout {
        /// Command character that timed out
        command: char,
    },

    /// Received bytes don't match the expected response shape. Not retried
    /// automatically since it may indicate stream desynchronization.
    #[error("Unexpected response to {command:?}: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        /// Command character that was sent
        command: char,
        /// Expected response
        expected: String,
        /// Actual bytes received
        actual: String,
    },

    /// Command attempted before Smart Mode entry
    #[error("Command {command:?} sent before Smart Mode entry")]
    NotInSmartMode {
        /// Command character that was attempted
        command: char,
    },

    /// Second byte of a timed-double command, or the second PROG entry
    /// byte, issued before the mandatory gap elapsed
    #[error("Timing violation on {command:?}: {elapsed_ms} ms elapsed, {required_ms} ms required")]
    TimingViolation {
        /// Command character whose gap was violated
        command: char,
        /// Milliseconds actually elapsed since the first byte
        elapsed_ms: u64,
        /// Minimum milliseconds required between the two bytes
        required_ms: u64,
    },

    /// PROG mode entry did not return `PROG`
    #[error("PROG handshake failed: {actual}")]
    HandshakeFailed {
        /// What the device returned instead
        actual: String,
    },

    /// Operation requires an active PROG mode session
    #[error("Operation requires PROG mode")]
    NotInProgMode,

    /// Normal-mode operation attempted while PROG mode is active
    #[error("PROG mode is active")]
    ProgModeActive,

    /// Edit-cycle read-back after the final edit did not match the target.
    /// The device may be left at the non-target value reported in `actual`.
    #[error("Edit verification failed: expected {expected:?}, device reports {actual:?}")]
    VerificationFailed {
        /// Value the edit cycle was driving toward
        expected: String,
        /// Last value the device actually reported
        actual: String,
    },

    /// Direct edit or device action rejected (no `OK`, or `NA`/`NO` reply)
    #[error("Write rejected by device: {response:?}")]
    WriteRejected {
        /// The device's actual reply
        response: String,
    },

    /// No connection is established
    #[error("Not connected")]
    NotConnected,

    /// Setting key not present in the editable-setting catalog
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    /// Target value not in the setting's allowed-value sequence
    #[error("Value {value:?} not allowed for setting {setting}")]
    InvalidValue {
        /// Setting key
        setting: String,
        /// Offending target value
        value: String,
    },

    /// Data parsing error
    #[error("Parse error: {0}")]
    Parse(String),
}
