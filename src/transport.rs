//! Byte-level serial channel for UPS-Link communication.
//!
//! The [`Transport`] trait is the seam between the protocol engine and the
//! physical port: the engine only ever writes bytes and reads single bytes
//! with a timeout. [`SerialTransport`] is the production implementation
//! over a real serial port; `mock::MockUps` implements the same trait for
//! tests and development without hardware.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::constants::{BAUD_RATE, READ_TIMEOUT};
use crate::error::{Result, UpsError};

/// Byte-level channel to the UPS. All operations on one transport are
/// serialized by the protocol engine's lock; implementations do not need
/// their own synchronization.
pub trait Transport: Send {
    /// Write raw bytes to the device.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read a single byte, waiting up to `timeout`. Returns `Ok(None)` if
    /// no byte arrived within the window.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;

    /// Discard any unread bytes in the input buffer.
    fn flush_input(&mut self) -> Result<()>;
}

/// Production transport over a physical serial port, opened with UPS-Link
/// framing: 2400 baud, 8 data bits, no parity, 1 stop bit, no flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open the named port with UPS-Link parameters. Open failures are
    /// reported as [`UpsError::PortUnavailable`] and are fatal to the
    /// session; the port is closed automatically when the transport drops.
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| UpsError::PortUnavailable {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(SerialTransport { port })
    }

    /// List available serial ports.
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)?;
        }
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Time source for the protocol's mandatory multi-second waits (PROG entry,
/// timed-double gap). Abstracted so the timing contracts can be tested
/// against a manually advanced clock.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block for the given duration.
    fn sleep(&self, dur: Duration);
}

/// Wall clock backed by `std::time` and `std::thread::sleep`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}
