// src/io/serial/endpoint.rs
//
// The duplex byte-channel seam between the bridge core and the serial
// transport. Bridge workers poll, read, and write through this trait; tests
// substitute in-memory endpoints.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::io::IoError;

use super::utils::{to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, Parity};

/// An open, byte-oriented duplex channel.
///
/// The core treats this as opaque bytes: no baud/parity negotiation happens
/// here beyond what the open call configured. Implementations must report
/// failures instead of blocking — `bytes_to_read` and `read_available` are
/// polled from a timing-sensitive loop.
pub trait Endpoint: Send {
    /// Device identifier (for error and log context)
    fn name(&self) -> &str;

    /// Number of bytes currently waiting, without blocking
    fn bytes_to_read(&mut self) -> Result<usize, IoError>;

    /// Read up to `buf.len()` already-waiting bytes. Returns the count read.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Write the whole payload to the device
    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError>;

    fn is_open(&self) -> bool;
}

/// Endpoint handle shared between the supervisor and the worker pair.
/// Each worker locks only for the duration of one read or one write, never
/// across its poll sleep.
pub type SharedEndpoint = Arc<Mutex<Box<dyn Endpoint>>>;

// ============================================================================
// Serial Implementation
// ============================================================================

/// `Endpoint` over a real serial port
pub struct SerialEndpoint {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl Endpoint for SerialEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_to_read(&mut self) -> Result<usize, IoError> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| IoError::read(&self.name, e.to_string()))
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        use std::io::Read;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // Timeout with bytes already reported waiting should not happen,
            // but treat it as an empty read rather than a fault
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(IoError::read(&self.name, e.to_string())),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        use std::io::Write;
        self.port
            .write_all(data)
            .and_then(|_| self.port.flush())
            .map_err(|e| IoError::write(&self.name, e.to_string()))
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Open a serial port as a shared endpoint.
///
/// The short read timeout only bounds the drain of bytes the poll already
/// reported waiting; the worker loop never issues a speculative blocking
/// read.
pub fn open_port(
    path: &str,
    baud: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: &Parity,
) -> Result<SharedEndpoint, IoError> {
    let port = serialport::new(path, baud)
        .data_bits(to_serialport_data_bits(data_bits))
        .stop_bits(to_serialport_stop_bits(stop_bits))
        .parity(to_serialport_parity(parity))
        .timeout(Duration::from_millis(1))
        .open()
        .map_err(|e| IoError::port_unavailable(path, e.to_string()))?;

    tlog!("[serial] Opened {} at {} baud", path, baud);

    Ok(Arc::new(Mutex::new(Box::new(SerialEndpoint {
        name: path.to_string(),
        port,
    }) as Box<dyn Endpoint>)))
}
