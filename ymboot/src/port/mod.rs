//! Port abstraction for the serial link the bootloader listens on.
//!
//! The receive engine never talks to a port directly. It consumes the
//! byte-level [`Transport`] capability, which any `Read + Write` stream
//! provides through [`StreamTransport`]:
//!
//! ```text
//! +------------------+
//! |  Receive engine  |
//! |    (ymodem)      |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  Transport trait |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+     +------------------+
//! | StreamTransport  | --> | NativePort       |
//! |  (Read + Write)  |     |  (serialport)    |
//! +------------------+     +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ymboot::port::{StreamTransport, Transport};
//!
//! fn example<P: std::io::Read + std::io::Write>(port: P) -> ymboot::Result<()> {
//!     let mut link = StreamTransport::new(port);
//!     let byte = link.read_byte(Duration::from_secs(5))?;
//!     link.write_byte(byte)?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of a single underlying read call.
    ///
    /// Kept short: the per-byte deadline of the protocol is enforced by
    /// [`StreamTransport`], which polls until it expires.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(20),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Serial port with the controls the bootloader host tooling needs.
pub trait Port: Read + Write + Send {
    /// Drop stale bytes in both directions before a session starts.
    fn clear_buffers(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

/// Full-duplex byte channel consumed by the receive engine.
pub trait Transport {
    /// Wait up to `timeout` for one byte.
    ///
    /// Returns [`Error::Timeout`] when nothing arrived in time. Other errors
    /// are hard faults of the link.
    fn read_byte(&mut self, timeout: Duration) -> Result<u8>;

    /// Send one byte immediately, regardless of pending reads.
    fn write_byte(&mut self, byte: u8) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        (**self).read_byte(timeout)
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        (**self).write_byte(byte)
    }
}

/// [`Transport`] over any `Read + Write` byte stream.
///
/// Reads are polled until the deadline passes. `TimedOut`, `WouldBlock`,
/// `Interrupted` and empty reads all mean "nothing yet".
pub struct StreamTransport<P: Read + Write> {
    inner: P,
}

impl<P: Read + Write> StreamTransport<P> {
    /// Wrap a stream.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &P {
        &self.inner
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Read + Write> Transport for StreamTransport<P> {
    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1];

        loop {
            match self.inner.read(&mut buf) {
                Ok(1) => return Ok(buf[0]),
                Ok(_) => {},
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }

            if Instant::now() >= deadline {
                trace!("read_byte: no data within {timeout:?}");
                return Err(Error::Timeout(format!("no byte within {timeout:?}")));
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.inner.write_all(&[byte])?;
        self.inner.flush()?;
        Ok(())
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Stream that reports `TimedOut` once drained, like a serial port.
    struct MockSerial {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
    }

    impl Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.read_buf.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                },
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn mock(bytes: &[u8]) -> MockSerial {
        MockSerial {
            read_buf: bytes.iter().copied().collect(),
            write_buf: Vec::new(),
        }
    }

    #[test]
    fn test_stream_transport_reads_in_order() {
        let mut link = StreamTransport::new(mock(&[0x01, 0x02]));
        assert_eq!(link.read_byte(Duration::from_millis(10)).unwrap(), 0x01);
        assert_eq!(link.read_byte(Duration::from_millis(10)).unwrap(), 0x02);
    }

    #[test]
    fn test_stream_transport_times_out_when_empty() {
        let mut link = StreamTransport::new(mock(&[]));
        let start = Instant::now();
        let err = link.read_byte(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stream_transport_hard_error_propagates() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::BrokenPipe, "gone"))
            }
        }
        impl Write for Broken {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut link = StreamTransport::new(Broken);
        let err = link.read_byte(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_stream_transport_writes_immediately() {
        let mut link = StreamTransport::new(mock(&[]));
        link.write_byte(0x06).unwrap();
        link.write_byte(0x43).unwrap();
        assert_eq!(link.into_inner().write_buf, vec![0x06, 0x43]);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0", 921600).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert!(config.port_name.is_empty());
    }
}
