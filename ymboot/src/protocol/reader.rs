//! Per-byte timed access to the transport.

use std::time::Duration;

use log::trace;

use crate::error::Result;
use crate::port::Transport;

/// Time allowed for each byte to arrive.
///
/// The STM32 bootloader this engine targets waits 5 s per byte even though
/// its comments claimed 30 s; the code value is the one kept.
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Reads single bytes with a fixed deadline and writes reply bytes.
///
/// Nothing is retried here: a timeout surfaces as [`crate::Error::Timeout`].
pub struct TimedByteReader<T: Transport> {
    link: T,
    timeout: Duration,
}

impl<T: Transport> TimedByteReader<T> {
    /// Create a reader with the given per-byte timeout.
    pub fn new(link: T, timeout: Duration) -> Self {
        Self { link, timeout }
    }

    /// Per-byte timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Receive one byte or time out.
    pub fn receive_byte(&mut self) -> Result<u8> {
        self.link
            .read_byte(self.timeout)
    }

    /// Send one byte. No acknowledgment exists at this layer.
    pub fn send_byte(&mut self, byte: u8) -> Result<()> {
        trace!("-> 0x{byte:02X}");
        self.link
            .write_byte(byte)
    }

    /// Release the underlying transport.
    pub fn into_inner(self) -> T {
        self.link
    }
}
