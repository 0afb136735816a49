//! # ymboot
//!
//! YMODEM receive engine for serial bootloaders.
//!
//! This crate provides the pieces of a bootloader that takes a firmware
//! image over a serial line and starts it:
//!
//! - A packet-level YMODEM receiver with ACK/NAK/CAN replies
//! - Size field parsing for the filename packet (decimal, k/M suffix, hex)
//! - A flash collaborator interface with RAM-backed and no-op backends
//! - Vector-table reading and validation for the Cortex-M handoff
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use ymboot::{PlatformConfig, RamFlash, YmodemReceiver};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         use ymboot::{NativePort, SerialConfig, StreamTransport};
//!
//!         let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!         let platform = PlatformConfig::default();
//!         // Bootloader area plus the firmware region.
//!         let size = u64::from(platform.firmware_offset) + platform.flash_size;
//!         let mut flash = RamFlash::new(platform.base_address, usize::try_from(size)?);
//!
//!         let mut receiver =
//!             YmodemReceiver::new(StreamTransport::new(port), &mut flash, platform);
//!         let outcome = receiver.receive_file(|written, total| {
//!             println!("{written}/{total:?}");
//!         })?;
//!         println!("{outcome:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootloader;
pub mod error;
pub mod flash;
pub mod handoff;
pub mod platform;
pub mod port;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    bootloader::{BootReport, Bootloader},
    error::{Error, Result},
    flash::{FlashReader, FlashWriter, NullFlash, RamFlash},
    handoff::{Launcher, VectorTable, boot},
    platform::PlatformConfig,
    port::{Port, PortEnumerator, PortInfo, SerialConfig, StreamTransport, Transport},
    protocol::ymodem::{
        FailureReason, ReceiveOutcome, RetryPolicy, SessionState, TooLargePolicy,
        TransferSummary, YmodemConfig, YmodemReceiver,
    },
};
