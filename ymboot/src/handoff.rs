//! Transfer of control to the flashed firmware.
//!
//! A Cortex-M image starts with its vector table: the initial main stack
//! pointer followed by the reset handler address.
//!
//! ```text
//! +----------------+----------------+
//! | initial MSP    | reset vector   |
//! +----------------+----------------+
//! | u32 LE         | u32 LE (|1)    |
//! +----------------+----------------+
//! ```

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::flash::FlashReader;
use crate::platform::PlatformConfig;

/// Size of the stack pointer / reset vector pair.
pub const VECTOR_TABLE_LEN: usize = 8;

/// The two leading words of a firmware vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VectorTable {
    /// Value loaded into MSP before the jump.
    pub initial_sp: u32,
    /// Entry point.
    pub reset_vector: u32,
}

impl VectorTable {
    /// Decode the pair from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VECTOR_TABLE_LEN {
            return Err(Error::InvalidImage(format!(
                "vector table needs {VECTOR_TABLE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut cursor = bytes;
        let initial_sp = cursor.read_u32::<LittleEndian>()?;
        let reset_vector = cursor.read_u32::<LittleEndian>()?;
        Ok(Self {
            initial_sp,
            reset_vector,
        })
    }

    /// Read the pair from flash at the platform's vector offset.
    pub fn read_from<R: FlashReader + ?Sized>(flash: &R, platform: &PlatformConfig) -> Result<Self> {
        let mut raw = [0u8; VECTOR_TABLE_LEN];
        flash.read(platform.vector_address(), &mut raw)?;
        Self::parse(&raw)
    }

    /// Reject erased, blank or obviously broken tables.
    pub fn validate(&self) -> Result<()> {
        for (what, word) in [("stack pointer", self.initial_sp), ("reset vector", self.reset_vector)] {
            if word == 0 || word == u32::MAX {
                return Err(Error::InvalidImage(format!(
                    "{what} is 0x{word:08X}, flash looks blank"
                )));
            }
        }
        if self.initial_sp % 4 != 0 {
            return Err(Error::InvalidImage(format!(
                "stack pointer 0x{:08X} is not word aligned",
                self.initial_sp
            )));
        }
        if self.reset_vector & 1 == 0 {
            return Err(Error::InvalidImage(format!(
                "reset vector 0x{:08X} lacks the Thumb bit",
                self.reset_vector
            )));
        }
        Ok(())
    }
}

/// Performs the jump.
///
/// On hardware an implementation sets MSP to `initial_sp`, stops the SysTick
/// timer and branches to `reset_vector`, never returning. Host tooling
/// implementations report what would have happened.
pub trait Launcher {
    /// Hand control to the firmware.
    fn launch(&mut self, vectors: VectorTable) -> Result<()>;
}

/// Read, validate and launch the image described by `platform`.
pub fn boot<R, L>(flash: &R, platform: &PlatformConfig, launcher: &mut L) -> Result<VectorTable>
where
    R: FlashReader + ?Sized,
    L: Launcher + ?Sized,
{
    let vectors = VectorTable::read_from(flash, platform)?;
    vectors.validate()?;
    debug!(
        "Jumping to 0x{:08X} with MSP 0x{:08X}",
        vectors.reset_vector, vectors.initial_sp
    );
    launcher.launch(vectors)?;
    Ok(vectors)
}
