//! Platform memory layout.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Flash layout of the target MCU.
///
/// Defaults describe an STM32F401 with the application linked at
/// `0x0800_8000` and its vector table at `0x0800_C000`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlatformConfig {
    /// Largest firmware image accepted, in bytes.
    pub flash_size: u64,
    /// Address at which flash is mapped.
    pub base_address: u32,
    /// Offset from `base_address` where received firmware is written.
    pub firmware_offset: u32,
    /// Offset from `base_address` of the firmware's vector table.
    pub vector_offset: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            flash_size: 256 * 1024,
            base_address: 0x0800_0000,
            firmware_offset: 0x8000,
            vector_offset: 0xC000,
        }
    }
}

impl PlatformConfig {
    /// First address written by a transfer.
    pub fn firmware_address(&self) -> u32 {
        self.base_address
            .wrapping_add(self.firmware_offset)
    }

    /// Address of the stack pointer / reset vector pair.
    pub fn vector_address(&self) -> u32 {
        self.base_address
            .wrapping_add(self.vector_offset)
    }
}
