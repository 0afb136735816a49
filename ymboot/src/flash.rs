//! Flash collaborator interface.
//!
//! The receive engine erases the firmware region once the filename packet
//! has been accepted, then programs each data packet in order. Both calls
//! complete before the next packet is read.

use log::trace;

use crate::error::{Error, Result};

/// Erase/program capability consumed by the receive engine.
pub trait FlashWriter {
    /// Erase the firmware region starting at `address`.
    fn erase(&mut self, address: u32) -> Result<()>;

    /// Program `data` at `address`.
    fn program(&mut self, address: u32, data: &[u8]) -> Result<()>;
}

/// Read access used by the boot handoff.
pub trait FlashReader {
    /// Fill `buf` with the flash contents at `address`.
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<()>;
}

impl<F: FlashWriter + ?Sized> FlashWriter for &mut F {
    fn erase(&mut self, address: u32) -> Result<()> {
        (**self).erase(address)
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        (**self).program(address, data)
    }
}

/// Flash backend that accepts everything and stores nothing.
///
/// Useful for dry runs on targets without a flash driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFlash;

impl FlashWriter for NullFlash {
    fn erase(&mut self, address: u32) -> Result<()> {
        trace!("erase @ 0x{address:08X} (discarded)");
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        trace!("program {} bytes @ 0x{address:08X} (discarded)", data.len());
        Ok(())
    }
}

/// Erased flash cell value.
pub const ERASED_BYTE: u8 = 0xFF;

/// RAM-backed flash region, bounds-checked on every access.
#[derive(Debug, Clone)]
pub struct RamFlash {
    base: u32,
    cells: Vec<u8>,
}

impl RamFlash {
    /// Create an erased region of `size` bytes mapped at `base`.
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            cells: vec![ERASED_BYTE; size],
        }
    }

    /// Create a region pre-loaded with `contents`.
    pub fn with_contents(base: u32, contents: Vec<u8>) -> Self {
        Self {
            base,
            cells: contents,
        }
    }

    /// Start address of the region.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Whole region.
    pub fn contents(&self) -> &[u8] {
        &self.cells
    }

    /// Bytes from `address` to the end of the region.
    pub fn slice_from(&self, address: u32) -> Result<&[u8]> {
        let start = self.offset(address, 0)?;
        Ok(&self.cells[start..])
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize> {
        let start = address
            .checked_sub(self.base)
            .map(|o| o as usize)
            .filter(|&o| o <= self.cells.len())
            .ok_or_else(|| {
                Error::Flash(format!("address 0x{address:08X} outside flash region"))
            })?;
        if len > self.cells.len() - start {
            return Err(Error::Flash(format!(
                "{len} bytes at 0x{address:08X} exceed flash region"
            )));
        }
        Ok(start)
    }
}

impl FlashWriter for RamFlash {
    fn erase(&mut self, address: u32) -> Result<()> {
        let start = self.offset(address, 0)?;
        self.cells[start..].fill(ERASED_BYTE);
        trace!(
            "erased {} bytes @ 0x{address:08X}",
            self.cells.len() - start
        );
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let start = self.offset(address, data.len())?;
        self.cells[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl FlashReader for RamFlash {
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<()> {
        let start = self.offset(address, buf.len())?;
        buf.copy_from_slice(&self.cells[start..start + buf.len()]);
        Ok(())
    }
}
