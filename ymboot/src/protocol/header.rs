//! Packet 0: file name and declared size.
//!
//! Format: `name\0size[ mtime mode ...]`, padded with NULs. Only the name
//! and the size are used.

use log::{debug, warn};

use crate::protocol::numeric::parse_magnitude;

/// Longest file name kept, in bytes.
pub const FILE_NAME_LENGTH: usize = 256;

/// Longest size field scanned, in bytes.
pub const FILE_SIZE_LENGTH: usize = 16;

/// Contents of an accepted filename packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// File name as sent (non-ASCII bytes replaced).
    pub name: String,
    /// Declared size, `None` when the field is missing or unparseable.
    pub size: Option<u64>,
}

/// Why a filename packet was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRejection {
    /// The name is empty: the sender has no (more) files.
    EmptyName,
    /// The declared size does not fit in flash.
    TooLarge {
        /// Declared size.
        size: u64,
        /// Flash capacity.
        capacity: u64,
    },
}

impl std::fmt::Display for HeaderRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => f.write_str("empty file name"),
            Self::TooLarge { size, capacity } => {
                write!(f, "file of {size} bytes exceeds flash capacity of {capacity}")
            },
        }
    }
}

/// Parse the payload of packet 0 and check the size against `capacity`.
pub fn parse_file_header(payload: &[u8], capacity: u64) -> Result<FileHeader, HeaderRejection> {
    if payload.first().is_none_or(|&b| b == 0) {
        return Err(HeaderRejection::EmptyName);
    }

    let name_len = payload
        .iter()
        .take(FILE_NAME_LENGTH)
        .position(|&b| b == 0)
        .unwrap_or(payload.len().min(FILE_NAME_LENGTH));
    let name = String::from_utf8_lossy(&payload[..name_len]).into_owned();

    // The size field starts right after the name's terminator.
    let field_start = (name_len + 1).min(payload.len());
    let field: &[u8] = &payload[field_start..];
    let field_len = field
        .iter()
        .take(FILE_SIZE_LENGTH)
        .position(|&b| b == b' ')
        .unwrap_or(field.len().min(FILE_SIZE_LENGTH));
    let field = &field[..field_len];

    let size = parse_magnitude(field);
    if size.is_none() {
        warn!(
            "Unparseable size field {:?} for '{name}'",
            String::from_utf8_lossy(field)
        );
    }

    if let Some(size) = size {
        if size > capacity {
            return Err(HeaderRejection::TooLarge { size, capacity });
        }
    }

    debug!("File header: '{name}' ({size:?} bytes)");
    Ok(FileHeader { name, size })
}
