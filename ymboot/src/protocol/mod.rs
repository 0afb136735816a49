//! Protocol implementations.

pub mod crc;
pub mod header;
pub mod numeric;
pub mod packet;
pub mod reader;
pub mod ymodem;

// Re-export common types
pub use header::{FileHeader, HeaderRejection, parse_file_header};
pub use numeric::parse_magnitude;
pub use packet::{Packet, PacketFault, PacketOutcome, encode_block, receive_packet};
pub use reader::{DEFAULT_BYTE_TIMEOUT, TimedByteReader};
pub use ymodem::DEFAULT_MAX_ERRORS;
