//! YMODEM packet framing and the packet assembler.
//!
//! ```text
//! +---------+-----+------+-----------------+---------+
//! | SOH/STX | SEQ | ~SEQ | DATA (128/1024) | TRAILER |
//! +---------+-----+------+-----------------+---------+
//! | 1       | 1   | 1    | 128 or 1024     | 2       |
//! +---------+-----+------+-----------------+---------+
//! ```
//!
//! The trailer is a big-endian CRC16-XMODEM. By default it is only consumed;
//! full verification is opt-in.

use log::{debug, trace};

use crate::error::Result;
use crate::port::Transport;
use crate::protocol::crc::crc16_xmodem;
use crate::protocol::reader::TimedByteReader;

/// YMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel. Two in succession abort the transfer.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// User abort ('A').
    pub const ABORT1: u8 = b'A';
    /// User abort ('a').
    pub const ABORT2: u8 = b'a';
    /// Padding used by senders after the last data byte.
    pub const CPMEOF: u8 = 0x1A;
}

/// Block size for SOH packets.
pub const SOH_BLOCK_SIZE: usize = 128;

/// Block size for STX packets (YMODEM-1K).
pub const STX_BLOCK_SIZE: usize = 1024;

/// Control byte plus the sequence pair.
pub const HEADER_LEN: usize = 3;

/// CRC16 trailer length.
pub const TRAILER_LEN: usize = 2;

/// One received data-bearing packet.
#[derive(Clone)]
pub struct Packet {
    control: u8,
    sequence: u8,
    sequence_complement: u8,
    data: [u8; STX_BLOCK_SIZE],
    len: usize,
    trailer: [u8; TRAILER_LEN],
}

impl Packet {
    fn empty(control: u8, len: usize) -> Self {
        Self {
            control,
            sequence: 0,
            sequence_complement: 0,
            data: [0; STX_BLOCK_SIZE],
            len,
            trailer: [0; TRAILER_LEN],
        }
    }

    /// Control byte (SOH or STX).
    pub fn control(&self) -> u8 {
        self.control
    }

    /// Sequence number.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Sequence complement as received.
    pub fn sequence_complement(&self) -> u8 {
        self.sequence_complement
    }

    /// Payload, 128 or 1024 bytes depending on the control byte.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Raw trailer bytes.
    pub fn trailer(&self) -> [u8; TRAILER_LEN] {
        self.trailer
    }

    /// CRC carried in the trailer.
    pub fn trailer_crc(&self) -> u16 {
        u16::from_be_bytes(self.trailer)
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("control", &format_args!("0x{:02X}", self.control))
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Why a packet could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFault {
    /// Unexpected control byte (or a lone CAN).
    Unknown(u8),
    /// A byte timed out part way through the packet.
    Incomplete,
    /// Sequence complement (or CRC, when verified) did not match.
    Malformed,
}

impl std::fmt::Display for PacketFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(b) => write!(f, "unexpected control byte 0x{b:02X}"),
            Self::Incomplete => f.write_str("packet incomplete"),
            Self::Malformed => f.write_str("packet malformed"),
        }
    }
}

/// Result of one packet assembly attempt.
#[derive(Debug)]
pub enum PacketOutcome {
    /// A structurally valid packet.
    Packet(Box<Packet>),
    /// EOT received.
    FileDone,
    /// The sender aborted (CAN CAN, 'A' or 'a').
    Aborted,
    /// Framing fault.
    Fault(PacketFault),
    /// The control byte itself timed out.
    InitialByteFail,
}

/// Read one complete packet and classify it.
///
/// Hard transport errors are returned as `Err`; everything else is a
/// [`PacketOutcome`]. No retries happen here.
pub fn receive_packet<T: Transport>(
    reader: &mut TimedByteReader<T>,
    verify_crc: bool,
) -> Result<PacketOutcome> {
    let control = match reader.receive_byte() {
        Ok(b) => b,
        Err(e) if e.is_timeout() => return Ok(PacketOutcome::InitialByteFail),
        Err(e) => return Err(e),
    };

    let len = match control {
        control::SOH => SOH_BLOCK_SIZE,
        control::STX => STX_BLOCK_SIZE,
        control::EOT => return Ok(PacketOutcome::FileDone),
        control::CAN => {
            return match reader.receive_byte() {
                Ok(control::CAN) => Ok(PacketOutcome::Aborted),
                Ok(other) => {
                    debug!("Lone CAN followed by 0x{other:02X}");
                    Ok(PacketOutcome::Fault(PacketFault::Unknown(control::CAN)))
                },
                Err(e) if e.is_timeout() => {
                    Ok(PacketOutcome::Fault(PacketFault::Unknown(control::CAN)))
                },
                Err(e) => Err(e),
            };
        },
        control::ABORT1 | control::ABORT2 => return Ok(PacketOutcome::Aborted),
        other => return Ok(PacketOutcome::Fault(PacketFault::Unknown(other))),
    };

    let mut packet = Box::new(Packet::empty(control, len));

    // Header pair, payload and trailer all arrive byte by byte.
    let mut header = [0u8; 2];
    for slot in header
        .iter_mut()
        .chain(packet.data[..len].iter_mut())
        .chain(packet.trailer.iter_mut())
    {
        match reader.receive_byte() {
            Ok(b) => *slot = b,
            Err(e) if e.is_timeout() => {
                debug!("Packet incomplete: {e}");
                return Ok(PacketOutcome::Fault(PacketFault::Incomplete));
            },
            Err(e) => return Err(e),
        }
    }
    packet.sequence = header[0];
    packet.sequence_complement = header[1];

    if packet.sequence != packet.sequence_complement ^ 0xFF {
        debug!(
            "Sequence pair mismatch: 0x{:02X}/0x{:02X}",
            packet.sequence, packet.sequence_complement
        );
        return Ok(PacketOutcome::Fault(PacketFault::Malformed));
    }

    if verify_crc {
        let actual = crc16_xmodem(packet.payload());
        if actual != packet.trailer_crc() {
            debug!(
                "CRC mismatch: expected {:#06x}, got {actual:#06x}",
                packet.trailer_crc()
            );
            return Ok(PacketOutcome::Fault(PacketFault::Malformed));
        }
    }

    trace!("<- {packet:?}");
    Ok(PacketOutcome::Packet(packet))
}

/// Build a complete frame: header, payload padded with `pad`, CRC trailer.
///
/// `data` longer than the block is truncated.
pub fn encode_block(seq: u8, data: &[u8], use_stx: bool, pad: u8) -> Vec<u8> {
    let (header, block_size) = if use_stx {
        (control::STX, STX_BLOCK_SIZE)
    } else {
        (control::SOH, SOH_BLOCK_SIZE)
    };

    let mut block = Vec::with_capacity(HEADER_LEN + block_size + TRAILER_LEN);
    block.push(header);
    block.push(seq);
    block.push(!seq);

    let used = data.len().min(block_size);
    block.extend_from_slice(&data[..used]);
    block.resize(HEADER_LEN + block_size, pad);

    let crc = crc16_xmodem(&block[HEADER_LEN..]);
    block.extend_from_slice(&crc.to_be_bytes());
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLink;
    use std::time::Duration;

    fn reader(bytes: &[u8]) -> TimedByteReader<ScriptedLink> {
        TimedByteReader::new(ScriptedLink::new(bytes), Duration::from_millis(5))
    }

    fn expect_packet(outcome: PacketOutcome) -> Box<Packet> {
        match outcome {
            PacketOutcome::Packet(p) => p,
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_block_soh() {
        let block = encode_block(1, &[0x01, 0x02, 0x03], false, 0x00);

        assert_eq!(block[0], control::SOH);
        assert_eq!(block[1], 1);
        assert_eq!(block[2], 0xFE);
        assert_eq!(block.len(), HEADER_LEN + SOH_BLOCK_SIZE + TRAILER_LEN);
    }

    #[test]
    fn test_encode_block_stx_pads() {
        let block = encode_block(5, &[0xAA; 10], true, control::CPMEOF);

        assert_eq!(block[0], control::STX);
        assert_eq!(block[2], 0xFA);
        assert_eq!(block[HEADER_LEN + 10], control::CPMEOF);
        assert_eq!(block.len(), HEADER_LEN + STX_BLOCK_SIZE + TRAILER_LEN);
    }

    #[test]
    fn test_receive_soh_packet() {
        let frame = encode_block(3, b"hello", false, 0);
        let mut r = reader(&frame);

        let packet = expect_packet(receive_packet(&mut r, false).unwrap());
        assert_eq!(packet.control(), control::SOH);
        assert_eq!(packet.sequence(), 3);
        assert_eq!(packet.sequence_complement(), 0xFC);
        assert_eq!(packet.payload().len(), SOH_BLOCK_SIZE);
        assert_eq!(&packet.payload()[..5], b"hello");
        assert_eq!(packet.trailer_crc(), crc16_xmodem(packet.payload()));
    }

    #[test]
    fn test_receive_stx_packet_length() {
        let frame = encode_block(1, &[0x55; STX_BLOCK_SIZE], true, 0);
        let mut r = reader(&frame);

        let packet = expect_packet(receive_packet(&mut r, true).unwrap());
        assert_eq!(packet.payload().len(), STX_BLOCK_SIZE);
        assert!(packet.payload().iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_bad_complement_is_malformed() {
        let mut frame = encode_block(7, b"x", false, 0);
        frame[2] = 0x00;
        let mut r = reader(&frame);

        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Fault(PacketFault::Malformed)
        ));
    }

    #[test]
    fn test_every_wrong_complement_is_rejected() {
        for wrong in (0u8..=255).filter(|&c| c != !9u8) {
            let mut frame = encode_block(9, b"", false, 0);
            frame[2] = wrong;
            let mut r = reader(&frame);
            assert!(matches!(
                receive_packet(&mut r, false).unwrap(),
                PacketOutcome::Fault(PacketFault::Malformed)
            ));
        }
    }

    #[test]
    fn test_trailer_ignored_by_default() {
        let mut frame = encode_block(1, b"data", false, 0);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let mut r = reader(&frame);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Packet(_)
        ));

        let mut r = reader(&frame);
        assert!(matches!(
            receive_packet(&mut r, true).unwrap(),
            PacketOutcome::Fault(PacketFault::Malformed)
        ));
    }

    #[test]
    fn test_eot_reads_nothing_more() {
        let mut r = reader(&[control::EOT, 0x99]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::FileDone
        ));
        assert_eq!(r.into_inner().remaining(), 1);
    }

    #[test]
    fn test_double_can_aborts() {
        let mut r = reader(&[control::CAN, control::CAN]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Aborted
        ));
    }

    #[test]
    fn test_lone_can_is_unknown() {
        let mut r = reader(&[control::CAN, control::ACK]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Fault(PacketFault::Unknown(control::CAN))
        ));

        let mut r = reader(&[control::CAN]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Fault(PacketFault::Unknown(control::CAN))
        ));
    }

    #[test]
    fn test_user_abort_codes() {
        for code in [control::ABORT1, control::ABORT2] {
            let mut r = reader(&[code]);
            assert!(matches!(
                receive_packet(&mut r, false).unwrap(),
                PacketOutcome::Aborted
            ));
        }
    }

    #[test]
    fn test_unknown_control_byte() {
        let mut r = reader(&[0x7E]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Fault(PacketFault::Unknown(0x7E))
        ));
    }

    #[test]
    fn test_initial_timeout() {
        let mut r = reader(&[]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::InitialByteFail
        ));
    }

    #[test]
    fn test_truncated_packet_is_incomplete() {
        let frame = encode_block(1, b"abc", false, 0);
        let mut r = reader(&frame[..60]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Fault(PacketFault::Incomplete)
        ));
    }

    #[test]
    fn test_missing_trailer_is_incomplete() {
        let frame = encode_block(1, b"abc", false, 0);
        let mut r = reader(&frame[..frame.len() - 1]);
        assert!(matches!(
            receive_packet(&mut r, false).unwrap(),
            PacketOutcome::Fault(PacketFault::Incomplete)
        ));
    }

    #[test]
    fn test_hard_error_propagates() {
        let mut link = ScriptedLink::new(&[control::SOH, 1]);
        link.fail_when_drained();
        let mut r = TimedByteReader::new(link, Duration::from_millis(5));
        assert!(receive_packet(&mut r, false).is_err());
    }
}
