//! YMODEM receive engine.
//!
//! Drives the packet assembler, dispatches packet 0 to the header parser and
//! every later packet to the flash collaborator, and answers the sender with
//! ACK, NAK, CAN CAN or 'C'.
//!
//! ## Session flow
//!
//! ```text
//! sender                         receiver
//!   | -- [SOH 00 FF name\0size] -->  |  parse header, erase flash
//!   | <------------- ACK, 'C' -----  |
//!   | -- [STX 01 FE data...] ----->  |  program flash
//!   | <------------------- ACK ----  |
//!   |            ...                 |
//!   | -- EOT --------------------->  |
//!   | <------------------- ACK ----  |  done
//! ```
//!
//! Two behaviours of the STM32 bootloader this engine descends from are
//! questionable and are selectable instead of fixed:
//!
//! - [`RetryPolicy::SingleShot`] ends the session on the first corrupt or
//!   out-of-order packet (replying ACK or NAK), as that bootloader does.
//!   [`RetryPolicy::Bounded`] NAKs and keeps going up to `max_errors`.
//! - [`TooLargePolicy::Continue`] cancels an oversized file but keeps
//!   listening; [`TooLargePolicy::Abort`] ends the session.

use std::time::Duration;

use log::{debug, info, trace, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::flash::FlashWriter;
use crate::platform::PlatformConfig;
use crate::port::Transport;
use crate::protocol::header::{FileHeader, HeaderRejection, parse_file_header};
use crate::protocol::packet::{Packet, PacketFault, PacketOutcome, control, receive_packet};
use crate::protocol::reader::{DEFAULT_BYTE_TIMEOUT, TimedByteReader};

/// Consecutive faults tolerated under [`RetryPolicy::Bounded`].
pub const DEFAULT_MAX_ERRORS: u32 = 5;

/// Reaction to a corrupt or out-of-order packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum RetryPolicy {
    /// End the session immediately.
    SingleShot,
    /// NAK and wait for the retransmission, up to `max_errors` in a row.
    #[default]
    Bounded,
}

/// Reaction to a file that does not fit in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum TooLargePolicy {
    /// Send CAN CAN and keep waiting for another filename packet.
    Continue,
    /// Send CAN CAN and end the session.
    #[default]
    Abort,
}

/// YMODEM receiver configuration.
#[derive(Debug, Clone)]
pub struct YmodemConfig {
    /// Time allowed for each byte.
    pub byte_timeout: Duration,
    /// Consecutive faults tolerated before cancelling.
    pub max_errors: u32,
    /// Reaction to corrupt or out-of-order packets.
    pub retry: RetryPolicy,
    /// Reaction to an oversized file.
    pub too_large: TooLargePolicy,
    /// Check the CRC16 trailer of every packet.
    pub verify_crc: bool,
    /// Number of 'C' start requests sent while waiting for packet 0.
    /// Zero waits silently for the sender.
    pub handshake_attempts: u32,
}

impl Default for YmodemConfig {
    fn default() -> Self {
        Self {
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
            max_errors: DEFAULT_MAX_ERRORS,
            retry: RetryPolicy::default(),
            too_large: TooLargePolicy::default(),
            verify_crc: false,
            handshake_attempts: 0,
        }
    }
}

impl YmodemConfig {
    /// Single-attempt configuration: any fault ends the session and an
    /// oversized file is still received.
    pub fn single_shot() -> Self {
        Self {
            retry: RetryPolicy::SingleShot,
            too_large: TooLargePolicy::Continue,
            ..Self::default()
        }
    }
}

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for packet 0.
    AwaitingFilename,
    /// Header accepted, data packets flowing.
    ReceivingData,
    /// EOT acknowledged.
    Completed,
    /// The sender cancelled.
    Aborted,
    /// The receiver gave up.
    Failed,
}

impl SessionState {
    /// Whether no further I/O will happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No packet started within the byte timeout.
    Timeout,
    /// A corrupt packet under [`RetryPolicy::SingleShot`].
    Corrupted(PacketFault),
    /// An out-of-order packet under [`RetryPolicy::SingleShot`].
    SequenceMismatch {
        /// Expected sequence number.
        expected: u8,
        /// Received sequence number.
        received: u8,
    },
    /// More than `max_errors` consecutive faults.
    TooManyErrors(u32),
    /// Packet 0 carried no file name.
    EmptyName,
    /// The declared size exceeds flash capacity.
    TooLarge {
        /// Declared size.
        size: u64,
        /// Flash capacity.
        capacity: u64,
    },
    /// The flash collaborator failed.
    Flash(String),
    /// The transport failed.
    Link(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for sender"),
            Self::Corrupted(fault) => write!(f, "{fault}"),
            Self::SequenceMismatch { expected, received } => {
                write!(f, "expected packet {expected}, got {received}")
            },
            Self::TooManyErrors(n) => write!(f, "gave up after {n} consecutive errors"),
            Self::EmptyName => f.write_str("sender offered no file"),
            Self::TooLarge { size, capacity } => {
                write!(f, "file of {size} bytes exceeds flash capacity of {capacity}")
            },
            Self::Flash(msg) => write!(f, "flash: {msg}"),
            Self::Link(msg) => write!(f, "link: {msg}"),
        }
    }
}

/// What a completed session delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferSummary {
    /// Name from packet 0, if one was received.
    pub file_name: Option<String>,
    /// Declared size from packet 0.
    pub declared_size: Option<u64>,
    /// Bytes handed to the flash collaborator.
    pub bytes_written: u64,
    /// Data packets accepted.
    pub packets: u32,
}

/// Final result of [`YmodemReceiver::receive_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// EOT received and acknowledged.
    Completed(TransferSummary),
    /// The sender cancelled.
    Aborted,
    /// The receiver gave up.
    Failed(FailureReason),
}

impl ReceiveOutcome {
    /// Whether the file arrived in full.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Per-file state, alive for one call of `receive_file`.
#[derive(Debug, Default)]
struct TransferSession {
    expected_sequence: u8,
    header: Option<FileHeader>,
    bytes_written: u64,
    packets: u32,
    errors: u32,
    handshakes: u32,
    heard_sender: bool,
}

impl TransferSession {
    fn summary(&self) -> TransferSummary {
        TransferSummary {
            file_name: self
                .header
                .as_ref()
                .map(|h| h.name.clone()),
            declared_size: self.size_limit(),
            bytes_written: self.bytes_written,
            packets: self.packets,
        }
    }

    /// Declared size when it can bound the transfer. A size of 0 comes from
    /// an empty or bare-hex field and carries no information.
    fn size_limit(&self) -> Option<u64> {
        self.header
            .as_ref()
            .and_then(|h| h.size)
            .filter(|&s| s > 0)
    }
}

enum Step {
    Continue,
    Done(ReceiveOutcome),
}

/// YMODEM receive engine.
pub struct YmodemReceiver<T: Transport, F: FlashWriter> {
    reader: TimedByteReader<T>,
    flash: F,
    config: YmodemConfig,
    platform: PlatformConfig,
    state: SessionState,
    outcome: Option<ReceiveOutcome>,
}

impl<T: Transport, F: FlashWriter> YmodemReceiver<T, F> {
    /// Create a receiver with default configuration.
    pub fn new(link: T, flash: F, platform: PlatformConfig) -> Self {
        Self::with_config(link, flash, platform, YmodemConfig::default())
    }

    /// Create a receiver with custom configuration.
    pub fn with_config(link: T, flash: F, platform: PlatformConfig, config: YmodemConfig) -> Self {
        Self {
            reader: TimedByteReader::new(link, config.byte_timeout),
            flash,
            config,
            platform,
            state: SessionState::AwaitingFilename,
            outcome: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &YmodemConfig {
        &self.config
    }

    /// Release the transport and the flash collaborator.
    pub fn into_parts(self) -> (T, F) {
        (self.reader.into_inner(), self.flash)
    }

    /// Receive one file.
    ///
    /// `progress` is called with `(bytes_written, declared_size)` after each
    /// accepted data packet. Once a terminal state is reached, later calls
    /// return the same outcome without touching the transport.
    pub fn receive_file<P>(&mut self, mut progress: P) -> Result<ReceiveOutcome>
    where
        P: FnMut(u64, Option<u64>),
    {
        if let Some(done) = &self.outcome {
            return Ok(done.clone());
        }

        debug!(
            "Waiting for YMODEM sender (byte timeout {:?}, {:?})",
            self.config.byte_timeout, self.config.retry
        );
        let mut session = TransferSession::default();
        self.state = SessionState::AwaitingFilename;

        let result = loop {
            match self.step(&mut session, &mut progress) {
                Ok(Step::Continue) => {},
                Ok(Step::Done(outcome)) => break Ok(outcome),
                Err(e) => break Err(e),
            }
        };

        let outcome = match &result {
            Ok(outcome) => outcome.clone(),
            Err(e) => ReceiveOutcome::Failed(FailureReason::Link(e.to_string())),
        };
        self.state = match &outcome {
            ReceiveOutcome::Completed(_) => SessionState::Completed,
            ReceiveOutcome::Aborted => SessionState::Aborted,
            ReceiveOutcome::Failed(_) => SessionState::Failed,
        };
        match &outcome {
            ReceiveOutcome::Completed(summary) => info!(
                "Received {} ({} bytes in {} packets)",
                summary
                    .file_name
                    .as_deref()
                    .unwrap_or("<unnamed>"),
                summary.bytes_written,
                summary.packets
            ),
            ReceiveOutcome::Aborted => warn!("Transfer aborted by sender"),
            ReceiveOutcome::Failed(reason) => warn!("Transfer failed: {reason}"),
        }
        self.outcome = Some(outcome);
        result
    }

    fn step<P>(&mut self, session: &mut TransferSession, progress: &mut P) -> Result<Step>
    where
        P: FnMut(u64, Option<u64>),
    {
        match self.next_packet(session)? {
            PacketOutcome::InitialByteFail => {
                self.cancel()?;
                Ok(Step::Done(ReceiveOutcome::Failed(FailureReason::Timeout)))
            },
            PacketOutcome::Fault(fault) => {
                warn!("Bad packet: {fault}");
                match self.config.retry {
                    RetryPolicy::SingleShot => {
                        self.reader.send_byte(control::ACK)?;
                        Ok(Step::Done(ReceiveOutcome::Failed(FailureReason::Corrupted(
                            fault,
                        ))))
                    },
                    RetryPolicy::Bounded => self.reject(session),
                }
            },
            PacketOutcome::FileDone => {
                debug!("EOT");
                self.reader.send_byte(control::ACK)?;
                Ok(Step::Done(ReceiveOutcome::Completed(session.summary())))
            },
            PacketOutcome::Aborted => {
                self.cancel()?;
                Ok(Step::Done(ReceiveOutcome::Aborted))
            },
            PacketOutcome::Packet(packet) => self.accept(session, &packet, progress),
        }
    }

    /// Read the next packet, sending 'C' start requests while configured to.
    fn next_packet(&mut self, session: &mut TransferSession) -> Result<PacketOutcome> {
        loop {
            let handshaking = self.state == SessionState::AwaitingFilename
                && !session.heard_sender
                && session.handshakes < self.config.handshake_attempts;
            if handshaking {
                trace!("Start request {}", session.handshakes + 1);
                self.reader.send_byte(control::C)?;
                session.handshakes += 1;
            }

            let outcome = receive_packet(&mut self.reader, self.config.verify_crc)?;
            if matches!(outcome, PacketOutcome::InitialByteFail) {
                if handshaking && session.handshakes < self.config.handshake_attempts {
                    continue;
                }
            } else {
                session.heard_sender = true;
            }
            return Ok(outcome);
        }
    }

    fn accept<P>(
        &mut self,
        session: &mut TransferSession,
        packet: &Packet,
        progress: &mut P,
    ) -> Result<Step>
    where
        P: FnMut(u64, Option<u64>),
    {
        let received = packet.sequence();
        if received != session.expected_sequence {
            return self.out_of_order(session, received);
        }

        if self.state == SessionState::AwaitingFilename {
            return self.accept_header(session, packet);
        }

        let payload = packet.payload();
        let len = match session.size_limit() {
            Some(limit) => {
                let left = limit.saturating_sub(session.bytes_written);
                payload.len().min(usize::try_from(left).unwrap_or(usize::MAX))
            },
            None => payload.len(),
        };

        if len > 0 {
            if let Err(reason) = self.write_data(session, &payload[..len]) {
                warn!("Flash write failed: {reason}");
                self.cancel()?;
                return Ok(Step::Done(ReceiveOutcome::Failed(reason)));
            }
        }

        session.bytes_written += len as u64;
        session.packets += 1;
        session.expected_sequence = session
            .expected_sequence
            .wrapping_add(1);
        session.errors = 0;
        trace!(
            "Packet {received} accepted ({} bytes total)",
            session.bytes_written
        );
        self.reader.send_byte(control::ACK)?;
        progress(session.bytes_written, session.size_limit());
        Ok(Step::Continue)
    }

    fn accept_header(&mut self, session: &mut TransferSession, packet: &Packet) -> Result<Step> {
        match parse_file_header(packet.payload(), self.platform.flash_size) {
            Err(HeaderRejection::EmptyName) => {
                debug!("Empty file name, nothing to receive");
                self.reader.send_byte(control::ACK)?;
                Ok(Step::Done(ReceiveOutcome::Failed(FailureReason::EmptyName)))
            },
            Err(HeaderRejection::TooLarge { size, capacity }) => {
                warn!("File of {size} bytes exceeds flash capacity of {capacity}");
                self.cancel()?;
                match self.config.too_large {
                    TooLargePolicy::Continue => Ok(Step::Continue),
                    TooLargePolicy::Abort => Ok(Step::Done(ReceiveOutcome::Failed(
                        FailureReason::TooLarge { size, capacity },
                    ))),
                }
            },
            Ok(header) => {
                let target = self.platform.firmware_address();
                if let Err(e) = self.flash.erase(target) {
                    warn!("Erase at 0x{target:08X} failed: {e}");
                    self.cancel()?;
                    return Ok(Step::Done(ReceiveOutcome::Failed(FailureReason::Flash(
                        e.to_string(),
                    ))));
                }

                info!("Receiving '{}' ({:?} bytes)", header.name, header.size);
                session.header = Some(header);
                session.expected_sequence = 1;
                session.errors = 0;
                self.state = SessionState::ReceivingData;
                self.reader.send_byte(control::ACK)?;
                self.reader.send_byte(control::C)?;
                Ok(Step::Continue)
            },
        }
    }

    fn out_of_order(&mut self, session: &mut TransferSession, received: u8) -> Result<Step> {
        let expected = session.expected_sequence;
        warn!("Expected packet {expected}, got {received}");

        match self.config.retry {
            RetryPolicy::SingleShot => {
                self.reader.send_byte(control::NAK)?;
                Ok(Step::Done(ReceiveOutcome::Failed(
                    FailureReason::SequenceMismatch { expected, received },
                )))
            },
            RetryPolicy::Bounded => {
                // The sender missed our ACK and repeated the last packet.
                if self.state == SessionState::ReceivingData
                    && received == expected.wrapping_sub(1)
                {
                    debug!("Duplicate of packet {received}, acknowledging again");
                    self.reader.send_byte(control::ACK)?;
                    // Only a repeated filename packet restarts the CRC handshake;
                    // sequence 0 also recurs after 256 data packets.
                    if session.packets == 0 {
                        self.reader.send_byte(control::C)?;
                    }
                    return Ok(Step::Continue);
                }
                self.reject(session)
            },
        }
    }

    /// NAK a bad packet, or cancel once the error budget is spent.
    fn reject(&mut self, session: &mut TransferSession) -> Result<Step> {
        session.errors += 1;
        if session.errors > self.config.max_errors {
            self.cancel()?;
            return Ok(Step::Done(ReceiveOutcome::Failed(
                FailureReason::TooManyErrors(session.errors),
            )));
        }
        debug!(
            "NAK ({}/{})",
            session.errors, self.config.max_errors
        );
        self.reader.send_byte(control::NAK)?;
        Ok(Step::Continue)
    }

    fn write_data(
        &mut self,
        session: &TransferSession,
        data: &[u8],
    ) -> std::result::Result<(), FailureReason> {
        let end = session.bytes_written + data.len() as u64;
        if end > self.platform.flash_size {
            return Err(FailureReason::Flash(format!(
                "{end} bytes exceed flash capacity of {}",
                self.platform.flash_size
            )));
        }

        let address = u32::try_from(session.bytes_written)
            .ok()
            .and_then(|offset| {
                self.platform
                    .firmware_address()
                    .checked_add(offset)
            })
            .ok_or_else(|| FailureReason::Flash("address out of range".into()))?;

        self.flash
            .program(address, data)
            .map_err(|e| FailureReason::Flash(e.to_string()))
    }

    fn cancel(&mut self) -> Result<()> {
        self.reader.send_byte(control::CAN)?;
        self.reader.send_byte(control::CAN)
    }
}
