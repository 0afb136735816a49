//! In-memory fakes shared by the unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::flash::FlashWriter;
use crate::port::Transport;

/// Route `log` output through the test harness; `RUST_LOG=trace` shows the
/// byte-level exchange of a failing test.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Transport that replays a fixed byte script and records replies.
///
/// A drained script times out immediately instead of waiting.
pub(crate) struct ScriptedLink {
    incoming: VecDeque<u8>,
    pub(crate) written: Vec<u8>,
    pub(crate) reads: usize,
    fail_when_drained: bool,
}

impl ScriptedLink {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            incoming: bytes.iter().copied().collect(),
            written: Vec::new(),
            reads: 0,
            fail_when_drained: false,
        }
    }

    /// Report a hard I/O error instead of a timeout once drained.
    pub(crate) fn fail_when_drained(&mut self) {
        self.fail_when_drained = true;
    }

    pub(crate) fn remaining(&self) -> usize {
        self.incoming.len()
    }
}

impl Transport for ScriptedLink {
    fn read_byte(&mut self, _timeout: Duration) -> Result<u8> {
        self.reads += 1;
        match self.incoming.pop_front() {
            Some(b) => Ok(b),
            None if self.fail_when_drained => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link closed",
            ))),
            None => Err(Error::Timeout("script drained".into())),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.written.push(byte);
        Ok(())
    }
}

/// One call made on [`RecordingFlash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FlashCall {
    Erase(u32),
    Program(u32, Vec<u8>),
}

/// Flash fake that records calls and can be told to fail.
#[derive(Default)]
pub(crate) struct RecordingFlash {
    pub(crate) calls: Vec<FlashCall>,
    pub(crate) fail_erase: bool,
    /// Fail the n-th program call (0-based).
    pub(crate) fail_program_at: Option<usize>,
}

impl RecordingFlash {
    pub(crate) fn programmed(&self) -> Vec<u8> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                FlashCall::Program(_, data) => Some(data.as_slice()),
                FlashCall::Erase(_) => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub(crate) fn program_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, FlashCall::Program(..)))
            .count()
    }
}

impl FlashWriter for RecordingFlash {
    fn erase(&mut self, address: u32) -> Result<()> {
        self.calls.push(FlashCall::Erase(address));
        if self.fail_erase {
            return Err(Error::Flash("erase refused".into()));
        }
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let index = self.program_count();
        self.calls
            .push(FlashCall::Program(address, data.to_vec()));
        if self.fail_program_at == Some(index) {
            return Err(Error::Flash("program refused".into()));
        }
        Ok(())
    }
}
