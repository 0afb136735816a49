//! Receive-then-boot sequence.

use log::{info, warn};

use crate::error::{Error, Result};
use crate::flash::{FlashReader, FlashWriter};
use crate::handoff::{Launcher, VectorTable, boot};
use crate::platform::PlatformConfig;
use crate::port::Transport;
use crate::protocol::ymodem::{ReceiveOutcome, YmodemConfig, YmodemReceiver};

/// What [`Bootloader::run`] did.
#[derive(Debug)]
pub struct BootReport {
    /// Reception result, `None` when reception was skipped.
    pub reception: Option<ReceiveOutcome>,
    /// Vectors handed to the launcher, or why the handoff was refused.
    pub handoff: Result<VectorTable>,
}

impl BootReport {
    /// Vectors handed to the launcher, if it was called.
    pub fn vectors(&self) -> Option<VectorTable> {
        self.handoff.as_ref().ok().copied()
    }

    /// Why the handoff was refused, if it was.
    pub fn handoff_error(&self) -> Option<&Error> {
        self.handoff.as_ref().err()
    }
}

/// Bootloader: optionally receive an image, then start whatever is in flash.
pub struct Bootloader {
    platform: PlatformConfig,
    config: YmodemConfig,
}

impl Bootloader {
    /// Create a bootloader for the given layout and receive settings.
    pub fn new(platform: PlatformConfig, config: YmodemConfig) -> Self {
        Self { platform, config }
    }

    /// Platform layout in use.
    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    /// Receive a file over `link` (unless `skip_receive`), then launch.
    ///
    /// The handoff is attempted whatever the reception outcome: a failed or
    /// absent transfer leaves the previous image in place, and an image
    /// destroyed by a partial transfer fails vector validation instead.
    /// A refused handoff is recorded in the report next to the reception
    /// outcome; only link errors during reception return `Err`.
    pub fn run<T, F, L, P>(
        &self,
        link: T,
        flash: &mut F,
        launcher: &mut L,
        skip_receive: bool,
        progress: P,
    ) -> Result<BootReport>
    where
        T: Transport,
        F: FlashWriter + FlashReader,
        L: Launcher + ?Sized,
        P: FnMut(u64, Option<u64>),
    {
        let reception = if skip_receive {
            info!("Reception skipped");
            None
        } else {
            let mut receiver = YmodemReceiver::with_config(
                link,
                &mut *flash,
                self.platform
                    .clone(),
                self.config
                    .clone(),
            );
            let outcome = receiver.receive_file(progress)?;
            if !outcome.is_completed() {
                warn!("No new image received, booting existing firmware");
            }
            Some(outcome)
        };

        let handoff = boot(&*flash, &self.platform, launcher);
        if let Err(e) = &handoff {
            warn!("Handoff refused: {e}");
        }
        Ok(BootReport { reception, handoff })
    }
}
