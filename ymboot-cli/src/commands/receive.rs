//! Receive-and-boot command implementation.
//!
//! The host plays the target: flash is a RAM image laid out like the MCU's,
//! and the handoff is reported instead of executed.

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{info, warn},
    std::{fs, path::PathBuf, time::Duration},
    ymboot::{
        BootReport, Bootloader, FlashWriter, Launcher, NativePort, PlatformConfig, Port,
        RamFlash, ReceiveOutcome, RetryPolicy, SerialConfig, StreamTransport, TooLargePolicy,
        Transport, VectorTable, YmodemConfig, boot,
    },
};

/// Options gathered from flags, environment and config.
#[derive(Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct ReceiveOptions {
    pub port: Option<String>,
    pub baud: u32,
    pub output: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub skip_receive: bool,
    pub verify_crc: bool,
    pub single_shot: bool,
    pub continue_on_too_large: bool,
    pub handshake: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub json: bool,
    pub quiet: bool,
}

impl ReceiveOptions {
    /// Receive settings: config file first, then command-line overrides.
    fn ymodem_config(&self, config: &Config) -> YmodemConfig {
        let mut ymodem = config
            .receive
            .apply(YmodemConfig::default());
        if let Some(ms) = self.timeout_ms {
            ymodem.byte_timeout = Duration::from_millis(ms);
        }
        if self.verify_crc {
            ymodem.verify_crc = true;
        }
        if self.single_shot {
            ymodem.retry = RetryPolicy::SingleShot;
        }
        if self.continue_on_too_large {
            ymodem.too_large = TooLargePolicy::Continue;
        }
        if let Some(n) = self.handshake {
            ymodem.handshake_attempts = n;
        }
        ymodem
    }
}

/// Launcher for host runs: records the vectors instead of jumping.
#[derive(Debug, Default)]
pub(crate) struct HostLauncher {
    pub launched: Option<VectorTable>,
}

impl Launcher for HostLauncher {
    fn launch(&mut self, vectors: VectorTable) -> ymboot::Result<()> {
        info!(
            "Handing off: MSP=0x{:08X}, reset=0x{:08X}",
            vectors.initial_sp, vectors.reset_vector
        );
        self.launched = Some(vectors);
        Ok(())
    }
}

/// RAM flash covering the bootloader area and the firmware region.
pub(crate) fn prepare_flash(platform: &PlatformConfig, image: Option<&[u8]>) -> Result<RamFlash> {
    let size = u64::from(platform.firmware_offset) + platform.flash_size;
    let size = usize::try_from(size).context("Flash layout does not fit in memory")?;
    let mut flash = RamFlash::new(platform.base_address, size);
    if let Some(image) = image {
        if image.len() as u64 > platform.flash_size {
            return Err(CliError::Usage(format!(
                "image of {} bytes exceeds flash capacity of {}",
                image.len(),
                platform.flash_size
            ))
            .into());
        }
        flash.program(platform.firmware_address(), image)?;
    }
    Ok(flash)
}

/// Run the bootloader over `link`, or boot the preloaded image when `link` is `None`.
pub(crate) fn receive_and_boot<T, P>(
    bootloader: &Bootloader,
    link: Option<T>,
    flash: &mut RamFlash,
    launcher: &mut HostLauncher,
    progress: P,
) -> Result<BootReport>
where
    T: Transport,
    P: FnMut(u64, Option<u64>),
{
    match link {
        Some(link) => bootloader
            .run(link, flash, launcher, false, progress)
            .context("Bootloader failed"),
        None => Ok(BootReport {
            reception: None,
            handoff: boot(&*flash, bootloader.platform(), launcher),
        }),
    }
}

/// Turn a finished run into the command result.
///
/// A transfer that did not complete decides the exit code even when the
/// handoff was refused afterwards.
pub(crate) fn finish(report: BootReport) -> Result<()> {
    match report.reception {
        Some(ReceiveOutcome::Aborted) => {
            return Err(CliError::Transfer("transfer cancelled by sender".into()).into());
        },
        Some(ReceiveOutcome::Failed(reason)) => {
            return Err(CliError::Transfer(format!("transfer failed: {reason}")).into());
        },
        _ => {},
    }
    report
        .handoff
        .map(|_| ())
        .context("Boot failed")
}

/// JSON view of a boot report.
pub(crate) fn report_json(report: &BootReport) -> serde_json::Value {
    let reception = report
        .reception
        .as_ref()
        .map(|outcome| match outcome {
            ReceiveOutcome::Completed(summary) => serde_json::json!({
                "status": "completed",
                "file_name": summary.file_name,
                "declared_size": summary.declared_size,
                "bytes_written": summary.bytes_written,
                "packets": summary.packets,
            }),
            ReceiveOutcome::Aborted => serde_json::json!({ "status": "aborted" }),
            ReceiveOutcome::Failed(reason) => serde_json::json!({
                "status": "failed",
                "reason": reason.to_string(),
            }),
        });
    serde_json::json!({
        "ok": report.reception.as_ref().is_none_or(ReceiveOutcome::is_completed)
            && report.handoff.is_ok(),
        "data": {
            "reception": reception,
            "vectors": report.vectors(),
            "boot_error": report.handoff_error().map(ToString::to_string),
        }
    })
}

fn progress_bar(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )?
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    Ok(pb)
}

fn open_link(options: &ReceiveOptions) -> Result<StreamTransport<NativePort>> {
    let name = options.port.as_deref().ok_or_else(|| {
        CliError::Usage(
            "no serial port given; use --port, YMBOOT_PORT or [port.connection] serial".into(),
        )
    })?;

    let mut port = NativePort::open(&SerialConfig::new(name, options.baud))
        .map_err(|e| CliError::Device(format!("Failed to open {name}: {e}")))?;
    port.clear_buffers()?;
    info!("Waiting for YMODEM sender on {name} at {} baud", options.baud);
    Ok(StreamTransport::new(port))
}

/// Receive command implementation.
pub(crate) fn cmd_receive(config: &Config, options: &ReceiveOptions) -> Result<()> {
    let platform = config.platform();
    let image = options
        .image
        .as_ref()
        .map(|path| {
            fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))
        })
        .transpose()?;
    let mut flash = prepare_flash(&platform, image.as_deref())?;

    let link = if options.skip_receive {
        None
    } else {
        Some(open_link(options)?)
    };

    let bootloader = Bootloader::new(platform.clone(), options.ymodem_config(config));
    let mut launcher = HostLauncher::default();
    let pb = progress_bar(options.quiet || options.json || options.skip_receive)?;

    let report = receive_and_boot(&bootloader, link, &mut flash, &mut launcher, |written, total| {
        if let Some(total) = total {
            pb.set_length(total);
        }
        pb.set_position(written);
    });
    pb.finish_and_clear();
    let report = report?;

    if let (Some(ReceiveOutcome::Completed(summary)), Some(path)) =
        (&report.reception, &options.output)
    {
        let firmware = flash.slice_from(platform.firmware_address())?;
        let len = usize::try_from(summary.bytes_written)?.min(firmware.len());
        fs::write(path, &firmware[..len])
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {len} bytes to {}", path.display());
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else if !options.quiet {
        print_report(&report);
    }

    finish(report)
}

fn print_report(report: &BootReport) {
    match &report.reception {
        Some(ReceiveOutcome::Completed(summary)) => {
            eprintln!(
                "{} {} ({} bytes, {} packets)",
                style("Received").green().bold(),
                summary
                    .file_name
                    .as_deref()
                    .unwrap_or("<unnamed>"),
                summary.bytes_written,
                summary.packets
            );
        },
        Some(ReceiveOutcome::Aborted) => {
            warn!("Transfer cancelled by sender");
        },
        Some(ReceiveOutcome::Failed(reason)) => {
            warn!("Transfer failed: {reason}");
        },
        None => {},
    }
    if let Some(vectors) = report.vectors() {
        eprintln!(
            "{} MSP=0x{:08X} reset=0x{:08X}",
            style("Booted").green().bold(),
            vectors.initial_sp,
            vectors.reset_vector
        );
    }
}
