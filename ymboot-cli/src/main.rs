//! ymboot CLI - host-side runner for the ymboot YMODEM bootloader.
//!
//! ## Features
//!
//! - Receive a firmware image over a serial line and boot it on a simulated target
//! - Inspect a firmware binary's vector table before sending it
//! - List serial ports
//! - Layered configuration (flags, environment, local and global TOML files)

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use ymboot::protocol::parse_magnitude;

mod commands;
mod config;

use commands::inspect::cmd_inspect;
use commands::ports::cmd_list_ports;
use commands::receive::{ReceiveOptions, cmd_receive};
use config::Config;

/// Fallback baud rate when neither flags, environment nor config name one.
const DEFAULT_BAUD: u32 = 115_200;

/// ymboot - receive firmware over YMODEM and hand off to it.
///
/// Environment variables:
///   YMBOOT_PORT   - Default serial port
///   YMBOOT_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "ymboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  ymboot -p /dev/ttyACM0 receive -o firmware.bin\n  ymboot inspect build/app.bin --json\n  ymboot list-ports")]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "YMBOOT_PORT")]
    port: Option<String>,

    /// Baud rate for the transfer.
    #[arg(short, long, global = true, env = "YMBOOT_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Wait for a YMODEM transfer, then boot the received image.
    Receive {
        /// Write the received firmware to this file.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Preload flash with an existing image before receiving.
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,

        /// Skip reception and boot the preloaded image.
        #[arg(long, requires = "image")]
        skip_receive: bool,

        /// Verify the CRC trailer of every packet.
        #[arg(long)]
        crc: bool,

        /// Fail on the first bad packet instead of asking for a resend.
        #[arg(long)]
        single_shot: bool,

        /// Keep receiving when the announced file exceeds flash capacity.
        #[arg(long)]
        continue_on_too_large: bool,

        /// Send this many 'C' start requests while waiting for the sender.
        #[arg(long, value_name = "N")]
        handshake: Option<u32>,

        /// Per-byte timeout in milliseconds.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Print the result as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show the vector table and size of a firmware binary.
    Inspect {
        /// Firmware binary, linked to run at the firmware address.
        image: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Vector table offset from the flash base (e.g. 0xC000 or 48k).
        #[arg(long, value_name = "OFFSET", value_parser = parse_offset)]
        vector_offset: Option<u32>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Parse an address offset with the same rules as the YMODEM size field.
fn parse_offset(s: &str) -> std::result::Result<u32, String> {
    parse_magnitude(s.as_bytes())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("invalid offset '{s}'"))
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of arguments or missing required setting.
    #[error("{0}")]
    Usage(String),
    /// The serial port could not be opened.
    #[error("{0}")]
    Device(String),
    /// The transfer did not complete.
    #[error("{0}")]
    Transfer(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Device(_) => 4,
            Self::Transfer(_) => 5,
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "ymboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Receive {
            output,
            image,
            skip_receive,
            crc,
            single_shot,
            continue_on_too_large,
            handshake,
            timeout_ms,
            json,
        } => {
            let options = ReceiveOptions {
                port: cli
                    .port
                    .clone()
                    .or_else(|| {
                        config
                            .port
                            .connection
                            .serial
                            .clone()
                    }),
                baud: cli
                    .baud
                    .or(config.port.connection.baud)
                    .unwrap_or(DEFAULT_BAUD),
                output: output.clone(),
                image: image.clone(),
                skip_receive: *skip_receive,
                verify_crc: *crc,
                single_shot: *single_shot,
                continue_on_too_large: *continue_on_too_large,
                handshake: *handshake,
                timeout_ms: *timeout_ms,
                json: *json,
                quiet: cli.quiet,
            };
            cmd_receive(&config, &options)
        },
        Commands::Inspect {
            image,
            json,
            vector_offset,
        } => {
            let mut platform = config.platform();
            if let Some(offset) = vector_offset {
                platform.vector_offset = *offset;
            }
            cmd_inspect(&platform, image, *json)
        },
        Commands::ListPorts { json } => cmd_list_ports(*json),
    }
}
