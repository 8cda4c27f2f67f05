//! `tmcl` – send TMCL instructions from the command line.
//!
//! Opens the connection described by a TOML config file (see
//! `tmcl_core::config`), issues one instruction and prints the result.
//!
//! # Usage
//!
//! ```text
//! tmcl [OPTIONS] <COMMAND>
//!
//! Options:
//!   --config <PATH>      Connection config file [env: TMCL_CONFIG]
//!   --channel <NAME>     Override the port, interface or spidev node
//!   --host <N>           Override the host address
//!   --module <N>         Override the module address
//!   --timeout-ms <MS>    Override the reply timeout
//!   -v, --verbose        Log at debug level unless RUST_LOG is set
//!
//! Commands:
//!   list <KIND>                          serial | socketcan | slcan | spi
//!   request <CMD> <TYPE> <MOTOR> <VALUE> raw TMCL instruction
//!   rotate <MOTOR> <VELOCITY>
//!   stop <MOTOR>
//!   move-to <MOTOR> <POSITION>
//!   move-by <MOTOR> <DIFFERENCE>
//!   get-axis <MOTOR> <PARAM>
//!   set-axis <MOTOR> <PARAM> <VALUE>
//!   read-register <ADDRESS>
//!   write-register <ADDRESS> <VALUE>
//! ```
//!
//! Results go to stdout, logs to stderr.  Register addresses and values
//! accept `0x` hex.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tmcl_core::{connection, list_available, ChannelKind, ConnectionConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Send TMCL instructions to a motor-controller module.
#[derive(Debug, Parser)]
#[command(name = "tmcl", about = "Send TMCL instructions over serial, CAN or SPI", version)]
struct Cli {
    /// TOML connection config.  Without one, a 9600 baud serial port is used.
    #[arg(long, env = "TMCL_CONFIG")]
    config: Option<PathBuf>,

    /// Port, CAN interface or SPI device (`B.D`) to open instead of the
    /// configured one.
    #[arg(long)]
    channel: Option<String>,

    #[arg(long)]
    host: Option<u8>,

    #[arg(long)]
    module: Option<u8>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log at debug level (ignored when RUST_LOG is set).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the channels of one kind present on this machine.
    List { kind: ChannelKind },

    /// Send a raw instruction and print the reply value.
    Request {
        command: u8,
        #[arg(value_name = "TYPE")]
        command_type: u8,
        motor_or_bank: u8,
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },

    /// Rotate a motor; negative velocities turn left.
    Rotate {
        motor: u8,
        #[arg(allow_negative_numbers = true)]
        velocity: i32,
    },

    Stop { motor: u8 },

    /// Move to an absolute position.
    MoveTo {
        motor: u8,
        #[arg(allow_negative_numbers = true)]
        position: i32,
    },

    /// Move relative to the current target.
    MoveBy {
        motor: u8,
        #[arg(allow_negative_numbers = true)]
        difference: i32,
    },

    GetAxis { motor: u8, parameter: u8 },

    SetAxis {
        motor: u8,
        parameter: u8,
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },

    ReadRegister {
        #[arg(value_parser = parse_u8)]
        address: u8,
    },

    WriteRegister {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
}

/// Parses decimal or `0x`-prefixed hex.
fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("'{text}' is not a number: {e}"))
}

fn parse_u8(text: &str) -> Result<u8, String> {
    let value = parse_u32(text)?;
    u8::try_from(value).map_err(|_| format!("{value} does not fit in one byte"))
}

impl Cli {
    /// Loads the config file (or the defaults) and applies the overrides.
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ConnectionConfig::default(),
        };

        if let Some(channel) = &self.channel {
            config.transport.set_channel(channel)?;
        }
        if let Some(host) = self.host {
            config.host_address = host;
        }
        if let Some(module) = self.module {
            config.module_address = module;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.reply_timeout_ms = timeout_ms;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `RUST_LOG` wins; otherwise `info`, or `debug` with -v.
    let fallback = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::List { kind } = cli.command {
        for channel in list_available(kind) {
            println!("{channel}");
        }
        return Ok(());
    }

    let config = cli.connection_config()?;
    debug!(?config, "resolved connection config");
    let channel = config.transport.channel();
    let mut tmcl = connection::open(&config).with_context(|| format!("opening {channel}"))?;

    let output = match cli.command {
        Command::List { .. } => None,
        Command::Request {
            command,
            command_type,
            motor_or_bank,
            value,
        } => Some(tmcl.request(command, command_type, motor_or_bank, value)?.to_string()),
        Command::Rotate { motor, velocity } => {
            tmcl.rotate(motor, velocity)?;
            None
        }
        Command::Stop { motor } => {
            tmcl.stop(motor)?;
            None
        }
        Command::MoveTo { motor, position } => {
            tmcl.move_to(motor, position)?;
            None
        }
        Command::MoveBy { motor, difference } => {
            tmcl.move_by(motor, difference)?;
            None
        }
        Command::GetAxis { motor, parameter } => {
            Some(tmcl.get_axis_parameter(motor, parameter)?.to_string())
        }
        Command::SetAxis {
            motor,
            parameter,
            value,
        } => {
            tmcl.set_axis_parameter(motor, parameter, value)?;
            None
        }
        Command::ReadRegister { address } => {
            let value = tmcl.read_register(address)?;
            Some(format!("0x{value:08X}"))
        }
        Command::WriteRegister { address, value } => {
            tmcl.write_register(address, value)?;
            None
        }
    };
    tmcl.close();

    if let Some(output) = output {
        println!("{output}");
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
