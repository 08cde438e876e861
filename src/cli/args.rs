use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for uart2uart
#[derive(Parser, Debug)]
#[command(
    name = "uart2uart",
    version = env!("CARGO_PKG_VERSION"),
    about = "Dual serial port bridge and firmware flasher",
    long_about = "Opens one or two serial ports, optionally forwards traffic between them, and flashes STM8 or ESP32 firmware through the bundled tools."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports
    Ports,
    /// Open one or two ports and print received data
    Monitor(MonitorArgs),
    /// Flash firmware onto a microcontroller
    Flash(FlashArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Serial monitor arguments
#[derive(ClapArgs, Debug)]
pub struct MonitorArgs {
    /// Device for session 1
    #[arg(long = "port1", short = 'p')]
    pub port1: Option<String>,

    /// Baud rate for session 1
    #[arg(long = "baud1", short = 'b')]
    pub baud1: Option<u32>,

    /// Device for session 2
    #[arg(long = "port2")]
    pub port2: Option<String>,

    /// Baud rate for session 2
    #[arg(long = "baud2")]
    pub baud2: Option<u32>,

    /// Forwarding mode; dual by default when two ports are open
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Forwarding direction in dual mode
    #[arg(long, value_enum, default_value = "both")]
    pub direction: DirectionArg,

    /// Do not relay data between the ports
    #[arg(long)]
    pub no_auto_forward: bool,

    /// Bytes prepended to every line sent from stdin (escapes: \r \n \t \\ \xNN)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Bytes appended to every line sent from stdin
    #[arg(long)]
    pub suffix: Option<String>,

    /// How stdin lines are decoded before sending
    #[arg(long, value_enum, default_value = "text")]
    pub input_format: DataFormat,

    /// How received data is printed
    #[arg(long, value_enum, default_value = "text")]
    pub display: DisplayFormat,

    /// Session stdin lines are sent to
    #[arg(long, default_value = "1")]
    pub send_to: u8,

    /// Load ports, baud rates and framing from an operator profile
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Write the effective settings to an operator profile
    #[arg(long)]
    pub save_profile: Option<PathBuf>,

    /// Macro file; a stdin line `:name` sends the macro's payload
    #[arg(long)]
    pub macros: Option<PathBuf>,
}

/// Flashing arguments
#[derive(ClapArgs, Debug)]
pub struct FlashArgs {
    /// Flash target
    #[command(subcommand)]
    pub target: FlashTarget,
}

/// Flash target subcommands
#[derive(Subcommand, Debug)]
pub enum FlashTarget {
    /// Flash an STM8 part through an ST-Link programmer
    Stm8 {
        /// Firmware image (.hex)
        firmware: PathBuf,
        /// MCU part number, e.g. stm8s103f3
        #[arg(short, long)]
        part: String,
        /// Programmer interface (defaults to the configured one)
        #[arg(long)]
        programmer: Option<String>,
    },
    /// Flash an ESP32 through its serial bootloader
    Esp32 {
        /// Firmware image (.bin)
        firmware: PathBuf,
        /// Serial port the board is attached to
        #[arg(short, long)]
        port: String,
        /// Bootloader baud rate
        #[arg(short, long)]
        baud: Option<u32>,
        /// Chip name passed to esptool
        #[arg(long)]
        chip: Option<String>,
        /// Flash offset for the image
        #[arg(long)]
        offset: Option<String>,
    },
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Create a project configuration with default values
    Init {
        /// Directory to create `.uart2uart/config.toml` in
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Print configuration file locations
    Path,
}

/// Forwarding mode argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Single,
    Dual,
}

/// Forwarding direction argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionArg {
    /// Port 1 to port 2 only
    OneToTwo,
    /// Port 2 to port 1 only
    TwoToOne,
    Both,
}

/// Data format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Text,
    Hex,
    Base64,
}

/// Received data display argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    Text,
    Hex,
}

impl From<ModeArg> for crate::core::session::ForwardingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Single => Self::Single,
            ModeArg::Dual => Self::Dual,
        }
    }
}

impl From<DirectionArg> for crate::core::session::ForwardDirection {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::OneToTwo => Self::AToB,
            DirectionArg::TwoToOne => Self::BToA,
            DirectionArg::Both => Self::Bidirectional,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFormat::Text => write!(f, "text"),
            DataFormat::Hex => write!(f, "hex"),
            DataFormat::Base64 => write!(f, "base64"),
        }
    }
}
