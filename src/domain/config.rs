use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// uart2uart configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Serial session settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Firmware flashing settings
    #[serde(default)]
    pub flash: FlashConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate used when the caller does not supply one
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,
    /// Driver read timeout; also bounds how long a close waits for the read loop
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Size of the buffer handed to each driver read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Capacity of the per-session received-chunk channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Firmware flashing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Upper bound on the captured output carried in a failure summary
    #[serde(default = "default_max_error_detail")]
    pub max_error_detail: usize,
    /// How long to wait for tool output pipes to drain after exit
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub stm8: Stm8Config,
    #[serde(default)]
    pub esp32: Esp32Config,
}

/// Where the external flashing tools live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub layout: ToolLayoutKind,
    /// Base directory of a packaged build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
    /// Base directory of a development tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_dir: Option<PathBuf>,
    /// Explicit path to the stm8flash executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stm8flash: Option<PathBuf>,
    /// Explicit path to the esptool script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esptool: Option<PathBuf>,
}

/// Tool directory selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolLayoutKind {
    /// Development tree in debug builds, packaged resources in release builds
    #[default]
    Auto,
    Packaged,
    Development,
}

/// Fallback progress estimation for tools that print no percentage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Percentage added per output line without an explicit percentage
    #[serde(default = "default_fallback_step")]
    pub fallback_step: u8,
    /// Ceiling of the fallback estimate, never above 99
    #[serde(default = "default_fallback_cap")]
    pub fallback_cap: u8,
}

/// stm8flash invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stm8Config {
    /// Programmer interface passed with `-c`
    #[serde(default = "default_programmer")]
    pub programmer: String,
}

/// esptool invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Esp32Config {
    /// Interpreter used to run the esptool script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_chip")]
    pub chip: String,
    #[serde(default = "default_esp32_baud_rate")]
    pub baud_rate: u32,
    /// Flash offset the application image is written to
    #[serde(default = "default_flash_offset")]
    pub flash_offset: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout() -> u64 {
    50
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_error_detail() -> usize {
    4096
}

fn default_drain_timeout() -> u64 {
    500
}

fn default_fallback_step() -> u8 {
    5
}

fn default_fallback_cap() -> u8 {
    90
}

fn default_programmer() -> String {
    "stlinkv2".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_chip() -> String {
    "esp32".to_string()
}

fn default_esp32_baud_rate() -> u32 {
    460800
}

fn default_flash_offset() -> String {
    "0x10000".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            read_buffer_size: default_read_buffer_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            max_error_detail: default_max_error_detail(),
            drain_timeout_ms: default_drain_timeout(),
            tools: ToolsConfig::default(),
            progress: ProgressConfig::default(),
            stm8: Stm8Config::default(),
            esp32: Esp32Config::default(),
        }
    }
}

impl FlashConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            fallback_step: default_fallback_step(),
            fallback_cap: default_fallback_cap(),
        }
    }
}

impl Default for Stm8Config {
    fn default() -> Self {
        Self {
            programmer: default_programmer(),
        }
    }
}

impl Default for Esp32Config {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            chip: default_chip(),
            baud_rate: default_esp32_baud_rate(),
            flash_offset: default_flash_offset(),
        }
    }
}
