use crate::core::flash::job::{FlashOptions, FlashRequest, TargetFamily};
use crate::domain::config::{FlashConfig, ToolLayoutKind, ToolsConfig};
use crate::domain::error::{BridgeError, BridgeResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Where the bundled flashing tools are installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLayout {
    /// Installed build: tools live under `<resource_dir>/tools`
    Packaged { resource_dir: PathBuf },
    /// Source checkout: tools live directly under `tools_dir`
    Development { tools_dir: PathBuf },
}

impl ToolLayout {
    pub fn from_config(config: &ToolsConfig) -> BridgeResult<Self> {
        let kind = match config.layout {
            ToolLayoutKind::Auto if cfg!(debug_assertions) => ToolLayoutKind::Development,
            ToolLayoutKind::Auto => ToolLayoutKind::Packaged,
            kind => kind,
        };

        match kind {
            ToolLayoutKind::Development => Ok(ToolLayout::Development {
                tools_dir: config
                    .tools_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tools")),
            }),
            _ => {
                let resource_dir = match &config.resource_dir {
                    Some(dir) => dir.clone(),
                    None => default_resource_dir()?,
                };
                Ok(ToolLayout::Packaged { resource_dir })
            }
        }
    }

    /// Directory holding one subdirectory per tool
    pub fn base_dir(&self) -> PathBuf {
        match self {
            ToolLayout::Packaged { resource_dir } => resource_dir.join("tools"),
            ToolLayout::Development { tools_dir } => tools_dir.clone(),
        }
    }
}

fn default_resource_dir() -> BridgeResult<PathBuf> {
    let exe = std::env::current_exe().map_err(|e| BridgeError::Config {
        message: format!("Cannot locate the running executable: {}", e),
    })?;
    let dir = exe.parent().ok_or_else(|| BridgeError::Config {
        message: format!("Executable path has no parent: {}", exe.display()),
    })?;
    Ok(dir.join("resources"))
}

/// Maps a target family to its flashing tool on disk
#[derive(Debug, Clone)]
pub struct ToolResolver {
    layout: ToolLayout,
    stm8flash: Option<PathBuf>,
    esptool: Option<PathBuf>,
}

impl ToolResolver {
    pub fn new(layout: ToolLayout) -> Self {
        Self {
            layout,
            stm8flash: None,
            esptool: None,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> BridgeResult<Self> {
        let mut resolver = Self::new(ToolLayout::from_config(config)?);
        if let Some(path) = &config.stm8flash {
            resolver = resolver.with_override(TargetFamily::Stm8, path);
        }
        if let Some(path) = &config.esptool {
            resolver = resolver.with_override(TargetFamily::Esp32, path);
        }
        Ok(resolver)
    }

    /// Use `path` for `target` regardless of the layout
    pub fn with_override(mut self, target: TargetFamily, path: impl Into<PathBuf>) -> Self {
        match target {
            TargetFamily::Stm8 => self.stm8flash = Some(path.into()),
            TargetFamily::Esp32 => self.esptool = Some(path.into()),
        }
        self
    }

    pub fn layout(&self) -> &ToolLayout {
        &self.layout
    }

    /// Expected location of the tool, whether or not it exists
    pub fn tool_path(&self, target: TargetFamily) -> PathBuf {
        match target {
            TargetFamily::Stm8 => self.stm8flash.clone().unwrap_or_else(|| {
                self.layout
                    .base_dir()
                    .join("stm8flash")
                    .join(format!("stm8flash{}", std::env::consts::EXE_SUFFIX))
            }),
            TargetFamily::Esp32 => self
                .esptool
                .clone()
                .unwrap_or_else(|| self.layout.base_dir().join("esptool").join("esptool.py")),
        }
    }

    pub fn locate(&self, target: TargetFamily) -> BridgeResult<PathBuf> {
        let path = self.tool_path(target);
        if path.is_file() {
            Ok(path)
        } else {
            Err(BridgeError::ToolNotFound { target, path })
        }
    }
}

/// Program and arguments for one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn build(tool: &Path, request: &FlashRequest, config: &FlashConfig) -> Self {
        let firmware = request.firmware.as_os_str().to_os_string();

        match &request.options {
            FlashOptions::Stm8 { part, programmer } => {
                let programmer = programmer.as_deref().unwrap_or(&config.stm8.programmer);
                Self {
                    program: tool.as_os_str().to_os_string(),
                    args: vec![
                        "-c".into(),
                        programmer.into(),
                        "-p".into(),
                        part.into(),
                        "-w".into(),
                        firmware,
                    ],
                }
            }
            FlashOptions::Esp32 {
                port,
                baud_rate,
                chip,
                flash_offset,
            } => {
                let esp32 = &config.esp32;
                Self {
                    program: esp32.interpreter.clone().into(),
                    args: vec![
                        tool.as_os_str().to_os_string(),
                        "--chip".into(),
                        chip.as_deref().unwrap_or(&esp32.chip).into(),
                        "--port".into(),
                        port.into(),
                        "--baud".into(),
                        baud_rate.unwrap_or(esp32.baud_rate).to_string().into(),
                        "write_flash".into(),
                        flash_offset.as_deref().unwrap_or(&esp32.flash_offset).into(),
                        firmware,
                    ],
                }
            }
        }
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
