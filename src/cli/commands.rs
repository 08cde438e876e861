use crate::cli::args::{
    Args, Command, ConfigCommand, DataFormat, DisplayFormat, FlashArgs, FlashTarget, MonitorArgs,
    OutputFormat,
};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::cli::profile::{MacroSet, OperatorProfile, PortSelection};
use crate::core::flash::{FlashEvent, FlashRequest, FlashRunner, JobOutcome};
use crate::core::session::{
    ForwardDirection, ForwardingLink, ForwardingMode, SendFraming, SessionEvent, SessionId,
    SessionManager,
};
use crate::domain::config::BridgeConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::{NativeSerialDriver, SerialDriver};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> BridgeResult<()> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = ConfigManager::new()?;
    let config = match &args.config {
        Some(path) => config_manager.load_config_from_path(path)?,
        None => config_manager.load_config()?,
    };

    if !args.quiet {
        let level = if args.verbose { "debug" } else { config.global.log_level.as_str() };
        init_logging(level)?;
    }

    match args.command {
        Command::Ports => {
            let (manager, _events) = SessionManager::new(native_driver(), config.serial.clone());
            let ports = manager.list_ports().await?;
            writer.write_ports(&ports)?;
            Ok(())
        }
        Command::Monitor(monitor_args) => execute_monitor_command(monitor_args, &writer, &config).await,
        Command::Flash(flash_args) => {
            execute_flash_command(flash_args, &writer, &config, args.output).await
        }
        Command::Config(config_args) => {
            execute_config_command(config_args, &writer, &config, &config_manager)
        }
        Command::Version => {
            writer.write_message(&format!("uart2uart {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

fn native_driver() -> Arc<dyn SerialDriver> {
    Arc::new(NativeSerialDriver::new())
}

/// Effective monitor settings after merging arguments over a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPlan {
    pub port1: Option<PortSelection>,
    pub port2: Option<PortSelection>,
    pub framing: SendFraming,
    pub mode: ForwardingMode,
    pub direction: ForwardDirection,
    pub auto_forward: bool,
    pub send_to: SessionId,
}

impl MonitorPlan {
    pub fn resolve(args: &MonitorArgs, profile: &OperatorProfile, default_baud_rate: u32) -> BridgeResult<Self> {
        let select = |port: &Option<String>, baud: Option<u32>, saved: &Option<PortSelection>| {
            match (port, saved) {
                (Some(path), _) => Some(PortSelection {
                    selected_port: path.clone(),
                    baud_rate: baud.unwrap_or(default_baud_rate),
                }),
                (None, Some(saved)) => Some(PortSelection {
                    selected_port: saved.selected_port.clone(),
                    baud_rate: baud.unwrap_or(saved.baud_rate),
                }),
                (None, None) => None,
            }
        };

        let port1 = select(&args.port1, args.baud1, &profile.port1);
        let port2 = select(&args.port2, args.baud2, &profile.port2);
        if port1.is_none() && port2.is_none() {
            return Err(BridgeError::InvalidInput(
                "no port given; use --port1 and/or --port2 or a profile".to_string(),
            ));
        }

        let mode = match args.mode {
            Some(mode) => mode.into(),
            None if port1.is_some() && port2.is_some() => ForwardingMode::Dual,
            None => ForwardingMode::Single,
        };
        if mode == ForwardingMode::Dual && (port1.is_none() || port2.is_none()) {
            return Err(BridgeError::InvalidInput("dual mode needs two ports".to_string()));
        }

        let prefix = match &args.prefix {
            Some(prefix) => parse_escapes(prefix)?,
            None => profile.data_prefix.as_bytes().to_vec(),
        };
        let suffix = match &args.suffix {
            Some(suffix) => parse_escapes(suffix)?,
            None => profile.data_suffix.as_bytes().to_vec(),
        };

        let auto_forward = !args.no_auto_forward && profile.auto_forward.unwrap_or(true);

        Ok(Self {
            port1,
            port2,
            framing: SendFraming::new(prefix, suffix),
            mode,
            direction: args.direction.into(),
            auto_forward,
            send_to: args.send_to,
        })
    }

    /// Profile describing this plan
    pub fn to_profile(&self) -> OperatorProfile {
        OperatorProfile {
            data_prefix: String::from_utf8_lossy(&self.framing.prefix).into_owned(),
            data_suffix: String::from_utf8_lossy(&self.framing.suffix).into_owned(),
            port1: self.port1.clone(),
            port2: self.port2.clone(),
            auto_forward: Some(self.auto_forward),
        }
    }
}

async fn execute_monitor_command(
    args: MonitorArgs,
    writer: &ConsoleWriter,
    config: &BridgeConfig,
) -> BridgeResult<()> {
    let profile = match &args.profile {
        Some(path) => OperatorProfile::load(path)?,
        None => OperatorProfile::default(),
    };
    let macros = match &args.macros {
        Some(path) => MacroSet::load(path)?,
        None => MacroSet::default(),
    };
    let plan = MonitorPlan::resolve(&args, &profile, config.serial.default_baud_rate)?;

    let (manager, events) = SessionManager::new(native_driver(), config.serial.clone());
    let result = run_monitor(&manager, events, &plan, &macros, &args, writer).await;

    if let Err(e) = manager.close_all().await {
        warn!("Failed to close sessions: {}", e);
    }
    writer.write_sessions(&manager.list_sessions().await)?;

    if let Some(path) = &args.save_profile {
        plan.to_profile().save(path)?;
        writer.write_message(&format!("Profile saved to '{}'", path.display()))?;
    }

    result
}

async fn run_monitor(
    manager: &SessionManager,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    plan: &MonitorPlan,
    macros: &MacroSet,
    args: &MonitorArgs,
    writer: &ConsoleWriter,
) -> BridgeResult<()> {
    manager.set_framing(plan.framing.clone()).await;
    manager.set_auto_forward(plan.auto_forward).await;

    for (id, selection) in [(1, &plan.port1), (2, &plan.port2)] {
        if let Some(selection) = selection {
            manager
                .open_port(id, &selection.selected_port, Some(selection.baud_rate))
                .await?;
        }
    }

    let link = ForwardingLink::between(1, 2).with_direction(plan.direction);
    manager.set_forwarding_mode(plan.mode, Some(link)).await?;

    writer.write_message("Monitoring (Ctrl+C or end of input to stop)")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => render_session_event(writer, event, args.display)?,
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = send_line(manager, &line, plan.send_to, args.input_format, macros).await {
                        writer.write_error(&e.to_string())?;
                    }
                }
                Ok(None) => {
                    debug!("End of input, stopping monitor");
                    break;
                }
                Err(e) => return Err(e.into()),
            },
            _ = &mut ctrl_c => {
                debug!("Interrupted, stopping monitor");
                break;
            }
        }
    }

    // Print whatever already arrived before the sessions close.
    while let Ok(event) = events.try_recv() {
        render_session_event(writer, event, args.display)?;
    }

    Ok(())
}

fn render_session_event(writer: &ConsoleWriter, event: SessionEvent, display: DisplayFormat) -> BridgeResult<()> {
    match event {
        SessionEvent::Data { id, bytes } => writer.write_port_data(id, &bytes, display)?,
        SessionEvent::Opened { id, path, baud_rate } => {
            writer.write_message(&format!("Session {} opened on '{}' at {} baud", id, path, baud_rate))?
        }
        SessionEvent::Closed { id } => writer.write_message(&format!("Session {} closed", id))?,
        SessionEvent::Error { id, error } => writer.write_error(&format!("session {}: {}", id, error))?,
        SessionEvent::Forwarded { from, to, len } => {
            debug!("Forwarded {} bytes from session {} to {}", len, from, to)
        }
    }
    Ok(())
}

async fn send_line(
    manager: &SessionManager,
    line: &str,
    id: SessionId,
    format: DataFormat,
    macros: &MacroSet,
) -> BridgeResult<()> {
    let payload = match line.strip_prefix(':') {
        Some(name) if !macros.is_empty() => {
            let name = name.trim();
            let entry = macros.get(name).ok_or_else(|| {
                BridgeError::InvalidInput(format!(
                    "unknown macro '{}' (available: {})",
                    name,
                    macros.names().collect::<Vec<_>>().join(", ")
                ))
            })?;
            entry.data.as_bytes().to_vec()
        }
        _ => parse_data(line, format)?,
    };

    manager.send(id, payload).await
}

async fn execute_flash_command(
    args: FlashArgs,
    writer: &ConsoleWriter,
    config: &BridgeConfig,
    format: OutputFormat,
) -> BridgeResult<()> {
    let request = match args.target {
        FlashTarget::Stm8 {
            firmware,
            part,
            programmer,
        } => {
            let request = FlashRequest::stm8(firmware, part);
            match programmer {
                Some(programmer) => request.with_programmer(programmer),
                None => request,
            }
        }
        FlashTarget::Esp32 {
            firmware,
            port,
            baud,
            chip,
            offset,
        } => {
            let mut request = FlashRequest::esp32(firmware, port);
            if let Some(baud) = baud {
                request = request.with_baud_rate(baud);
            }
            if let Some(chip) = chip {
                request = request.with_chip(chip);
            }
            if let Some(offset) = offset {
                request = request.with_flash_offset(offset);
            }
            request
        }
    };
    let target = request.target();

    let (runner, mut events) = FlashRunner::new(config.flash.clone())?;
    let job = runner.start(request).await?;

    let pb = if format == OutputFormat::Json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}")
            .map_err(|e| BridgeError::Output(e.to_string()))?
            .progress_chars("#>-"),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(FlashEvent::Output { text, .. }) => pb.set_message(text),
                Some(FlashEvent::Progress { percent, .. }) => pb.set_position(u64::from(percent)),
                Some(FlashEvent::Completed { job, outcome, detail }) => {
                    match outcome {
                        JobOutcome::Succeeded => pb.finish_and_clear(),
                        _ => pb.abandon(),
                    }
                    writer.write_flash_result(target, job, outcome, detail.as_deref())?;
                    return match outcome {
                        JobOutcome::Failed => Err(BridgeError::JobFailed {
                            job,
                            detail: detail.unwrap_or_else(|| "unknown error".to_string()),
                        }),
                        _ => Ok(()),
                    };
                }
                None => {
                    return Err(BridgeError::JobFailed {
                        job,
                        detail: "flash runner stopped unexpectedly".to_string(),
                    })
                }
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                pb.set_message("cancelling...");
                match runner.cancel(job).await {
                    Ok(()) | Err(BridgeError::NotRunning { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

fn execute_config_command(
    args: crate::cli::args::ConfigArgs,
    writer: &ConsoleWriter,
    config: &BridgeConfig,
    config_manager: &ConfigManager,
) -> BridgeResult<()> {
    match args.command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Init { dir } => {
            let dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir().map_err(|e| BridgeError::Config {
                    message: format!("Failed to get current directory: {}", e),
                })?,
            };
            let path = config_manager.init_project_config(&dir)?;
            writer.write_message(&format!("Project configuration initialized at '{}'", path.display()))?;
            Ok(())
        }
        ConfigCommand::Path => {
            writer.write_message(&format!(
                "Global: {}",
                config_manager.get_global_config_path_ref().display()
            ))?;
            match config_manager.get_project_config_path() {
                Some(path) => writer.write_message(&format!("Project: {}", path.display()))?,
                None => writer.write_message("Project: (none)")?,
            }
            Ok(())
        }
    }
}

/// Decode an operator-entered payload
pub fn parse_data(data: &str, format: DataFormat) -> BridgeResult<Vec<u8>> {
    match format {
        DataFormat::Text => Ok(data.as_bytes().to_vec()),
        DataFormat::Hex => {
            let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(cleaned).map_err(|e| BridgeError::InvalidInput(format!("Invalid hex data: {}", e)))
        }
        DataFormat::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| BridgeError::InvalidInput(format!("Invalid base64 data: {}", e)))
        }
    }
}

/// Expand `\r`, `\n`, `\t`, `\0`, `\\` and `\xNN` in framing arguments
pub fn parse_escapes(input: &str) -> BridgeResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        match chars.next() {
            Some('r') => bytes.push(b'\r'),
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('0') => bytes.push(0),
            Some('\\') => bytes.push(b'\\'),
            Some('x') => {
                let digits: String = chars.by_ref().take(2).collect();
                let value = u8::from_str_radix(&digits, 16).map_err(|_| {
                    BridgeError::InvalidInput(format!("Invalid escape '\\x{}'", digits))
                })?;
                bytes.push(value);
            }
            Some(other) => {
                return Err(BridgeError::InvalidInput(format!("Unknown escape '\\{}'", other)))
            }
            None => return Err(BridgeError::InvalidInput("Trailing backslash".to_string())),
        }
    }

    Ok(bytes)
}
