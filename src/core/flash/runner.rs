use crate::core::flash::{
    job::{FlashEvent, FlashRequest, JobId, JobOutcome, JobState, TargetFamily},
    progress::{OutputTail, ProgressTracker},
    tool::{ToolInvocation, ToolResolver},
};
use crate::domain::config::FlashConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Partial lines longer than this are emitted without waiting for a terminator
const MAX_PENDING_LINE: usize = 4096;

struct ActiveJob {
    id: JobId,
    /// Taken on the first cancellation request
    cancel: Option<oneshot::Sender<()>>,
}

struct RunnerInner {
    config: FlashConfig,
    tools: ToolResolver,
    active: Mutex<HashMap<TargetFamily, ActiveJob>>,
    jobs: RwLock<HashMap<JobId, JobState>>,
    next_id: AtomicU64,
    events: mpsc::UnboundedSender<FlashEvent>,
}

/// Flash job runner: one supervised tool process per target family
#[derive(Clone)]
pub struct FlashRunner {
    inner: Arc<RunnerInner>,
}

enum Exit {
    Status(std::io::Result<ExitStatus>),
    Cancelled,
}

impl FlashRunner {
    /// Create a runner resolving tools from `config.tools`
    pub fn new(config: FlashConfig) -> BridgeResult<(Self, mpsc::UnboundedReceiver<FlashEvent>)> {
        let tools = ToolResolver::from_config(&config.tools)?;
        Ok(Self::with_tools(config, tools))
    }

    pub fn with_tools(
        config: FlashConfig,
        tools: ToolResolver,
    ) -> (Self, mpsc::UnboundedReceiver<FlashEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = RunnerInner {
            config,
            tools,
            active: Mutex::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Start flashing. Returns once the tool is running; completion is
    /// reported through [`FlashEvent::Completed`].
    pub async fn start(&self, request: FlashRequest) -> BridgeResult<JobId> {
        let target = request.target();

        // Held until the job is registered so a second start for the family waits.
        let mut active = self.inner.active.lock().await;
        if let Some(running) = active.get(&target) {
            return Err(BridgeError::AlreadyRunning {
                target,
                job: running.id,
            });
        }

        let tools = self.inner.tools.clone();
        let firmware = request.firmware.clone();
        let tool = tokio::task::spawn_blocking(move || {
            let tool = tools.locate(target)?;
            validate_firmware(&firmware, target)?;
            Ok::<_, BridgeError>(tool)
        })
        .await
        .map_err(|e| BridgeError::Spawn {
            target,
            reason: e.to_string(),
        })??;

        let job = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.jobs.write().await.insert(job, JobState::Pending);

        let invocation = ToolInvocation::build(&tool, &request, &self.inner.config);
        info!("Starting {} job {}: {}", target, job, invocation.display());

        let mut command = invocation.command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {} tool for job {}: {}", target, job, e);
                self.inner.jobs.write().await.insert(job, JobState::Failed);
                return Err(BridgeError::Spawn {
                    target,
                    reason: e.to_string(),
                });
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        active.insert(
            target,
            ActiveJob {
                id: job,
                cancel: Some(cancel_tx),
            },
        );
        self.inner.jobs.write().await.insert(job, JobState::Running);
        drop(active);

        tokio::spawn(supervise(Arc::clone(&self.inner), job, target, child, cancel_rx));
        Ok(job)
    }

    /// Kill a running job. It ends `Cancelled` unless the tool had already
    /// exited on its own, in which case its exit status decides the outcome.
    pub async fn cancel(&self, job: JobId) -> BridgeResult<()> {
        let mut active = self.inner.active.lock().await;
        let entry = active
            .values_mut()
            .find(|entry| entry.id == job)
            .ok_or(BridgeError::NotRunning { job })?;

        match entry.cancel.take() {
            Some(cancel) => {
                info!("Cancelling flash job {}", job);
                let _ = cancel.send(());
            }
            None => debug!("Cancellation of job {} already requested", job),
        }
        Ok(())
    }

    /// Request cancellation of every running job
    pub async fn cancel_all(&self) {
        let mut active = self.inner.active.lock().await;
        for entry in active.values_mut() {
            if let Some(cancel) = entry.cancel.take() {
                info!("Cancelling flash job {}", entry.id);
                let _ = cancel.send(());
            }
        }
    }

    pub async fn job_state(&self, job: JobId) -> Option<JobState> {
        self.inner.jobs.read().await.get(&job).copied()
    }

    /// Job currently running for `target`
    pub async fn active_job(&self, target: TargetFamily) -> Option<JobId> {
        self.inner.active.lock().await.get(&target).map(|entry| entry.id)
    }
}

fn validate_firmware(path: &Path, target: TargetFamily) -> BridgeResult<()> {
    let invalid = |reason: String| BridgeError::InvalidFirmware {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file".to_string()));
    }
    std::fs::File::open(path).map_err(|e| invalid(e.to_string()))?;

    let expected = target.firmware_extension();
    let matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(expected))
        .unwrap_or(false);
    if !matches {
        warn!(
            "{} firmware {} does not have a .{} extension",
            target,
            path.display(),
            expected
        );
    }

    Ok(())
}

async fn supervise(
    inner: Arc<RunnerInner>,
    job: JobId,
    target: TargetFamily,
    mut child: Child,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pipe_output(stdout, lines_tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pipe_output(stderr, lines_tx.clone())));
    }
    drop(lines_tx);

    let consumer = {
        let events = inner.events.clone();
        let mut tracker = ProgressTracker::new(&inner.config.progress);
        let mut tail = OutputTail::new(inner.config.max_error_detail);
        tokio::spawn(async move {
            while let Some(text) = lines_rx.recv().await {
                debug!("[{} job {}] {}", target, job, text);
                tail.push(&text);
                let percent = tracker.observe(&text);
                let _ = events.send(FlashEvent::Output { job, text });
                if let Some(percent) = percent {
                    let _ = events.send(FlashEvent::Progress { job, percent });
                }
            }
            (tracker, tail)
        })
    };

    let exit = tokio::select! {
        biased;
        status = child.wait() => Exit::Status(status),
        Ok(()) = &mut cancel_rx => Exit::Cancelled,
    };

    match exit {
        Exit::Cancelled => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} tool for job {}: {}", target, job, e);
            }
        }
        // The tool is gone; a cancel arriving while output drains finds no job.
        Exit::Status(_) => release(&inner, target, job).await,
    }

    let drain = inner.config.drain_timeout();
    for mut reader in readers {
        if tokio::time::timeout(drain, &mut reader).await.is_err() {
            warn!("Output of job {} still open after exit, abandoning it", job);
            reader.abort();
        }
    }

    let (mut tracker, tail) = match consumer.await {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Output consumer for job {} ended abnormally: {}", job, e);
            (
                ProgressTracker::new(&inner.config.progress),
                OutputTail::new(inner.config.max_error_detail),
            )
        }
    };

    if let Exit::Cancelled = exit {
        release(&inner, target, job).await;
    }

    let (outcome, detail) = match exit {
        Exit::Cancelled => (JobOutcome::Cancelled, None),
        Exit::Status(Ok(status)) if status.success() => {
            if let Some(percent) = tracker.finish() {
                let _ = inner.events.send(FlashEvent::Progress { job, percent });
            }
            (JobOutcome::Succeeded, None)
        }
        Exit::Status(Ok(status)) => {
            let error = BridgeError::SubprocessExit {
                target,
                code: status.code(),
                output: tail.contents(),
            };
            (JobOutcome::Failed, Some(error.to_string()))
        }
        Exit::Status(Err(e)) => (
            JobOutcome::Failed,
            Some(format!("Failed to wait for {} tool: {}", target, e)),
        ),
    };

    match outcome {
        JobOutcome::Succeeded => info!("{} job {} succeeded", target, job),
        JobOutcome::Cancelled => info!("{} job {} cancelled", target, job),
        JobOutcome::Failed => warn!(
            "{} job {} failed: {}",
            target,
            job,
            detail.as_deref().unwrap_or("unknown error")
        ),
    }

    inner.jobs.write().await.insert(job, outcome.into());
    let _ = inner.events.send(FlashEvent::Completed {
        job,
        outcome,
        detail,
    });
}

/// Drop the family's active entry if it still belongs to `job`
async fn release(inner: &RunnerInner, target: TargetFamily, job: JobId) {
    let mut active = inner.active.lock().await;
    if active.get(&target).map(|entry| entry.id) == Some(job) {
        active.remove(&target);
    }
}

/// Split a tool stream on `\r` and `\n` and forward each non-empty piece
async fn pipe_output<R>(mut reader: R, lines: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 1024];
    let mut pending: Vec<u8> = Vec::new();

    let flush = |pending: &mut Vec<u8>| {
        if !pending.is_empty() {
            let _ = lines.send(String::from_utf8_lossy(pending).into_owned());
            pending.clear();
        }
    };

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                for &byte in &buffer[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        flush(&mut pending);
                    } else {
                        pending.push(byte);
                    }
                }
                if pending.len() >= MAX_PENDING_LINE {
                    flush(&mut pending);
                }
            }
            Err(e) => {
                debug!("Tool output stream closed: {}", e);
                break;
            }
        }
    }

    flush(&mut pending);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flash::tool::ToolLayout;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> (FlashRunner, mpsc::UnboundedReceiver<FlashEvent>) {
        let tools = ToolResolver::new(ToolLayout::Development {
            tools_dir: dir.path().to_path_buf(),
        });
        FlashRunner::with_tools(FlashConfig::default(), tools)
    }

    #[test]
    fn test_validate_firmware() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("app.bin");
        std::fs::write(&image, [0u8; 16]).unwrap();

        assert!(validate_firmware(&image, TargetFamily::Esp32).is_ok());
        // Wrong extension is only a warning
        assert!(validate_firmware(&image, TargetFamily::Stm8).is_ok());
        assert!(matches!(
            validate_firmware(&dir.path().join("missing.bin"), TargetFamily::Esp32),
            Err(BridgeError::InvalidFirmware { .. })
        ));
        assert!(matches!(
            validate_firmware(dir.path(), TargetFamily::Esp32),
            Err(BridgeError::InvalidFirmware { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let dir = TempDir::new().unwrap();
        let (runner, _events) = runner(&dir);

        assert!(matches!(
            runner.cancel(42).await,
            Err(BridgeError::NotRunning { job: 42 })
        ));
    }

    #[tokio::test]
    async fn test_tool_checked_before_firmware() {
        let dir = TempDir::new().unwrap();
        let (runner, _events) = runner(&dir);

        let result = runner
            .start(FlashRequest::stm8(dir.path().join("missing.hex"), "stm8s103f3"))
            .await;
        assert!(matches!(result, Err(BridgeError::ToolNotFound { .. })));
        assert_eq!(runner.active_job(TargetFamily::Stm8).await, None);
        assert_eq!(runner.job_state(1).await, None);
    }

    #[tokio::test]
    async fn test_pipe_output_splits_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"Connecting...\r\nWriting (10 %)\rWriting (20 %)\npartial";
        pipe_output(input, tx).await;

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec!["Connecting...", "Writing (10 %)", "Writing (20 %)", "partial"]
        );
    }
}
