//! Backend that runs on the host without GUI drivers.
//!
//! Handles waits, process launches, file operations and simple system
//! queries. Kinds that need a GUI or browser driver fail permanently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tracing::info;

use godhand_core::clock::{Clock, TokioClock};
use godhand_core::traits::{ActionBackend, BackendOutput};
use godhand_core::{Action, ActionKind, BackendError};

/// Longest accepted `wait`.
const MAX_WAIT_SECS: f64 = 3_600.0;

pub struct LocalBackend {
    work_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl LocalBackend {
    /// Relative file paths resolve against `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    async fn wait(&self, action: &Action) -> Result<BackendOutput, BackendError> {
        let seconds = action
            .param_f64("seconds")
            .ok_or_else(|| BackendError::permanent("malformed parameters: seconds"))?;
        if !(0.0..=MAX_WAIT_SECS).contains(&seconds) {
            return Err(BackendError::permanent(format!(
                "malformed parameters: seconds out of range ({seconds})"
            )));
        }
        self.clock.sleep(Duration::from_secs_f64(seconds)).await;
        Ok(BackendOutput::text(format!("已等待 {seconds} 秒")))
    }

    async fn open_application(&self, action: &Action) -> Result<BackendOutput, BackendError> {
        let command = action
            .param_str("command")
            .or_else(|| action.param_str("app_name"))
            .ok_or_else(|| BackendError::permanent("malformed parameters: command"))?;
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| BackendError::permanent("malformed parameters: empty command"))?;

        let child = tokio::process::Command::new(program)
            .args(parts)
            .current_dir(&self.work_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(program, &e))?;

        let app = action.param_str("app_name").unwrap_or(program);
        info!(program, pid = ?child.id(), "application launched");
        Ok(BackendOutput::text(format!("已启动: {app}")))
    }

    async fn file_op(&self, action: &Action) -> Result<BackendOutput, BackendError> {
        let operation = action.param_str("operation").unwrap_or_default();
        let raw = action
            .param_str("path")
            .ok_or_else(|| BackendError::permanent("malformed parameters: path"))?;
        let path = self.resolve(raw);

        match operation {
            "mkdir" => {
                tokio::fs::create_dir_all(&path).await.map_err(|e| io_error(&path, &e))?;
                Ok(BackendOutput::text(format!("已创建文件夹: {}", path.display())))
            }
            "create" => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, &e))?;
                }
                let content = action.param_str("content").unwrap_or_default();
                tokio::fs::write(&path, content).await.map_err(|e| io_error(&path, &e))?;
                Ok(BackendOutput::text(format!("已创建文件: {}", path.display())))
            }
            "read" => {
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| io_error(&path, &e))?;
                Ok(BackendOutput::text(text))
            }
            other => Err(BackendError::permanent(format!(
                "malformed parameters: unsupported file operation '{other}'"
            ))),
        }
    }

    fn system_query(&self, action: &Action) -> Result<BackendOutput, BackendError> {
        match action.param_str("query").unwrap_or_default() {
            "time" => Ok(BackendOutput::text(
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            )),
            "system" => Ok(BackendOutput::text(format!(
                "{} {} ({} 核)",
                std::env::consts::OS,
                std::env::consts::ARCH,
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
            ))),
            other => Err(BackendError::permanent(format!("unsupported query: {other}"))),
        }
    }
}

#[async_trait]
impl ActionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn run(&self, action: &Action) -> Result<BackendOutput, BackendError> {
        match action.kind() {
            ActionKind::Wait => self.wait(action).await,
            ActionKind::OpenApplication => self.open_application(action).await,
            ActionKind::FileOp => self.file_op(action).await,
            ActionKind::SystemQuery => self.system_query(action),
            kind => Err(BackendError::permanent(format!(
                "{kind} requires a GUI driver; the local backend cannot run it"
            ))),
        }
    }
}

fn spawn_error(program: &str, err: &std::io::Error) -> BackendError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            BackendError::permanent(format!("permission denied launching {program}"))
        }
        std::io::ErrorKind::NotFound => {
            BackendError::permanent(format!("application not installed: {program}"))
        }
        _ => BackendError::classify(format!("failed to launch {program}: {err}")),
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> BackendError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            BackendError::permanent(format!("permission denied: {}", path.display()))
        }
        _ => BackendError::permanent(format!("{}: {err}", path.display())),
    }
}
