//! Capture backend that runs an encoder as a host subprocess

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::outcome::sanitize_component;
use crate::{Result, TapedeckError};

use super::{copy_local, ContainerRuntime, ProcessHandle, RawCapture, SessionHandle};

/// Placeholder replaced by the session's display target
pub const DISPLAY_PLACEHOLDER: &str = "{display}";

/// Placeholder replaced by the capture output path
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Runs one encoder process per capture, writing into a per-container
/// scratch directory. Stopping writes `q` to the encoder's stdin, which
/// `ffmpeg` treats as a request to flush and close the output.
pub struct ProcessRuntime {
    program: String,
    args: Vec<String>,
    extension: String,
    scratch_dir: PathBuf,
    children: Mutex<HashMap<String, Child>>,
    next_process: AtomicU64,
}

impl ProcessRuntime {
    /// Create a runtime for an arbitrary encoder command
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        extension: impl Into<String>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            extension: extension.into(),
            scratch_dir,
            children: Mutex::new(HashMap::new()),
            next_process: AtomicU64::new(0),
        }
    }

    /// `ffmpeg` grabbing an X11 display into an FLV container
    #[must_use]
    pub fn ffmpeg_x11grab(scratch_dir: PathBuf) -> Self {
        let args = [
            "-loglevel",
            "error",
            "-y",
            "-f",
            "x11grab",
            "-i",
            DISPLAY_PLACEHOLDER,
            "-c:v",
            "flv1",
            OUTPUT_PLACEHOLDER,
        ];
        Self::new(
            "ffmpeg",
            args.iter().map(ToString::to_string).collect(),
            "flv",
            scratch_dir,
        )
    }

    fn render_args(&self, display: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(DISPLAY_PLACEHOLDER, display)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    async fn start_capture(&self, session: &SessionHandle) -> Result<ProcessHandle> {
        let dir = self
            .scratch_dir
            .join(sanitize_component(session.container_id(), 64));
        tokio::fs::create_dir_all(&dir).await?;

        let n = self.next_process.fetch_add(1, Ordering::Relaxed);
        let artifact_path = dir.join(format!("capture-{n}.{}", self.extension));
        let args = self.render_args(session.display(), &artifact_path);

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TapedeckError::Runtime {
                operation: "start_capture",
                details: format!("failed to spawn {}: {e}", self.program),
            })?;

        let process_id = format!("{}-{n}", session.container_id());
        info!(
            "Started {} for container {} (pid {:?})",
            self.program,
            session.container_id(),
            child.id()
        );

        self.children.lock().await.insert(process_id.clone(), child);

        Ok(ProcessHandle {
            container_id: session.container_id().to_string(),
            process_id,
            artifact_path,
        })
    }

    async fn stop_capture(&self, process: &ProcessHandle) -> Result<RawCapture> {
        let child = self.children.lock().await.remove(&process.process_id);
        let Some(mut child) = child else {
            return Err(TapedeckError::ContainerGone(format!(
                "no capture process {}",
                process.process_id
            )));
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q\n").await {
                debug!("Encoder stdin already closed: {}", e);
            }
        }

        let status = child.wait().await.map_err(|e| TapedeckError::Runtime {
            operation: "stop_capture",
            details: e.to_string(),
        })?;

        let size = match tokio::fs::metadata(&process.artifact_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(
                    "Capture output {} unreadable: {}",
                    process.artifact_path.display(),
                    e
                );
                0
            }
        };

        debug!("Capture {} exited with {}", process.process_id, status);

        Ok(RawCapture {
            path: process.artifact_path.clone(),
            size,
            ready: status.success() && size > 0,
        })
    }

    async fn copy_out(&self, container_path: &Path, host_path: &Path) -> Result<()> {
        let copied = copy_local(container_path, host_path).await?;
        debug!("Copied {} bytes to {}", copied, host_path.display());
        Ok(())
    }

    async fn discard(&self, container_path: &Path) -> Result<()> {
        match tokio::fs::remove_file(container_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
