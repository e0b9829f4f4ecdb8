//! Container runtime capabilities consumed by the recording engine

mod process;
mod scripted;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{Result, TapedeckError};

const COPY_CHUNK: usize = 64 * 1024;

pub use process::ProcessRuntime;
pub use scripted::{ScriptedRuntime, StopBehavior, FINALIZED_CONTENT, UNFINALIZED_CONTENT};

/// A running browser container whose display can be captured
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    container_id: String,
    display: String,
}

impl SessionHandle {
    /// Create a handle for a container and its display target
    ///
    /// # Errors
    ///
    /// Returns error if the container id is empty
    pub fn new(container_id: impl Into<String>, display: impl Into<String>) -> Result<Self> {
        let container_id = container_id.into();
        if container_id.trim().is_empty() {
            return Err(TapedeckError::Other(
                "Container id cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            container_id,
            display: display.into(),
        })
    }

    /// Get the container id
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Get the display target (e.g. `:99.0` or a VNC address)
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }
}

/// A capture process started inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Container the process runs in
    pub container_id: String,
    /// Runtime-assigned process id
    pub process_id: String,
    /// Where the capture is being written, inside the container boundary
    pub artifact_path: PathBuf,
}

/// What the runtime reports after a capture process exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    /// Transient artifact location
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Encoder flushed and container headers are final
    pub ready: bool,
}

/// Start, stop and extract captures from containers
///
/// Implementations report a vanished container as
/// [`TapedeckError::ContainerGone`], failures reading the artifact as
/// [`TapedeckError::Runtime`], and host-side write failures as
/// [`TapedeckError::DestinationWrite`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a capture of the session's display
    async fn start_capture(&self, session: &SessionHandle) -> Result<ProcessHandle>;

    /// Ask the capture to finalize and wait for it to exit
    ///
    /// May wait indefinitely; callers bound it.
    async fn stop_capture(&self, process: &ProcessHandle) -> Result<RawCapture>;

    /// Copy an artifact out of the container to a host path
    async fn copy_out(&self, container_path: &Path, host_path: &Path) -> Result<()>;

    /// Remove a transient artifact
    async fn discard(&self, _container_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Copy a file the host can read directly, keeping read and write failures
/// apart
///
/// # Errors
///
/// Returns `ContainerGone` if `source` is missing, `Runtime` if it cannot be
/// read, and `DestinationWrite` if `host_path` cannot be written
pub(crate) async fn copy_local(source: &Path, host_path: &Path) -> Result<u64> {
    let read_error = |e: std::io::Error| TapedeckError::Runtime {
        operation: "copy_out",
        details: format!("reading {}: {e}", source.display()),
    };
    let write_error = |e: std::io::Error| TapedeckError::DestinationWrite {
        path: host_path.to_path_buf(),
        source: e,
    };

    let mut reader = match tokio::fs::File::open(source).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TapedeckError::ContainerGone(format!(
                "artifact missing: {}",
                source.display()
            )));
        }
        Err(e) => return Err(read_error(e)),
    };
    let mut writer = tokio::fs::File::create(host_path)
        .await
        .map_err(write_error)?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(read_error)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await.map_err(write_error)?;
        copied += n as u64;
    }
    writer.flush().await.map_err(write_error)?;

    Ok(copied)
}
