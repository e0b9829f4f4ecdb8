//! Supervision of the in-session screen capture

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::runtime::{ContainerRuntime, ProcessHandle, SessionHandle};
use crate::{RecordingWarning, Result, TapedeckError};

/// A video produced by one start/stop pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedArtifact {
    /// Transient location inside the session boundary
    pub path: PathBuf,
    /// Size in bytes, zero when unknown
    pub size: u64,
    /// Encoder finalized the container format
    pub ready: bool,
}

/// Result of stopping a capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedCapture {
    /// Whatever the capture left behind
    pub artifact: CapturedArtifact,
    /// Why the artifact is suspect, if it is
    pub warning: Option<RecordingWarning>,
}

enum CaptureState {
    Idle,
    Running(ProcessHandle),
    Stopped,
}

/// Screen capture bound to one browser session
pub struct CaptureProcess {
    runtime: Arc<dyn ContainerRuntime>,
    session: SessionHandle,
    finalize_timeout: Duration,
    state: CaptureState,
}

impl CaptureProcess {
    /// Create an idle capture for a session
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        session: SessionHandle,
        finalize_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            session,
            finalize_timeout,
            state: CaptureState::Idle,
        }
    }

    /// Launch the capture
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if the capture is running, or the runtime's
    /// error if it cannot launch one
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(TapedeckError::AlreadyStarted);
        }

        let process = self.runtime.start_capture(&self.session).await?;
        info!(
            "Capture {} started for container {}",
            process.process_id,
            self.session.container_id()
        );
        self.state = CaptureState::Running(process);

        Ok(())
    }

    /// Finalize the capture and wait, at most the finalization bound, for the
    /// artifact
    ///
    /// A timeout or a vanished container does not fail the call; the
    /// returned artifact is marked not ready and carries a warning.
    ///
    /// # Errors
    ///
    /// Returns `CaptureNotRunning` if no capture is running
    pub async fn stop(&mut self) -> Result<StoppedCapture> {
        let process = self.take_running().ok_or(TapedeckError::CaptureNotRunning)?;
        Ok(stop_bounded(self.runtime.as_ref(), &process, self.finalize_timeout).await)
    }

    /// Remove the transient artifact
    ///
    /// Failures are reported as a warning rather than an error.
    pub async fn discard(&self, artifact: &CapturedArtifact) -> Option<RecordingWarning> {
        discard_artifact(self.runtime.as_ref(), artifact).await
    }

    /// Whether a capture is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, CaptureState::Running(_))
    }

    /// Get the session this capture is bound to
    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Get the finalization bound
    #[must_use]
    pub fn finalize_timeout(&self) -> Duration {
        self.finalize_timeout
    }

    /// Detach the running process, leaving the capture stopped
    pub(crate) fn take_running(&mut self) -> Option<ProcessHandle> {
        match std::mem::replace(&mut self.state, CaptureState::Stopped) {
            CaptureState::Running(process) => Some(process),
            previous => {
                self.state = previous;
                None
            }
        }
    }

    pub(crate) fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }
}

/// Stop a capture process with a bounded wait
pub(crate) async fn stop_bounded(
    runtime: &dyn ContainerRuntime,
    process: &ProcessHandle,
    finalize_timeout: Duration,
) -> StoppedCapture {
    let partial = CapturedArtifact {
        path: process.artifact_path.clone(),
        size: 0,
        ready: false,
    };

    match tokio::time::timeout(finalize_timeout, runtime.stop_capture(process)).await {
        Ok(Ok(raw)) => {
            debug!(
                "Capture {} stopped: {} bytes, ready={}",
                process.process_id, raw.size, raw.ready
            );
            StoppedCapture {
                artifact: CapturedArtifact {
                    path: raw.path,
                    size: raw.size,
                    ready: raw.ready,
                },
                warning: None,
            }
        }
        Ok(Err(e)) => {
            warn!("Capture {} lost while stopping: {}", process.process_id, e);
            StoppedCapture {
                artifact: partial,
                warning: Some(RecordingWarning::CaptureLost {
                    details: e.to_string(),
                }),
            }
        }
        Err(_) => {
            warn!(
                "Capture {} did not finalize within {:?}",
                process.process_id, finalize_timeout
            );
            StoppedCapture {
                artifact: partial,
                warning: Some(RecordingWarning::FinalizationTimeout {
                    waited: finalize_timeout,
                }),
            }
        }
    }
}

pub(crate) async fn discard_artifact(
    runtime: &dyn ContainerRuntime,
    artifact: &CapturedArtifact,
) -> Option<RecordingWarning> {
    match runtime.discard(&artifact.path).await {
        Ok(()) => {
            debug!("Discarded {}", artifact.path.display());
            None
        }
        Err(e) => {
            warn!("Failed to discard {}: {}", artifact.path.display(), e);
            Some(RecordingWarning::DiscardFailed {
                path: artifact.path.clone(),
                details: e.to_string(),
            })
        }
    }
}
