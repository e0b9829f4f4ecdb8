//! A single recording lifecycle bound to one browser container

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::capture::{self, CaptureProcess};
use crate::config::RecordingMode;
use crate::naming::{is_single_component, DefaultNaming, NameContext, NamingStrategy};
use crate::outcome::{Outcome, TestIdentity, TestOutcomeSource};
use crate::retention::{DefaultRetention, RetentionPolicy};
use crate::runtime::{ContainerRuntime, SessionHandle};
use crate::{RecordingWarning, Result, TapedeckError};

use super::transfer::transfer;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Per-session behavior switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound on waiting for the encoder to finalize
    pub finalize_timeout: Duration,
    /// Move artifacts the encoder never confirmed as finalized
    pub transfer_unfinalized: bool,
    /// Keep skipped tests when only failures are recorded
    pub retain_skipped_when_failing: bool,
    /// Extension used by the default naming strategy
    pub extension: String,
    /// Name bound used by the default naming strategy
    pub max_name_len: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            finalize_timeout: Duration::from_secs(10),
            transfer_unfinalized: true,
            retain_skipped_when_failing: false,
            extension: "flv".to_string(),
            max_name_len: 200,
        }
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Capture not started
    Created,
    /// Capture running
    Recording,
    /// Outcome resolved and artifact kept or discarded
    Finished,
    /// Capture could not be started
    Failed,
}

/// What happened to a session's recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Kept at this path
    Retained {
        /// Final location of the recording
        path: PathBuf,
    },
    /// Not wanted by the retention policy
    Discarded,
    /// Nothing was captured (recording off, never begun, or failed to start)
    NotRecorded,
    /// Wanted by the retention policy but could not be kept
    Lost,
}

/// Result of finishing a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishReport {
    /// Session id
    pub session_id: String,
    /// Resolved outcome
    pub outcome: Outcome,
    /// What happened to the recording
    pub disposition: Disposition,
    /// Reasons the recording is suspect or missing
    pub warnings: Vec<RecordingWarning>,
}

impl FinishReport {
    /// Path of the retained recording, if one was kept
    #[must_use]
    pub fn retained_path(&self) -> Option<&Path> {
        match &self.disposition {
            Disposition::Retained { path } => Some(path),
            _ => None,
        }
    }

    /// Whether the recording should not be trusted as complete
    #[must_use]
    pub fn is_suspect(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// One browser container's recording lifecycle
///
/// `begin` starts capture; `finish` stops it, applies the retention policy,
/// names the file and transfers or discards it. Dropping a session that is
/// still recording releases the capture but keeps nothing.
pub struct RecordingSession {
    id: String,
    naming: Arc<dyn NamingStrategy>,
    retention: Arc<dyn RetentionPolicy>,
    options: SessionOptions,
    mode: Option<RecordingMode>,
    destination: Option<PathBuf>,
    identity: Option<TestIdentity>,
    capture: CaptureProcess,
    lifecycle: Lifecycle,
    abandoned: bool,
}

impl RecordingSession {
    /// Create a session for a running container
    #[must_use]
    pub fn new(
        container: SessionHandle,
        runtime: Arc<dyn ContainerRuntime>,
        options: SessionOptions,
    ) -> Self {
        let naming = Arc::new(DefaultNaming::new(
            options.extension.clone(),
            options.max_name_len,
        ));
        let retention = Arc::new(DefaultRetention {
            retain_skipped_when_failing: options.retain_skipped_when_failing,
        });

        Self {
            id: generate_session_id(container.container_id()),
            naming,
            retention,
            capture: CaptureProcess::new(runtime, container, options.finalize_timeout),
            options,
            mode: None,
            destination: None,
            identity: None,
            lifecycle: Lifecycle::Created,
            abandoned: false,
        }
    }

    /// Replace the naming strategy
    #[must_use]
    pub fn with_naming(mut self, naming: Arc<dyn NamingStrategy>) -> Self {
        self.naming = naming;
        self
    }

    /// Replace the retention policy
    #[must_use]
    pub fn with_retention(mut self, retention: Arc<dyn RetentionPolicy>) -> Self {
        self.retention = retention;
        self
    }

    /// Start recording into `destination`
    ///
    /// With [`RecordingMode::Off`] nothing is captured and `finish` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` if the session was already begun, or the
    /// runtime's error if capture cannot start (the session becomes `Failed`)
    pub async fn begin(
        &mut self,
        mode: RecordingMode,
        destination: impl Into<PathBuf>,
    ) -> Result<()> {
        if self.mode.is_some() || self.lifecycle != Lifecycle::Created {
            return Err(TapedeckError::AlreadyStarted);
        }

        self.mode = Some(mode);
        self.destination = Some(destination.into());

        if mode == RecordingMode::Off {
            info!("Session {}: recording off", self.id);
            return Ok(());
        }

        if let Err(e) = self.capture.start().await {
            error!("Session {}: capture failed to start: {}", self.id, e);
            self.lifecycle = Lifecycle::Failed;
            return Err(e);
        }

        self.lifecycle = Lifecycle::Recording;
        info!(
            "Session {}: recording {:?} for container {}",
            self.id,
            mode,
            self.capture.session().container_id()
        );

        Ok(())
    }

    /// Resolve the session with the test's identity and outcome
    ///
    /// A missing outcome counts as [`Outcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Returns `AlreadyFinished` on a second call, `CaptureNotRunning` if the
    /// session was abandoned, and `DestinationWrite` if a retained recording
    /// could not be written (the session still ends `Finished`)
    pub async fn finish(
        &mut self,
        identity: TestIdentity,
        outcome: Option<Outcome>,
    ) -> Result<FinishReport> {
        if self.lifecycle == Lifecycle::Finished {
            return Err(TapedeckError::AlreadyFinished);
        }
        if self.abandoned {
            return Err(TapedeckError::CaptureNotRunning);
        }

        let outcome = outcome.unwrap_or(Outcome::Skipped);
        self.identity = Some(identity.clone());

        if self.lifecycle != Lifecycle::Recording {
            self.lifecycle = Lifecycle::Finished;
            debug!("Session {}: finished without capture ({})", self.id, outcome);
            return Ok(self.report(outcome, Disposition::NotRecorded, Vec::new()));
        }

        self.lifecycle = Lifecycle::Finished;

        let stopped = self.capture.stop().await?;
        let artifact = stopped.artifact;
        let mut warnings: Vec<RecordingWarning> = stopped.warning.into_iter().collect();

        let mode = self.mode.unwrap_or(RecordingMode::Off);
        let retain = self.retention.should_retain(mode, &outcome);
        info!(
            "Session {}: test {} {}, {:?} -> {}",
            self.id,
            identity.test_id(),
            outcome,
            mode,
            if retain { "retain" } else { "discard" }
        );

        if !retain {
            warnings.extend(self.capture.discard(&artifact).await);
            return Ok(self.report(outcome, Disposition::Discarded, warnings));
        }

        if !artifact.ready && !self.options.transfer_unfinalized {
            warn!(
                "Session {}: recording never finalized, discarding",
                self.id
            );
            warnings.extend(self.capture.discard(&artifact).await);
            return Ok(self.report(outcome, Disposition::Lost, warnings));
        }

        let file_name = self
            .naming
            .file_name(&outcome, &identity, &NameContext::next());
        if !is_single_component(&file_name) {
            warnings.extend(self.capture.discard(&artifact).await);
            return Err(TapedeckError::Other(format!(
                "Naming strategy produced an invalid file name: {file_name:?}"
            )));
        }

        let destination = self.destination.clone().unwrap_or_default();
        let runtime = self.capture.runtime();

        match transfer(runtime.as_ref(), &artifact.path, &destination, &file_name).await {
            Ok(path) => {
                if artifact.ready {
                    info!("Session {}: recording saved to {}", self.id, path.display());
                } else {
                    warn!(
                        "Session {}: kept {} without confirmed finalization",
                        self.id,
                        path.display()
                    );
                    warnings.push(RecordingWarning::ArtifactNotFinalized { path: path.clone() });
                }
                warnings.extend(self.capture.discard(&artifact).await);
                Ok(self.report(outcome, Disposition::Retained { path }, warnings))
            }
            Err(TapedeckError::ContainerGone(details)) => {
                warn!("Session {}: recording lost: {}", self.id, details);
                warnings.push(RecordingWarning::CaptureLost { details });
                Ok(self.report(outcome, Disposition::Lost, warnings))
            }
            Err(TapedeckError::Runtime { details, .. }) => {
                warn!("Session {}: recording unreadable: {}", self.id, details);
                warnings.push(RecordingWarning::CaptureLost { details });
                warnings.extend(self.capture.discard(&artifact).await);
                Ok(self.report(outcome, Disposition::Lost, warnings))
            }
            Err(e) => {
                error!("Session {}: could not save recording: {}", self.id, e);
                if let Some(warning) = self.capture.discard(&artifact).await {
                    debug!("Session {}: {}", self.id, warning);
                }
                Err(e)
            }
        }
    }

    /// Finish from a harness-supplied report
    ///
    /// Without a report the session finishes as skipped, named after its
    /// container.
    ///
    /// # Errors
    ///
    /// Same as [`RecordingSession::finish`]
    pub async fn finish_from<S>(&mut self, source: &mut S) -> Result<FinishReport>
    where
        S: TestOutcomeSource + ?Sized,
    {
        match source.take_report() {
            Some(report) => self.finish(report.identity, Some(report.outcome)).await,
            None => {
                let identity = TestIdentity::named(self.capture.session().container_id())?;
                self.finish(identity, None).await
            }
        }
    }

    /// Release the capture without resolving an outcome
    ///
    /// Used when the container is torn down before the test reports. The
    /// recording is discarded and the session stays `Recording`, flagged as
    /// abandoned.
    ///
    /// # Errors
    ///
    /// Never fails today; reserved for runtimes that cannot release captures
    pub async fn abandon(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Recording || self.abandoned {
            return Ok(());
        }

        self.abandoned = true;
        if let Ok(stopped) = self.capture.stop().await {
            if let Some(warning) = self.capture.discard(&stopped.artifact).await {
                debug!("Session {}: {}", self.id, warning);
            }
        }

        error!(
            "Session {}: container {} torn down before the test reported; recording lost",
            self.id,
            self.capture.session().container_id()
        );

        Ok(())
    }

    fn report(
        &self,
        outcome: Outcome,
        disposition: Disposition,
        warnings: Vec<RecordingWarning>,
    ) -> FinishReport {
        FinishReport {
            session_id: self.id.clone(),
            outcome,
            disposition,
            warnings,
        }
    }

    /// Get the session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the container this session records
    #[must_use]
    pub fn container(&self) -> &SessionHandle {
        self.capture.session()
    }

    /// Get the recording mode, once begun
    #[must_use]
    pub fn mode(&self) -> Option<RecordingMode> {
        self.mode
    }

    /// Get the destination directory, once begun
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Get the test identity, once finished
    #[must_use]
    pub fn identity(&self) -> Option<&TestIdentity> {
        self.identity.as_ref()
    }

    /// Get the lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether the session was torn down without an outcome
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let Some(process) = self.capture.take_running() else {
            return;
        };

        error!(
            "Session {} dropped while recording container {}; recording lost",
            self.id, process.container_id
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "Session {}: no async runtime, capture {} left to the container",
                self.id, process.process_id
            );
            return;
        };

        let runtime = self.capture.runtime();
        let finalize_timeout = self.capture.finalize_timeout();
        handle.spawn(async move {
            let stopped = capture::stop_bounded(runtime.as_ref(), &process, finalize_timeout).await;
            capture::discard_artifact(runtime.as_ref(), &stopped.artifact).await;
        });
    }
}

/// Generate a short session id from the container id
fn generate_session_id(container_id: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(container_id.as_bytes());

    // Add timestamp for uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    hasher.update(timestamp.to_le_bytes());
    hasher.update(NEXT_SESSION.fetch_add(1, Ordering::Relaxed).to_le_bytes());

    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}
