//! Error and warning types for Tapedeck

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for Tapedeck operations
pub type Result<T> = std::result::Result<T, TapedeckError>;

/// Errors that can occur in Tapedeck
#[derive(Debug, Error)]
pub enum TapedeckError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid test identity
    #[error("Invalid test identity: {0}")]
    InvalidTestIdentity(String),

    /// Capture or session was started twice
    #[error("Recording already started")]
    AlreadyStarted,

    /// Session was finished twice
    #[error("Recording session already finished")]
    AlreadyFinished,

    /// Capture was stopped without a running capture process
    #[error("No capture process is running")]
    CaptureNotRunning,

    /// The container runtime rejected an operation
    #[error("Container runtime failed during {operation}: {details}")]
    Runtime {
        /// Runtime operation that failed
        operation: &'static str,
        /// Failure details reported by the runtime
        details: String,
    },

    /// The container backing a session no longer exists
    #[error("Container is gone: {0}")]
    ContainerGone(String),

    /// Destination directory could not receive the artifact
    #[error("Cannot write recording to {}: {source}", path.display())]
    DestinationWrite {
        /// Destination path that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Too many concurrently active sessions
    #[error("Session limit reached: {0}")]
    SessionLimit(usize),

    /// A session for this container is already registered
    #[error("Session already registered for container {0}")]
    DuplicateSession(String),

    /// No session is registered for this container
    #[error("No session registered for container {0}")]
    UnknownSession(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Non-fatal conditions surfaced alongside a finished recording.
///
/// A warning means the recording is suspect or was lost, never that the
/// session itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingWarning {
    /// The encoder did not flush within the finalization bound
    #[error("capture did not finalize within {waited:?}")]
    FinalizationTimeout {
        /// How long the session waited
        waited: Duration,
    },

    /// The artifact was transferred although it was never confirmed ready
    #[error("recording {} was kept without confirmed finalization", path.display())]
    ArtifactNotFinalized {
        /// Final location of the suspect recording
        path: PathBuf,
    },

    /// The container vanished before capture could be stopped cleanly
    #[error("capture lost: {details}")]
    CaptureLost {
        /// Runtime details
        details: String,
    },

    /// The transient artifact could not be removed
    #[error("failed to discard {}: {details}", path.display())]
    DiscardFailed {
        /// Transient artifact location
        path: PathBuf,
        /// Failure details
        details: String,
    },
}
