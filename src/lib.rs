//! Tapedeck - Video-recording coordinator for containerized browser sessions
//!
//! Captures a browser container's display while a test runs, then keeps or
//! discards the video depending on how the test ended.

#![deny(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::multiple_crate_versions
)]

pub mod capture;
pub mod config;
pub mod error;
pub mod naming;
pub mod outcome;
pub mod recording;
pub mod retention;
pub mod runtime;

pub use capture::{CaptureProcess, CapturedArtifact, StoppedCapture};
pub use config::{Config, RecordingMode};
pub use error::{RecordingWarning, Result, TapedeckError};
pub use naming::{DefaultNaming, NameContext, NamingStrategy};
pub use outcome::{Outcome, TestIdentity, TestOutcomeSource, TestReport};
pub use recording::{
    Disposition, FinishReport, Lifecycle, RecordingSession, SessionOptions, SessionRegistry,
};
pub use retention::{should_retain, DefaultRetention, RetentionPolicy};
pub use runtime::{ContainerRuntime, SessionHandle};
