//! Deterministic runtime for exercising recording lifecycles in tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::outcome::sanitize_component;
use crate::{Result, TapedeckError};

use super::{copy_local, ContainerRuntime, ProcessHandle, RawCapture, SessionHandle};

/// Bytes present while a capture is still running (zero duration header)
pub const UNFINALIZED_CONTENT: &[u8] = b"FLV\x01\x05\0\0\0\x09duration=00:00:00.00";

/// Bytes of a capture whose encoder flushed cleanly
pub const FINALIZED_CONTENT: &[u8] = b"FLV\x01\x05\0\0\0\x09duration=00:00:04.27;frames=107";

/// How a scripted capture reacts to `stop_capture`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// Finalize and report ready
    Finalize,
    /// Exit without finalizing
    NotReady,
    /// Never exit
    Hang,
    /// Container disappears, taking the artifact with it
    Gone,
}

/// In-process runtime that writes fake captures under a scratch directory
pub struct ScriptedRuntime {
    scratch_dir: PathBuf,
    default_behavior: StopBehavior,
    behaviors: DashMap<String, StopBehavior>,
    refused: DashSet<String>,
    unreadable: DashSet<PathBuf>,
    running: DashMap<String, PathBuf>,
    next_process: AtomicU64,
    discards: AtomicUsize,
    copies: AtomicUsize,
}

impl ScriptedRuntime {
    /// Create a runtime whose captures all finalize cleanly
    #[must_use]
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self::with_default(scratch_dir, StopBehavior::Finalize)
    }

    /// Create a runtime with a default stop behavior
    #[must_use]
    pub fn with_default(scratch_dir: PathBuf, default_behavior: StopBehavior) -> Self {
        Self {
            scratch_dir,
            default_behavior,
            behaviors: DashMap::new(),
            refused: DashSet::new(),
            unreadable: DashSet::new(),
            running: DashMap::new(),
            next_process: AtomicU64::new(0),
            discards: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        }
    }

    /// Override the stop behavior for one container
    pub fn script(&self, container_id: &str, behavior: StopBehavior) {
        self.behaviors.insert(container_id.to_string(), behavior);
    }

    /// Make `start_capture` fail for one container
    pub fn refuse_start(&self, container_id: &str) {
        self.refused.insert(container_id.to_string());
    }

    /// Make `copy_out` fail with a read error for one container's artifacts
    pub fn refuse_copy(&self, container_id: &str) {
        self.unreadable.insert(self.container_dir(container_id));
    }

    /// Number of captures started and not yet stopped
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Number of artifacts removed through `discard`
    #[must_use]
    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::Relaxed)
    }

    /// Number of artifacts copied out
    #[must_use]
    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::Relaxed)
    }

    fn container_dir(&self, container_id: &str) -> PathBuf {
        self.scratch_dir.join(sanitize_component(container_id, 64))
    }

    fn behavior_for(&self, container_id: &str) -> StopBehavior {
        self.behaviors
            .get(container_id)
            .map_or(self.default_behavior, |b| *b)
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn start_capture(&self, session: &SessionHandle) -> Result<ProcessHandle> {
        let container_id = session.container_id();
        if self.refused.contains(container_id) {
            return Err(TapedeckError::Runtime {
                operation: "start_capture",
                details: format!("container {container_id} refused to start capture"),
            });
        }

        let dir = self.container_dir(container_id);
        tokio::fs::create_dir_all(&dir).await?;

        let n = self.next_process.fetch_add(1, Ordering::Relaxed);
        let artifact_path = dir.join(format!("capture-{n}.flv"));
        tokio::fs::write(&artifact_path, UNFINALIZED_CONTENT).await?;

        let process_id = format!("{container_id}-{n}");
        self.running
            .insert(process_id.clone(), artifact_path.clone());

        debug!("Scripted capture {} started at {}", process_id, artifact_path.display());

        Ok(ProcessHandle {
            container_id: container_id.to_string(),
            process_id,
            artifact_path,
        })
    }

    async fn stop_capture(&self, process: &ProcessHandle) -> Result<RawCapture> {
        self.running.remove(&process.process_id);
        let path = process.artifact_path.clone();

        match self.behavior_for(&process.container_id) {
            StopBehavior::Finalize => {
                tokio::fs::write(&path, FINALIZED_CONTENT).await?;
                Ok(RawCapture {
                    path,
                    size: FINALIZED_CONTENT.len() as u64,
                    ready: true,
                })
            }
            StopBehavior::NotReady => Ok(RawCapture {
                path,
                size: UNFINALIZED_CONTENT.len() as u64,
                ready: false,
            }),
            StopBehavior::Hang => std::future::pending().await,
            StopBehavior::Gone => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!("Scripted container already empty: {}", e);
                }
                Err(TapedeckError::ContainerGone(process.container_id.clone()))
            }
        }
    }

    async fn copy_out(&self, container_path: &Path, host_path: &Path) -> Result<()> {
        let refused = container_path
            .parent()
            .is_some_and(|dir| self.unreadable.contains(dir));
        if refused {
            return Err(TapedeckError::Runtime {
                operation: "copy_out",
                details: format!("cannot read {}", container_path.display()),
            });
        }

        copy_local(container_path, host_path).await?;
        self.copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn discard(&self, container_path: &Path) -> Result<()> {
        match tokio::fs::remove_file(container_path).await {
            Ok(()) => {
                self.discards.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
