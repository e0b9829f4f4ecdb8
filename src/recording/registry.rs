//! Registry of concurrently active recording sessions

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Config, RecordingMode};
use crate::naming::NamingStrategy;
use crate::outcome::{Outcome, TestIdentity};
use crate::retention::RetentionPolicy;
use crate::runtime::{ContainerRuntime, SessionHandle};
use crate::{Result, TapedeckError};

use super::session::{FinishReport, RecordingSession, SessionOptions};
use super::MAX_SESSIONS;

/// Container ids remembered after their sessions end, oldest evicted first
struct RecentIds {
    ids: DashMap<String, u64>,
    next: AtomicU64,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: DashMap::new(),
            next: AtomicU64::new(0),
            capacity,
        }
    }

    fn insert(&self, id: &str) {
        let stamp = self.next.fetch_add(1, Ordering::Relaxed);
        self.ids.insert(id.to_string(), stamp);

        while self.ids.len() > self.capacity {
            let oldest = self
                .ids
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            match oldest {
                Some(oldest) => {
                    self.ids.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    fn remove(&self, id: &str) {
        self.ids.remove(id);
    }

    fn sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// Recording sessions keyed by container id
///
/// Sessions share nothing but the destination directory; each one is locked
/// independently. Ended container ids are remembered, up to the session
/// limit, so a late second `finish` is reported as such.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Mutex<RecordingSession>>>,
    reserved: AtomicUsize,
    finished: RecentIds,
    abandoned: RecentIds,
    runtime: Arc<dyn ContainerRuntime>,
    naming: Option<Arc<dyn NamingStrategy>>,
    retention: Option<Arc<dyn RetentionPolicy>>,
    options: SessionOptions,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a new session registry
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: SessionOptions) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            finished: RecentIds::new(MAX_SESSIONS),
            abandoned: RecentIds::new(MAX_SESSIONS),
            runtime,
            naming: None,
            retention: None,
            options,
            max_sessions: MAX_SESSIONS,
        }
    }

    /// Create a registry from configuration
    #[must_use]
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        Self::new(runtime, config.session_options()).with_max_sessions(config.limits.max_sessions)
    }

    /// Use this naming strategy for every new session
    #[must_use]
    pub fn with_naming(mut self, naming: Arc<dyn NamingStrategy>) -> Self {
        self.naming = Some(naming);
        self
    }

    /// Use this retention policy for every new session
    #[must_use]
    pub fn with_retention(mut self, retention: Arc<dyn RetentionPolicy>) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Limit the number of concurrently active sessions
    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self.finished.capacity = max_sessions;
        self.abandoned.capacity = max_sessions;
        self
    }

    /// Create and begin a session for a container
    ///
    /// # Errors
    ///
    /// Returns error if the container already has an active session, the
    /// session limit is reached, or capture cannot start
    pub async fn begin(
        &self,
        container: SessionHandle,
        mode: RecordingMode,
        destination: impl Into<PathBuf>,
    ) -> Result<String> {
        let container_id = container.container_id().to_string();
        let session = Arc::new(Mutex::new(self.build_session(container)));

        // Reserve the container id and a slot before any await
        match self.sessions.entry(container_id.clone()) {
            Entry::Occupied(_) => {
                return Err(TapedeckError::DuplicateSession(container_id));
            }
            Entry::Vacant(slot) => {
                self.reserve_slot()?;
                slot.insert(Arc::clone(&session));
            }
        }
        self.finished.remove(&container_id);
        self.abandoned.remove(&container_id);

        let mut guard = session.lock().await;
        if let Err(e) = guard.begin(mode, destination).await {
            drop(guard);
            self.unregister(&container_id);
            return Err(e);
        }

        info!(
            "Registered session {} for container {}",
            guard.id(),
            container_id
        );
        Ok(guard.id().to_string())
    }

    /// Finish the session for a container
    ///
    /// # Errors
    ///
    /// Returns `AlreadyFinished` if the container's session already finished,
    /// `UnknownSession` if it never existed, or the session's finish error
    pub async fn finish(
        &self,
        container_id: &str,
        identity: TestIdentity,
        outcome: Option<Outcome>,
    ) -> Result<FinishReport> {
        let Some(session) = self.unregister(container_id) else {
            if self.finished.contains(container_id) {
                return Err(TapedeckError::AlreadyFinished);
            }
            return Err(TapedeckError::UnknownSession(container_id.to_string()));
        };

        self.finished.insert(container_id);
        let mut guard = session.lock().await;
        guard.finish(identity, outcome).await
    }

    /// Tear down a container's session without an outcome
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession` if the container has no active session
    pub async fn teardown(&self, container_id: &str) -> Result<()> {
        let session = self
            .unregister(container_id)
            .ok_or_else(|| TapedeckError::UnknownSession(container_id.to_string()))?;

        let mut guard = session.lock().await;
        guard.abandon().await?;
        if guard.is_abandoned() {
            self.abandoned.insert(container_id);
        }

        Ok(())
    }

    /// Tear down every active session
    ///
    /// Returns how many sessions were torn down.
    ///
    /// # Errors
    ///
    /// Returns the first teardown error, after attempting all of them
    pub async fn teardown_all(&self) -> Result<usize> {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        if !ids.is_empty() {
            warn!("Tearing down {} unfinished sessions", ids.len());
        }

        let results = join_all(ids.iter().map(|id| self.teardown(id))).await;

        let mut torn_down = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => torn_down += 1,
                Err(e) => {
                    warn!("Session teardown failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(torn_down),
        }
    }

    /// Get the number of active sessions
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a container has an active session
    #[must_use]
    pub fn is_active(&self, container_id: &str) -> bool {
        self.sessions.contains_key(container_id)
    }

    /// Containers whose sessions were torn down while still recording
    #[must_use]
    pub fn abandoned(&self) -> Vec<String> {
        self.abandoned.sorted()
    }

    /// Take a session slot, failing at the limit
    fn reserve_slot(&self) -> Result<()> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_sessions).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| TapedeckError::SessionLimit(self.max_sessions))
    }

    /// Remove a session and release its slot
    fn unregister(&self, container_id: &str) -> Option<Arc<Mutex<RecordingSession>>> {
        let (_, session) = self.sessions.remove(container_id)?;
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        Some(session)
    }

    fn build_session(&self, container: SessionHandle) -> RecordingSession {
        let mut session = RecordingSession::new(
            container,
            Arc::clone(&self.runtime),
            self.options.clone(),
        );
        if let Some(naming) = &self.naming {
            session = session.with_naming(Arc::clone(naming));
        }
        if let Some(retention) = &self.retention {
            session = session.with_retention(Arc::clone(retention));
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptedRuntime;
    use tempfile::TempDir;

    fn registry(scratch: &TempDir) -> (Arc<ScriptedRuntime>, SessionRegistry) {
        let runtime = Arc::new(ScriptedRuntime::new(scratch.path().to_path_buf()));
        let registry = SessionRegistry::new(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            SessionOptions::default(),
        );
        (runtime, registry)
    }

    fn handle(id: &str) -> SessionHandle {
        SessionHandle::new(id, ":99").unwrap()
    }

    #[tokio::test]
    async fn test_registry_begin() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);

        assert_eq!(registry.active_count(), 0);

        registry
            .begin(handle("c1"), RecordingMode::RecordAll, out.path())
            .await
            .unwrap();
        assert_eq!(registry.active_count(), 1);
        assert!(registry.is_active("c1"));
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicate() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (runtime, registry) = registry(&scratch);

        registry
            .begin(handle("c1"), RecordingMode::RecordAll, out.path())
            .await
            .unwrap();
        let second = registry
            .begin(handle("c1"), RecordingMode::RecordAll, out.path())
            .await;

        assert!(matches!(second, Err(TapedeckError::DuplicateSession(_))));
        assert_eq!(runtime.running_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_session_limit() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);
        let registry = registry.with_max_sessions(2);

        registry
            .begin(handle("c1"), RecordingMode::RecordAll, out.path())
            .await
            .unwrap();
        registry
            .begin(handle("c2"), RecordingMode::RecordAll, out.path())
            .await
            .unwrap();
        let third = registry
            .begin(handle("c3"), RecordingMode::RecordAll, out.path())
            .await;

        assert!(matches!(third, Err(TapedeckError::SessionLimit(2))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registry_session_limit_under_contention() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);
        let registry = Arc::new(registry.with_max_sessions(4));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let destination = out.path().to_path_buf();
                tokio::spawn(async move {
                    registry
                        .begin(handle(&format!("c{i}")), RecordingMode::RecordAll, destination)
                        .await
                })
            })
            .collect();

        let mut started = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => started += 1,
                Err(TapedeckError::SessionLimit(4)) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(started, 4);
        assert_eq!(refused, 12);
        assert_eq!(registry.active_count(), 4);
    }

    #[tokio::test]
    async fn test_registry_finish_releases_slot() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);
        let registry = registry.with_max_sessions(1);

        registry
            .begin(handle("c1"), RecordingMode::Off, out.path())
            .await
            .unwrap();
        registry
            .finish("c1", TestIdentity::named("t").unwrap(), None)
            .await
            .unwrap();

        registry
            .begin(handle("c2"), RecordingMode::Off, out.path())
            .await
            .unwrap();
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_forgets_oldest_finished() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);
        let registry = registry.with_max_sessions(2);

        for i in 0..5 {
            let id = format!("c{i}");
            registry
                .begin(handle(&id), RecordingMode::Off, out.path())
                .await
                .unwrap();
            registry
                .finish(&id, TestIdentity::named("t").unwrap(), None)
                .await
                .unwrap();
        }

        assert_eq!(registry.finished.sorted(), vec!["c3", "c4"]);
        let latest = registry
            .finish("c4", TestIdentity::named("t").unwrap(), None)
            .await;
        assert!(matches!(latest, Err(TapedeckError::AlreadyFinished)));
        let oldest = registry
            .finish("c0", TestIdentity::named("t").unwrap(), None)
            .await;
        assert!(matches!(oldest, Err(TapedeckError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_registry_failed_begin_is_unregistered() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (runtime, registry) = registry(&scratch);
        runtime.refuse_start("c1");

        let result = registry
            .begin(handle("c1"), RecordingMode::RecordAll, out.path())
            .await;

        assert!(result.is_err());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.reserved.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_registry_finish_twice() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);
        let identity = TestIdentity::named("t").unwrap();

        registry
            .begin(handle("c1"), RecordingMode::RecordAll, out.path())
            .await
            .unwrap();
        registry
            .finish("c1", identity.clone(), Some(Outcome::Passed))
            .await
            .unwrap();
        let second = registry.finish("c1", identity, Some(Outcome::Passed)).await;

        assert!(matches!(second, Err(TapedeckError::AlreadyFinished)));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_finish_unknown() {
        let scratch = TempDir::new().unwrap();
        let (_, registry) = registry(&scratch);

        let result = registry
            .finish("nope", TestIdentity::named("t").unwrap(), None)
            .await;
        assert!(matches!(result, Err(TapedeckError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_registry_teardown_all() {
        let scratch = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let (runtime, registry) = registry(&scratch);

        for i in 0..3 {
            registry
                .begin(handle(&format!("c{i}")), RecordingMode::RecordAll, out.path())
                .await
                .unwrap();
        }

        let torn_down = registry.teardown_all().await.unwrap();

        assert_eq!(torn_down, 3);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(runtime.running_count(), 0);
        assert_eq!(registry.abandoned(), vec!["c0", "c1", "c2"]);
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
