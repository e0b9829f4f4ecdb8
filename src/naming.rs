//! Output file naming for retained recordings

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

use crate::outcome::{Outcome, TestIdentity};

/// Timestamp layout embedded in default file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);
static RUN_TOKEN: OnceLock<u32> = OnceLock::new();

/// Disambiguating inputs handed to a naming strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameContext {
    /// When the outcome was resolved
    pub timestamp: DateTime<Local>,
    /// Token identifying this process run, so separate processes sharing a
    /// destination directory never produce the same name
    pub run: u32,
    /// Process-wide, strictly increasing sequence number
    pub sequence: u64,
}

impl NameContext {
    /// Context for the current instant with the next sequence number
    #[must_use]
    pub fn next() -> Self {
        Self {
            timestamp: Local::now(),
            run: run_token(),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Token for this process, fixed on first use
///
/// Derived from the pid and the start time; pids alone repeat across
/// containers.
#[must_use]
pub fn run_token() -> u32 {
    *RUN_TOKEN.get_or_init(|| {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let mut hasher = Sha256::new();
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(started.to_le_bytes());
        let digest = hasher.finalize();
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    })
}

/// Maps a resolved test to the file name its recording is kept under
///
/// Implementations must be pure: identical arguments give identical names.
/// The returned name must be a single path component.
pub trait NamingStrategy: Send + Sync {
    /// Produce the file name (not a path) for a retained recording
    fn file_name(
        &self,
        outcome: &Outcome,
        identity: &TestIdentity,
        context: &NameContext,
    ) -> String;
}

impl<F> NamingStrategy for F
where
    F: Fn(&Outcome, &TestIdentity, &NameContext) -> String + Send + Sync,
{
    fn file_name(
        &self,
        outcome: &Outcome,
        identity: &TestIdentity,
        context: &NameContext,
    ) -> String {
        self(outcome, identity, context)
    }
}

/// `PASSED-LoginTest-20240101-120000-1a2b3c4d-0007.flv`
#[derive(Debug, Clone)]
pub struct DefaultNaming {
    extension: String,
    max_name_len: usize,
}

impl DefaultNaming {
    /// Create a naming strategy with the given extension and name bound
    #[must_use]
    pub fn new(extension: impl Into<String>, max_name_len: usize) -> Self {
        Self {
            extension: extension.into(),
            max_name_len,
        }
    }
}

impl Default for DefaultNaming {
    fn default() -> Self {
        Self::new("flv", 200)
    }
}

impl NamingStrategy for DefaultNaming {
    fn file_name(
        &self,
        outcome: &Outcome,
        identity: &TestIdentity,
        context: &NameContext,
    ) -> String {
        format!(
            "{}-{}-{}-{:08x}-{:04}.{}",
            outcome.discriminator(),
            identity.sanitized(self.max_name_len),
            context.timestamp.format(TIMESTAMP_FORMAT),
            context.run,
            context.sequence,
            self.extension
        )
    }
}

/// Whether a strategy's output can be joined onto the destination directory
/// without escaping it
#[must_use]
pub fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
