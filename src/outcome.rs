//! Test outcomes and identities reported by the test harness

use std::fmt;

use sha2::{Digest, Sha256};

use crate::{Result, TapedeckError};

/// Name used when sanitization leaves nothing usable
pub const FALLBACK_NAME: &str = "unnamed";

const IDENTITY_TAG_BYTES: usize = 4;

/// Final disposition of the test that used a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Test passed
    Passed,
    /// Test failed with the given reason
    Failed(String),
    /// Test was skipped, or no outcome was ever reported
    Skipped,
}

impl Outcome {
    /// Build an outcome from an optional failure, the way test frameworks
    /// report teardown (`None` means the test body completed).
    pub fn from_failure<E: fmt::Display>(failure: Option<E>) -> Self {
        match failure {
            Some(err) => Self::Failed(err.to_string()),
            None => Self::Passed,
        }
    }

    /// Whether this outcome counts as a failure
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Filename discriminator for this outcome
    #[must_use]
    pub const fn discriminator(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed(_) => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Caller-supplied identity of the test that used a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestIdentity {
    test_id: String,
    friendly_name: String,
}

impl TestIdentity {
    /// Create a test identity
    ///
    /// # Errors
    ///
    /// Returns error if the test id is empty or contains null bytes
    pub fn new(test_id: impl Into<String>, friendly_name: impl Into<String>) -> Result<Self> {
        let test_id = test_id.into();
        let friendly_name = friendly_name.into();

        if test_id.is_empty() {
            return Err(TapedeckError::InvalidTestIdentity(
                "Test id cannot be empty".to_string(),
            ));
        }

        if test_id.contains('\0') || friendly_name.contains('\0') {
            return Err(TapedeckError::InvalidTestIdentity(
                "Test identity cannot contain null bytes".to_string(),
            ));
        }

        Ok(Self {
            test_id,
            friendly_name,
        })
    }

    /// Identity whose id doubles as its friendly name
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a valid test id
    pub fn named(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::new(name.clone(), name)
    }

    /// Get the test id
    #[must_use]
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Get the filesystem-friendly name as supplied
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Filesystem-safe form of the friendly name (or the id when the name is
    /// blank), at most `max_len` bytes long
    ///
    /// When sanitizing loses information (replaced characters, truncation) a
    /// short digest of the full identity is appended, so identities that
    /// differ only in dropped characters still get distinct names.
    #[must_use]
    pub fn sanitized(&self, max_len: usize) -> String {
        let source = if self.friendly_name.trim().is_empty() {
            &self.test_id
        } else {
            &self.friendly_name
        };

        let clean = sanitize_component(source, max_len);
        if clean == *source {
            return clean;
        }

        let tag = self.digest();
        if max_len <= tag.len() + 1 {
            return tag[..max_len.clamp(1, tag.len())].to_string();
        }

        let keep = max_len - tag.len() - 1;
        let mut head = sanitize_component(source, keep);
        head.truncate(keep);
        format!("{head}-{tag}")
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.test_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.friendly_name.as_bytes());
        hex::encode(&hasher.finalize()[..IDENTITY_TAG_BYTES])
    }
}

/// A single teardown report from the test harness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    /// Which test used the session
    pub identity: TestIdentity,
    /// How it ended
    pub outcome: Outcome,
}

/// Supplies the teardown report for a session, at most once
pub trait TestOutcomeSource {
    /// Take the report. Later calls return `None`.
    fn take_report(&mut self) -> Option<TestReport>;
}

impl TestOutcomeSource for Option<TestReport> {
    fn take_report(&mut self) -> Option<TestReport> {
        self.take()
    }
}

/// Reduce an arbitrary string to a single safe path component
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
/// Never returns an empty string, a leading dot, or `..`.
#[must_use]
pub fn sanitize_component(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_len));

    for c in raw.chars() {
        if out.len() >= max_len {
            break;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    while out.contains("..") {
        out = out.replace("..", ".");
    }

    let trimmed = out.trim_start_matches('.');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
