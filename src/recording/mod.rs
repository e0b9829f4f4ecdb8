//! Recording lifecycle for browser sessions

mod registry;
mod session;
mod transfer;

pub use registry::SessionRegistry;
pub use session::{Disposition, FinishReport, Lifecycle, RecordingSession, SessionOptions};

/// Maximum number of concurrent recording sessions
pub const MAX_SESSIONS: usize = 1024;
