// ============================================================================
// Session State & Version Cache
// ============================================================================
//
// A session moves through:
// Open -> Committed | Discarded
// Both terminal states release the underlying driver session.
//
// ============================================================================

use crate::core::SagaType;
use std::collections::HashMap;

/// Session lifecycle state
///
/// ```text
/// Open ──commit──> Committed
///   │
///   └──discard/drop──> Discarded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Committed,
    Discarded,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Discarded)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Open => write!(f, "OPEN"),
            SessionState::Committed => write!(f, "COMMITTED"),
            SessionState::Discarded => write!(f, "DISCARDED"),
        }
    }
}

/// Versions observed by reads and writes inside one session, keyed by saga
/// type and saga id.
#[derive(Debug, Default)]
pub struct VersionCache {
    versions: HashMap<(SagaType, String), i64>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, saga_type: SagaType, id: &str, version: i64) {
        self.versions.insert((saga_type, id.to_string()), version);
    }

    pub fn retrieve(&self, saga_type: SagaType, id: &str) -> Option<i64> {
        self.versions.get(&(saga_type, id.to_string())).copied()
    }

    pub fn forget(&mut self, saga_type: SagaType, id: &str) {
        self.versions.remove(&(saga_type, id.to_string()));
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
