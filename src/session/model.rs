//! The `Session` record and its status machine.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use ulid::{Generator, Ulid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Initializing,
    Active,
    Idle,
    Terminating,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Terminating => "terminating",
            SessionStatus::Terminated => "terminated",
        }
    }
}

fn generator() -> &'static SyncMutex<Generator> {
    static GENERATOR: OnceLock<SyncMutex<Generator>> = OnceLock::new();
    GENERATOR.get_or_init(|| SyncMutex::new(Generator::new()))
}

/// Generates a fresh time-sortable session id (ULID, canonical 26-char
/// encoding). Backed by a shared `ulid::Generator` so ids stay
/// monotonically non-decreasing even when two sessions are created
/// within the same millisecond.
pub fn new_session_id() -> String {
    let mut gen = generator().lock();
    match gen.generate() {
        Ok(id) => id.to_string(),
        Err(_) => Ulid::new().to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub pty_refs: HashSet<String>,
}

impl Session {
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: SessionStatus::Initializing,
            created_at: now,
            last_activity: now,
            pty_refs: HashSet::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_non_decreasing() {
        let ids: Vec<String> = (0..50).map(|_| new_session_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] <= pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }
}
