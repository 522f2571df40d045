//! Session table: owns every `Session` and its 1:1 `PtyManager`, and
//! runs the idle-session sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::events::{EventEmitter, SessionEvent};
use super::model::{new_session_id, Session, SessionStatus};
use crate::pty::PtyManager;

const IDLE_THRESHOLD_MINUTES: i64 = 5;
/// How long an `active` session can go without activity before the
/// sweep marks it `idle`. Distinct from, and smaller than,
/// `IDLE_THRESHOLD_MINUTES`, which governs how long an already-`idle`
/// session is kept around before disposal.
const ACTIVE_IDLE_THRESHOLD_MINUTES: i64 = 1;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DISPOSE_RACE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SessionManager {
    sessions: DashMap<String, Session>,
    pty_managers: DashMap<String, Arc<PtyManager>>,
    events: EventEmitter,
    monitoring: AtomicBool,
    sweep_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            pty_managers: DashMap::new(),
            events: EventEmitter::new(),
            monitoring: AtomicBool::new(false),
            sweep_task: AsyncMutex::new(None),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn create_session(&self) -> String {
        let id = new_session_id();
        self.sessions.insert(id.clone(), Session::new(id.clone()));
        self.pty_managers.insert(id.clone(), Arc::new(PtyManager::new()));
        self.events.emit(SessionEvent::Created {
            session_id: id.clone(),
        });
        info!(session_id = %id, "session created");
        id
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_all_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get_pty_manager(&self, id: &str) -> Option<Arc<PtyManager>> {
        self.pty_managers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Bumps `last_activity`; used by handlers on every call that reaches
    /// this session's PTY Manager or a PTY it owns. Any activity on an
    /// `idle` session wakes it back up to `active`.
    pub fn touch(&self, id: &str) -> bool {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return false;
        };
        entry.touch();
        if entry.status == SessionStatus::Idle {
            entry.status = SessionStatus::Active;
        }
        true
    }

    pub fn update_status(&self, id: &str, status: SessionStatus) -> bool {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return false;
        };
        let from = entry.status;
        entry.status = status;
        entry.touch();
        drop(entry);
        self.events.emit(SessionEvent::StatusChanged {
            session_id: id.to_string(),
            from,
            to: status,
        });
        true
    }

    pub fn add_pty(&self, id: &str, pty_id: &str) -> bool {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return false;
        };
        entry.pty_refs.insert(pty_id.to_string());
        entry.touch();
        drop(entry);
        self.events.emit(SessionEvent::PtyBound {
            session_id: id.to_string(),
            pty_id: pty_id.to_string(),
        });
        true
    }

    pub fn remove_pty(&self, id: &str, pty_id: &str) -> bool {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return false;
        };
        let removed = entry.pty_refs.remove(pty_id);
        entry.touch();
        drop(entry);
        if removed {
            self.events.emit(SessionEvent::PtyUnbound {
                session_id: id.to_string(),
                pty_id: pty_id.to_string(),
            });
        }
        removed
    }

    /// Graceful disposal: races each PTY's `dispose("SIGTERM")` against a
    /// 3-second timeout; on timeout, falls back to the force path.
    pub async fn dispose_session(&self, id: &str) -> bool {
        if !self.sessions.contains_key(id) {
            return false;
        }
        self.update_status(id, SessionStatus::Terminating);

        let Some(manager) = self.pty_managers.get(id).map(|e| Arc::clone(e.value())) else {
            return self.finalize_termination(id);
        };

        let disposed = tokio::time::timeout(DISPOSE_RACE_TIMEOUT, manager.dispose()).await;
        if disposed.is_err() {
            warn!(session_id = %id, "session dispose timed out, forcing termination");
            return self.terminate_session(id).await;
        }

        self.finalize_termination(id)
    }

    /// Synchronous force path: SIGKILL every PTY, then drop the session.
    pub async fn terminate_session(&self, id: &str) -> bool {
        if let Some(manager) = self.pty_managers.get(id).map(|e| Arc::clone(e.value())) {
            manager.dispose().await;
        }
        self.finalize_termination(id)
    }

    fn finalize_termination(&self, id: &str) -> bool {
        self.pty_managers.remove(id);
        let removed = self.sessions.remove(id).is_some();
        if removed {
            self.events.emit(SessionEvent::Terminated {
                session_id: id.to_string(),
            });
            info!(session_id = %id, "session terminated");
        }
        removed
    }

    /// Sweeps every session in two passes: first, any `active` session
    /// whose `last_activity` has aged past the active-idle threshold is
    /// moved to `idle`; then any `idle` session whose `last_activity` is
    /// older than the (longer) dispose threshold is scheduled for
    /// disposal.
    pub async fn monitor_idle_sessions(self: &Arc<Self>) {
        let now = Utc::now();

        let went_idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.status == SessionStatus::Active
                    && now.signed_duration_since(entry.last_activity)
                        > chrono::Duration::minutes(ACTIVE_IDLE_THRESHOLD_MINUTES)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in went_idle {
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                if entry.status == SessionStatus::Active {
                    entry.status = SessionStatus::Idle;
                    drop(entry);
                    info!(session_id = %id, "session went idle");
                    self.events.emit(SessionEvent::StatusChanged {
                        session_id: id,
                        from: SessionStatus::Active,
                        to: SessionStatus::Idle,
                    });
                }
            }
        }

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.status == SessionStatus::Idle
                    && now.signed_duration_since(entry.last_activity)
                        > chrono::Duration::minutes(IDLE_THRESHOLD_MINUTES)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in stale {
            info!(session_id = %id, "disposing idle session");
            self.dispose_session(&id).await;
        }
    }

    /// Starts the periodic sweeper if it is not already running.
    pub async fn start_monitoring(self: &Arc<Self>) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.monitor_idle_sessions().await;
            }
        });
        *self.sweep_task.lock().await = Some(handle);
    }

    pub async fn stop_monitoring(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age(manager: &SessionManager, id: &str, minutes: i64) {
        let mut entry = manager.sessions.get_mut(id).unwrap();
        entry.last_activity = Utc::now() - chrono::Duration::minutes(minutes);
    }

    #[tokio::test]
    async fn active_session_goes_idle_after_threshold() {
        let manager = SessionManager::new();
        let id = manager.create_session();
        manager.update_status(&id, SessionStatus::Active);
        age(&manager, &id, ACTIVE_IDLE_THRESHOLD_MINUTES + 1);

        manager.monitor_idle_sessions().await;

        assert_eq!(manager.get_session(&id).unwrap().status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn idle_session_past_dispose_threshold_is_removed() {
        let manager = SessionManager::new();
        let id = manager.create_session();
        manager.update_status(&id, SessionStatus::Idle);
        age(&manager, &id, IDLE_THRESHOLD_MINUTES + 1);

        manager.monitor_idle_sessions().await;

        assert!(manager.get_session(&id).is_none());
    }

    #[tokio::test]
    async fn touch_wakes_an_idle_session() {
        let manager = SessionManager::new();
        let id = manager.create_session();
        manager.update_status(&id, SessionStatus::Idle);

        manager.touch(&id);

        assert_eq!(manager.get_session(&id).unwrap().status, SessionStatus::Active);
    }
}
