//! Per-session collection of PTY Processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use super::process::{PtyOptions, PtyProcess, PtyStatus};
use crate::error::{AppError, AppResult};

const INITIAL_OUTPUT_WAIT: Duration = Duration::from_millis(500);

/// The subset of a PTY's state a `list`/`create_pty` caller is shown.
#[derive(Debug, Clone)]
pub struct PtySummary {
    pub id: String,
    pub status: PtyStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct CreatedPty {
    pub pty_id: String,
    pub initial_screen: String,
    pub exit_code: Option<i32>,
}

/// Owns every PTY Process belonging to one session.
pub struct PtyManager {
    ptys: DashMap<String, Arc<PtyProcess>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl PtyManager {
    pub fn new() -> Self {
        Self {
            ptys: DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn next_pty_id(&self) -> String {
        let n = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("pty-{n:x}")
    }

    /// Normalizes `options.command`, constructs the PTY, waits briefly for
    /// initial output, and returns its id/screen/exit code.
    pub async fn create_pty(&self, mut options: PtyOptions) -> AppResult<CreatedPty> {
        let normalized = crate::command::normalize(&options.command)?;
        options.command = normalized.to_injected_line();
        let pty_id = self.next_pty_id();

        let pty = PtyProcess::construct(pty_id.clone(), options).await?;
        self.ptys.insert(pty_id.clone(), Arc::clone(&pty));

        tokio::time::sleep(INITIAL_OUTPUT_WAIT).await;
        let screen = pty.capture_buffer().join("\n");

        info!(pty_id = %pty_id, "pty created");
        Ok(CreatedPty {
            pty_id,
            initial_screen: screen,
            exit_code: pty.exit_code(),
        })
    }

    pub fn get_pty(&self, pty_id: &str) -> Option<Arc<PtyProcess>> {
        self.ptys.get(pty_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_all_ptys(&self) -> Vec<PtySummary> {
        self.ptys
            .iter()
            .map(|entry| {
                let pty = entry.value();
                PtySummary {
                    id: pty.id().to_string(),
                    status: pty.status(),
                    created_at: pty.created_at(),
                    last_activity: pty.last_activity(),
                    exit_code: pty.exit_code(),
                }
            })
            .collect()
    }

    /// Schedules a dispose and removes the PTY from the map.
    pub async fn remove_pty(&self, pty_id: &str) -> bool {
        let Some((_, pty)) = self.ptys.remove(pty_id) else {
            return false;
        };
        pty.dispose().await;
        true
    }

    /// Disposes every managed PTY in parallel, then clears the map.
    pub async fn dispose(&self) {
        let all: Vec<Arc<PtyProcess>> = self
            .ptys
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        futures::future::join_all(all.iter().map(|pty| pty.dispose())).await;
        self.ptys.clear();
    }

    pub fn get_pty_or_not_found(&self, pty_id: &str) -> AppResult<Arc<PtyProcess>> {
        self.get_pty(pty_id)
            .ok_or_else(|| AppError::NotFound(format!("unknown process_id '{pty_id}'")))
    }
}

impl Default for PtyManager {
    fn default() -> Self {
        Self::new()
    }
}
