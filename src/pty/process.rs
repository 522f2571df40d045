//! A single PTY: the child shell, a headless terminal emulator, the raw
//! output buffer, and the broadcast channel that feeds subscribers.
//!
//! The child is always a plain `/bin/sh` kept alive for the life of the
//! process; a command is "run" by typing it into that shell's stdin
//! between two marker echoes, the same trick a persistent-session shell
//! tool uses to recover clean output without a dedicated IPC channel.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex as SyncMutex;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

use crate::command::{consent_given, log_bypass_if_dangerous, validate_raw, CONSENT_ENV_VAR};
use crate::error::{AppError, AppResult};

/// Cap on the raw accumulated-output buffer; oldest bytes are discarded
/// once it is exceeded.
pub const OUTPUT_BUFFER_CAP: usize = 2 * 1024 * 1024;

const DISPOSE_GRACE: Duration = Duration::from_secs(3);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long a PTY can go without input/output before it is considered
/// idle. Any activity (a write, or bytes read back from the child)
/// moves it back to `active` immediately.
const ACTIVE_IDLE_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyStatus {
    Initializing,
    Active,
    Idle,
    Terminating,
    Terminated,
}

/// Immutable launch parameters for a PTY, per the data model.
#[derive(Debug, Clone)]
pub struct PtyOptions {
    pub command: String,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
    pub strip_ansi_on_read: bool,
    pub auto_dispose_on_exit: bool,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            command: String::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
            strip_ansi_on_read: false,
            auto_dispose_on_exit: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub screen: String,
    pub cursor: Cursor,
    pub exit_code: Option<i32>,
}

/// Events fanned out to subscribers as bytes arrive from the child.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data(Vec<u8>),
    Error(String),
    Exit(Option<i32>),
}

/// State shared between the PTY's public handle and its background
/// reader task.
struct Shared {
    terminal: SyncMutex<vt100::Parser>,
    output_buffer: SyncMutex<Vec<u8>>,
    exit_code: SyncMutex<Option<i32>>,
    status: SyncMutex<PtyStatus>,
    last_activity: SyncMutex<DateTime<Utc>>,
    events_tx: broadcast::Sender<PtyEvent>,
    subscriber_count: Arc<AtomicUsize>,
    cancel: AtomicBool,
}

impl Shared {
    fn push_bytes(&self, bytes: &[u8]) {
        self.terminal.lock().process(bytes);
        {
            let mut buf = self.output_buffer.lock();
            buf.extend_from_slice(bytes);
            if buf.len() > OUTPUT_BUFFER_CAP {
                let overflow = buf.len() - OUTPUT_BUFFER_CAP;
                buf.drain(0..overflow);
            }
        }
        self.touch_active();
        let _ = self.events_tx.send(PtyEvent::Data(bytes.to_vec()));
    }

    /// Records activity and, if the PTY had gone idle, wakes it back up.
    fn touch_active(&self) {
        *self.last_activity.lock() = Utc::now();
        let mut status = self.status.lock();
        if *status == PtyStatus::Idle {
            *status = PtyStatus::Active;
        }
    }

    /// Lazily transitions `active` to `idle` once `last_activity` has
    /// aged past the threshold, and returns the (possibly just-updated)
    /// status. Leaves every other status untouched.
    fn refresh_idle_status(&self) -> PtyStatus {
        let mut status = self.status.lock();
        if *status == PtyStatus::Active {
            let elapsed = Utc::now().signed_duration_since(*self.last_activity.lock());
            if elapsed > chrono::Duration::from_std(ACTIVE_IDLE_THRESHOLD).unwrap() {
                *status = PtyStatus::Idle;
            }
        }
        *status
    }

    fn mark_exit(&self, code: Option<i32>) {
        *self.exit_code.lock() = Some(code.unwrap_or(-1));
        let _ = self.events_tx.send(PtyEvent::Exit(code));
    }
}

/// A subscription to a PTY's event stream; dropping it decrements the
/// diagnostic subscriber count.
pub struct Subscription {
    pub receiver: broadcast::Receiver<PtyEvent>,
    count: Arc<AtomicUsize>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A single PTY process: child shell, terminal emulator, output buffer.
pub struct PtyProcess {
    id: String,
    options: PtyOptions,
    created_at: DateTime<Utc>,
    shared: Arc<Shared>,
    master: SyncMutex<Box<dyn MasterPty + Send>>,
    writer: AsyncMutex<Box<dyn Write + Send>>,
    child: AsyncMutex<Option<Box<dyn portable_pty::Child + Send>>>,
    start_marker: String,
    end_marker: String,
}

fn marker_pair(id: &str) -> (String, String) {
    (
        format!("__MCP_PTY_START_{id}__"),
        format!("__MCP_PTY_END_{id}__"),
    )
}

impl PtyProcess {
    /// Allocates a PTY pair, spawns `/bin/sh` on the slave end, and
    /// injects the caller's command as typed input, per §4.B.
    pub async fn construct(id: String, options: PtyOptions) -> AppResult<Arc<Self>> {
        if !consent_given() {
            #[cfg(unix)]
            if nix::unistd::Uid::effective().is_root() {
                return Err(AppError::Security(
                    "refusing to spawn a PTY while running as root".to_string(),
                ));
            }
        }
        let bypassed = validate_raw(&options.command).is_err();
        log_bypass_if_dangerous(bypassed);
        validate_raw(&options.command)?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AppError::Resource(format!("failed to allocate pty: {e}")))?;

        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.env("TERM", "xterm-256color");
        cmd.env("LANG", "en_US.UTF-8");
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        if let Some(ref cwd) = options.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| AppError::Resource(format!("failed to spawn shell: {e}")))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| AppError::Resource(format!("failed to clone pty reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| AppError::Resource(format!("failed to take pty writer: {e}")))?;

        let parser = vt100::Parser::new(options.rows, options.cols, 0);

        let shared = Arc::new(Shared {
            terminal: SyncMutex::new(parser),
            output_buffer: SyncMutex::new(Vec::new()),
            exit_code: SyncMutex::new(None),
            status: SyncMutex::new(PtyStatus::Initializing),
            last_activity: SyncMutex::new(Utc::now()),
            events_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            cancel: AtomicBool::new(false),
        });

        let (start_marker, end_marker) = marker_pair(&id);

        let process = Arc::new(Self {
            id: id.clone(),
            options,
            created_at: Utc::now(),
            shared: Arc::clone(&shared),
            master: SyncMutex::new(pair.master),
            writer: AsyncMutex::new(writer),
            child: AsyncMutex::new(Some(child)),
            start_marker: start_marker.clone(),
            end_marker: end_marker.clone(),
        });

        spawn_reader_task(reader, Arc::clone(&shared), id.clone());
        *shared.status.lock() = PtyStatus::Active;

        info!(pty_id = %process.id, "pty spawned");

        let command = process.options.command.clone();
        process
            .write_raw(b"PS1=''\n")
            .await
            .map_err(|e| AppError::Resource(format!("failed priming write: {e}")))?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let injected = format!("echo {start_marker}; {command}; echo {end_marker}\n");
        process
            .write_raw(injected.as_bytes())
            .await
            .map_err(|e| AppError::Resource(format!("failed command injection: {e}")))?;

        Ok(process)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.shared.last_activity.lock()
    }

    pub fn status(&self) -> PtyStatus {
        self.shared.refresh_idle_status()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.shared.exit_code.lock()
    }

    pub fn options(&self) -> &PtyOptions {
        &self.options
    }

    async fn write_raw(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data)?;
        writer.flush()
    }

    /// Writes `data` to the PTY and reports the screen/cursor/exit state
    /// after waiting up to `wait_ms` or child exit, whichever is first.
    pub async fn write(&self, data: &[u8], wait_ms: u64) -> AppResult<WriteOutcome> {
        if !consent_given() {
            // write() revalidates sudo safety on the bytes being typed,
            // mirroring construct()'s check on the launch command.
            if let Ok(text) = std::str::from_utf8(data) {
                let bypassed = validate_raw(text).is_err();
                log_bypass_if_dangerous(bypassed);
                validate_raw(text)?;
            }
        }
        if self.status() == PtyStatus::Terminated {
            return Err(AppError::Resource("pty is not active".to_string()));
        }
        self.write_raw(data)
            .await
            .map_err(|e| AppError::Resource(format!("pty write failed: {e}")))?;
        self.shared.touch_active();

        let deadline = Duration::from_millis(wait_ms);
        let tick = Duration::from_millis(20);
        let mut waited = Duration::ZERO;
        while waited < deadline {
            if self.shared.exit_code.lock().is_some() {
                break;
            }
            tokio::time::sleep(tick).await;
            waited += tick;
        }

        Ok(self.current_outcome())
    }

    fn current_outcome(&self) -> WriteOutcome {
        let terminal = self.shared.terminal.lock();
        let screen = terminal.screen();
        let (row, col) = screen.cursor_position();
        WriteOutcome {
            screen: screen.contents(),
            cursor: Cursor { x: col, y: row },
            exit_code: *self.shared.exit_code.lock(),
        }
    }

    /// Snapshot of the emulator's visible rows.
    pub fn capture_buffer(&self) -> Vec<String> {
        let terminal = self.shared.terminal.lock();
        terminal
            .screen()
            .contents()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Raw accumulated bytes since spawn, subject to the 2 MiB cap.
    pub fn get_output_buffer(&self) -> Vec<u8> {
        self.shared.output_buffer.lock().clone()
    }

    /// Bytes between the last START and END markers; the full buffer if
    /// both markers are not present.
    pub fn get_clean_output(&self) -> Vec<u8> {
        let buffer = self.shared.output_buffer.lock();
        let start_needle = self.start_marker.as_bytes();
        let end_needle = self.end_marker.as_bytes();
        let start_pos = find_last(&buffer, start_needle);
        let end_pos = find_last(&buffer, end_needle);
        match (start_pos, end_pos) {
            (Some(s), Some(e)) if e > s => {
                let content_start = s + start_needle.len();
                buffer[content_start..e].to_vec()
            }
            _ => buffer.clone(),
        }
    }

    /// Propagates a new size to both the emulator and the PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> AppResult<()> {
        if self.status() != PtyStatus::Active && self.status() != PtyStatus::Idle {
            return Err(AppError::Resource("pty is not active".to_string()));
        }
        self.shared.terminal.lock().set_size(rows, cols);
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AppError::Resource(format!("pty resize failed: {e}")))?;
        Ok(())
    }

    /// Registers a listener via the internal broadcast channel.
    pub fn subscribe(&self) -> Subscription {
        self.shared.subscriber_count.fetch_add(1, Ordering::SeqCst);
        Subscription {
            receiver: self.shared.events_tx.subscribe(),
            count: Arc::clone(&self.shared.subscriber_count),
        }
    }

    /// Current diagnostic subscriber count; not an authoritative
    /// lifecycle signal (see `dispose`).
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriber_count.load(Ordering::SeqCst)
    }

    /// Captures all output until exit; resolves on a clean or
    /// SIGTERM-normal exit, rejects otherwise.
    pub async fn to_promise(&self) -> AppResult<Vec<u8>> {
        if let Some(code) = self.exit_code() {
            return self.resolve_promise(code);
        }
        let mut sub = self.subscribe();
        loop {
            match sub.receiver.recv().await {
                Ok(PtyEvent::Exit(code)) => return self.resolve_promise(code.unwrap_or(-1)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return self.resolve_promise(self.exit_code().unwrap_or(-1));
                }
            }
        }
    }

    fn resolve_promise(&self, code: i32) -> AppResult<Vec<u8>> {
        if code == 0 || code == 143 {
            Ok(self.get_output_buffer())
        } else {
            Err(AppError::Resource(format!(
                "child exited with non-zero status {code}"
            )))
        }
    }

    /// Removes all listeners and returns the raw child; the process keeps
    /// running but is no longer managed by this handle.
    pub async fn detach(&self) -> Option<Box<dyn portable_pty::Child + Send>> {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.child.lock().await.take()
    }

    /// Enters `terminating`, signals the child, waits up to the grace
    /// period, escalates to SIGKILL if necessary, then enters
    /// `terminated`. Idempotent.
    ///
    /// The actual SIGTERM/grace/SIGKILL sequence runs on a detached task
    /// that owns the child outright: if this `dispose()` call's own
    /// future is dropped while awaiting it (e.g. a caller racing it
    /// against a timeout), the detached task keeps running to
    /// completion instead of losing the child handle mid-wait, which
    /// would otherwise orphan the real OS process.
    pub async fn dispose(&self) {
        if self.status() == PtyStatus::Terminated {
            return;
        }
        *self.shared.status.lock() = PtyStatus::Terminating;
        self.shared.cancel.store(true, Ordering::SeqCst);

        let mut child_guard = self.child.lock().await;
        let Some(child) = child_guard.take() else {
            *self.shared.status.lock() = PtyStatus::Terminated;
            return;
        };
        drop(child_guard);

        let shared = Arc::clone(&self.shared);
        let pty_id = self.id.clone();
        let handle = tokio::spawn(kill_and_reap(child, shared, pty_id));
        let _ = handle.await;
    }
}

/// Owns `child` exclusively: SIGTERM, wait up to the grace period,
/// escalate to SIGKILL, reap, then mark the shared state terminated.
/// Runs on its own `tokio::spawn`ed task so it survives its caller being
/// cancelled.
async fn kill_and_reap(
    mut child: Box<dyn portable_pty::Child + Send>,
    shared: Arc<Shared>,
    pty_id: String,
) {
    #[cfg(unix)]
    if let Some(pid) = child.process_id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    let waited = wait_for_exit(&mut *child, DISPOSE_GRACE).await;
    if waited.is_none() {
        warn!(pty_id = %pty_id, "pty did not exit within grace period, escalating to SIGKILL");
        let _ = child.kill();
        let _ = wait_for_exit(&mut *child, Duration::from_secs(2)).await;
    }

    let code = child
        .wait()
        .ok()
        .and_then(|status| status.exit_code().try_into().ok());
    shared.mark_exit(code);
    *shared.status.lock() = PtyStatus::Terminated;
    shared.output_buffer.lock().clear();
    info!(pty_id = %pty_id, "pty disposed");
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

async fn wait_for_exit(
    child: &mut (dyn portable_pty::Child + Send),
    timeout: Duration,
) -> Option<()> {
    let tick = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < timeout {
        if let Ok(Some(_status)) = child.try_wait() {
            return Some(());
        }
        tokio::time::sleep(tick).await;
        waited += tick;
    }
    None
}

fn spawn_reader_task(
    mut reader: Box<dyn Read + Send>,
    shared: Arc<Shared>,
    pty_id: String,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            if shared.cancel.load(Ordering::SeqCst) {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => shared.push_bytes(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    trace!(pty_id = %pty_id, error = %e, "pty reader stopped");
                    let _ = shared.events_tx.send(PtyEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        debug!(pty_id = %pty_id, "pty reader task exiting");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_consent() {
        std::env::remove_var(CONSENT_ENV_VAR);
    }

    fn shared_fixture() -> Shared {
        Shared {
            terminal: SyncMutex::new(vt100::Parser::new(24, 80, 0)),
            output_buffer: SyncMutex::new(Vec::new()),
            exit_code: SyncMutex::new(None),
            status: SyncMutex::new(PtyStatus::Active),
            last_activity: SyncMutex::new(Utc::now()),
            events_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            cancel: AtomicBool::new(false),
        }
    }

    #[test]
    fn active_pty_goes_idle_once_threshold_elapses() {
        let shared = shared_fixture();
        *shared.last_activity.lock() = Utc::now() - chrono::Duration::seconds(
            ACTIVE_IDLE_THRESHOLD.as_secs() as i64 + 1,
        );
        assert_eq!(shared.refresh_idle_status(), PtyStatus::Idle);
    }

    #[test]
    fn recent_activity_keeps_pty_active() {
        let shared = shared_fixture();
        assert_eq!(shared.refresh_idle_status(), PtyStatus::Active);
    }

    #[test]
    fn touch_active_wakes_an_idle_pty() {
        let shared = shared_fixture();
        *shared.status.lock() = PtyStatus::Idle;
        shared.touch_active();
        assert_eq!(*shared.status.lock(), PtyStatus::Active);
    }

    #[tokio::test]
    async fn spawn_write_read_dispose_roundtrip() {
        clear_consent();
        let options = PtyOptions {
            command: "echo hello".to_string(),
            ..Default::default()
        };
        let pty = PtyProcess::construct("t1".to_string(), options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pty.status(), PtyStatus::Active);

        let outcome = pty.write(b"echo again\n", 300).await.unwrap();
        assert!(outcome.exit_code.is_none());

        pty.dispose().await;
        assert_eq!(pty.status(), PtyStatus::Terminated);
        // idempotent
        pty.dispose().await;
        assert_eq!(pty.status(), PtyStatus::Terminated);
    }

    #[tokio::test]
    async fn resize_rejected_once_terminated() {
        clear_consent();
        let pty = PtyProcess::construct("t2".to_string(), PtyOptions::default())
            .await
            .unwrap();
        pty.dispose().await;
        assert!(pty.resize(100, 30).is_err());
    }

    #[test]
    fn find_last_locates_rightmost_occurrence() {
        let haystack = b"AAmarkerBBmarkerCC";
        let pos = find_last(haystack, b"marker");
        assert_eq!(pos, Some(10));
    }

    #[test]
    fn clean_output_slices_between_markers() {
        let start = b"START";
        let end = b"END";
        let buffer = b"noiseSTARTpayloadENDtrailer".to_vec();
        let s = find_last(&buffer, start).unwrap() + start.len();
        let e = find_last(&buffer, end).unwrap();
        assert_eq!(&buffer[s..e], b"payload");
    }
}
