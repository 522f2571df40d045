//! Session Manager event fan-out: a single process-wide broadcast
//! channel, in the style of the event-bus's topic subscribers but
//! without the topic indirection — there is only one kind of listener
//! here, so one channel suffices.

use tokio::sync::broadcast;
use tracing::warn;

use super::model::SessionStatus;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created {
        session_id: String,
    },
    StatusChanged {
        session_id: String,
        from: SessionStatus,
        to: SessionStatus,
    },
    PtyBound {
        session_id: String,
        pty_id: String,
    },
    PtyUnbound {
        session_id: String,
        pty_id: String,
    },
    Terminated {
        session_id: String,
    },
}

/// Thin wrapper around a broadcast sender. Emission errors (no
/// receivers, a lagged receiver) are swallowed: listeners are a
/// diagnostic convenience, not part of the operation's correctness.
pub struct EventEmitter {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.tx.send(event) {
            // A `SendError` here only ever means "no receivers"; that is
            // expected when nothing is watching and is not logged.
            let _ = err;
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs a lagged/closed receiver observed while draining events; kept
/// separate so callers that do watch the stream can report the same way
/// the teacher's event bus reports dead-letter conditions.
pub fn log_recv_error(context: &str, err: &broadcast::error::RecvError) {
    warn!(context, %err, "session event receiver fell behind or closed");
}
