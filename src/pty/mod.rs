//! PTY allocation, the headless terminal emulator, and per-session
//! PTY bookkeeping.

pub mod manager;
pub mod process;

pub use manager::{CreatedPty, PtyManager, PtySummary};
pub use process::{Cursor, PtyEvent, PtyOptions, PtyProcess, PtyStatus, Subscription, WriteOutcome};
