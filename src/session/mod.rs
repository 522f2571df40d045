//! Session table, lifecycle, and event fan-out.

pub mod events;
pub mod manager;
pub mod model;

pub use events::{EventEmitter, SessionEvent};
pub use manager::SessionManager;
pub use model::{new_session_id, Session, SessionStatus};
