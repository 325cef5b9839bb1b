pub mod connctx;
pub mod coordinator;
pub mod engine;
pub mod guard;
pub mod handler;
pub mod queue;
pub mod scheduler;
pub mod session;

pub use coordinator::{CollabSettings, CollabStats, Coordinator, FlushReport, NoteView};
pub use scheduler::Collab;
