pub mod memstore;
pub mod pgstore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CollabError, NoteRecord, NoteUpdate, PermissionLevel};

/// Errors raised by a note store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Note not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => CollabError::NotFound(id),
            other => CollabError::Store(other.to_string()),
        }
    }
}

/// Durable note store used by the collaboration coordinator.
/// Every call is a single attempt; callers do not retry.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Load a note by id or alias.
    async fn load_note(&self, key: &str) -> Result<NoteRecord, StoreError>;

    /// Write content, authorship, last change user, timestamp and newly
    /// registered authors.
    async fn update_note(&self, update: &NoteUpdate) -> Result<(), StoreError>;

    /// Persist an immutable revision of the stored note.
    async fn create_revision(&self, note_id: &str) -> Result<(), StoreError>;

    async fn increment_view_count(&self, note_id: &str) -> Result<(), StoreError>;

    async fn update_permission(&self, note_id: &str, permission: PermissionLevel) -> Result<(), StoreError>;

    async fn delete_note(&self, note_id: &str) -> Result<(), StoreError>;

    /// Record that `user_id` edited or opened `note_id` at `at`.
    async fn touch_user_history(&self, user_id: &str, note_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
