use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{NoteStore, StoreError};
use crate::models::{AuthorshipRange, NoteRecord, NoteUpdate, PermissionLevel};

#[derive(Debug, Clone)]
pub struct StoredRevision {
    pub content: String,
    pub authorship: Vec<AuthorshipRange>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    notes: HashMap<String, NoteRecord>,
    view_counts: HashMap<String, u64>,
    revisions: HashMap<String, Vec<StoredRevision>>,
    history: HashMap<(String, String), DateTime<Utc>>,
}

/// In-process note store. Used when no database is configured and by tests,
/// which can inject latency and write failures.
#[derive(Default)]
pub struct MemoryNoteStore {
    state: Mutex<MemoryState>,
    loads: AtomicUsize,
    updates: AtomicUsize,
    fail_updates: AtomicBool,
    load_delay_ms: AtomicUsize,
    update_delay_ms: AtomicUsize,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, record: NoteRecord) {
        self.state().notes.insert(record.id.clone(), record);
    }

    /// Drop a note behind the coordinator's back.
    pub fn remove(&self, note_id: &str) -> Option<NoteRecord> {
        self.state().notes.remove(note_id)
    }

    pub fn note(&self, note_id: &str) -> Option<NoteRecord> {
        self.state().notes.get(note_id).cloned()
    }

    pub fn revisions(&self, note_id: &str) -> Vec<StoredRevision> {
        self.state().revisions.get(note_id).cloned().unwrap_or_default()
    }

    pub fn view_count(&self, note_id: &str) -> u64 {
        self.state().view_counts.get(note_id).copied().unwrap_or(0)
    }

    pub fn last_visit(&self, user_id: &str, note_id: &str) -> Option<DateTime<Utc>> {
        self.state()
            .history
            .get(&(user_id.to_string(), note_id.to_string()))
            .copied()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_update_delay(&self, delay: Duration) {
        self.update_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn load_note(&self, key: &str) -> Result<NoteRecord, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let state = self.state();
        state
            .notes
            .get(key)
            .or_else(|| state.notes.values().find(|n| n.alias.as_deref() == Some(key)))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update_note(&self, update: &NoteUpdate) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let delay = self.update_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("injected write failure".to_string()));
        }

        let mut state = self.state();
        let note = state
            .notes
            .get_mut(&update.note_id)
            .ok_or_else(|| StoreError::NotFound(update.note_id.clone()))?;

        note.title = update.title.clone();
        note.content = update.content.clone();
        note.authorship = update.authorship.clone();
        note.last_change_user = update.last_change_user.clone();
        note.updated_at = update.updated_at;
        for author in &update.new_authors {
            if !note.authors.iter().any(|a| a.user_id == author.user_id) {
                note.authors.push(author.clone());
            }
        }
        debug!("Memory store updated note {}", update.note_id);
        Ok(())
    }

    async fn create_revision(&self, note_id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let note = state
            .notes
            .get(note_id)
            .ok_or_else(|| StoreError::NotFound(note_id.to_string()))?;
        let revision = StoredRevision {
            content: note.content.clone(),
            authorship: note.authorship.clone(),
            created_at: Utc::now(),
        };
        state.revisions.entry(note_id.to_string()).or_default().push(revision);
        Ok(())
    }

    async fn increment_view_count(&self, note_id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.notes.contains_key(note_id) {
            return Err(StoreError::NotFound(note_id.to_string()));
        }
        *state.view_counts.entry(note_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn update_permission(&self, note_id: &str, permission: PermissionLevel) -> Result<(), StoreError> {
        let mut state = self.state();
        let note = state
            .notes
            .get_mut(note_id)
            .ok_or_else(|| StoreError::NotFound(note_id.to_string()))?;
        note.permission = permission;
        Ok(())
    }

    async fn delete_note(&self, note_id: &str) -> Result<(), StoreError> {
        self.state()
            .notes
            .remove(note_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(note_id.to_string()))
    }

    async fn touch_user_history(&self, user_id: &str, note_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state();
        let entry = state
            .history
            .entry((user_id.to_string(), note_id.to_string()))
            .or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }
}
