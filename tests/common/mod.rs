#![allow(dead_code)]

use chrono::Utc;
use colabri_note::auth::Identity;
use colabri_note::db::memstore::MemoryNoteStore;
use colabri_note::models::{NoteRecord, PermissionLevel, ServerMessage};
use colabri_note::ws::connctx::{ConnectionHandle, Outbound};
use colabri_note::ws::engine::TEXT_CONTAINER;
use colabri_note::ws::{Collab, CollabSettings, Coordinator};
use loro::{ExportMode, LoroDoc, LoroText};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const WAIT: Duration = Duration::from_secs(2);

/// Periodic tasks effectively disabled; tests drive flushes by hand.
pub fn manual_settings() -> CollabSettings {
    CollabSettings {
        flush_interval: Duration::from_secs(3600),
        revision_interval: Duration::from_secs(3600),
        reaper_interval: Duration::from_secs(3600),
    }
}

pub fn note(id: &str, content: &str, permission: PermissionLevel) -> NoteRecord {
    let now = Utc::now();
    NoteRecord {
        id: id.into(),
        alias: None,
        title: "Untitled".into(),
        content: content.into(),
        owner: Some("owner".into()),
        permission,
        last_change_user: None,
        authorship: vec![],
        authors: vec![],
        created_at: now,
        updated_at: now,
    }
}

pub fn start(notes: Vec<NoteRecord>) -> (Collab, Arc<MemoryNoteStore>) {
    let store = Arc::new(MemoryNoteStore::new());
    for record in notes {
        store.insert(record);
    }
    (Collab::start(store.clone(), manual_settings()), store)
}

/// Poll `check` until it holds, panicking after [`WAIT`].
pub async fn wait_until<F, Fut>(coordinator: &Arc<Coordinator>, check: F)
where
    F: Fn(Arc<Coordinator>) -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check(coordinator.clone()).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within {:?}", WAIT);
}

/// A test participant holding its own Loro replica
pub struct Client {
    pub id: String,
    pub rx: UnboundedReceiver<Outbound>,
    pub doc: LoroDoc,
}

impl Client {
    pub fn connect(coordinator: &Coordinator, note_key: &str, identity: Identity) -> Client {
        let (conn, rx) = ConnectionHandle::new(note_key, identity, Some("127.0.0.1:1".into()), None);
        let id = conn.id.clone();
        assert!(coordinator.connect(conn));
        Client { id, rx, doc: LoroDoc::new() }
    }

    /// Next outbound item matching `pred`, skipping others
    pub async fn expect<P>(&mut self, mut pred: P) -> Outbound
    where
        P: FnMut(&Outbound) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(left, self.rx.recv()).await {
                Ok(Some(out)) if pred(&out) => return out,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("connection {} outbox closed", self.id),
                Err(_) => panic!("no matching message for {}", self.id),
            }
        }
    }

    /// Wait for the initial refresh and load its snapshot.
    pub async fn joined(&mut self) {
        let out = self
            .expect(|o| matches!(o, Outbound::Message(ServerMessage::Refresh(_))))
            .await;
        if let Outbound::Message(ServerMessage::Refresh(refresh)) = out {
            self.doc.import(&refresh.snapshot).unwrap();
        }
    }

    /// Local edit, returned as an update blob for the coordinator
    pub fn edit(&self, f: impl FnOnce(&LoroText)) -> Vec<u8> {
        f(&self.doc.get_text(TEXT_CONTAINER));
        self.doc.commit();
        self.doc.export(ExportMode::all_updates()).unwrap()
    }

    pub fn error_code(out: &Outbound) -> Option<u16> {
        match out {
            Outbound::Message(ServerMessage::Error(e)) => Some(e.code),
            _ => None,
        }
    }
}
