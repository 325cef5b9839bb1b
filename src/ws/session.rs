use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::connctx::ConnectionHandle;
use super::engine::{LoroSyncEngine, SyncEngine};
use crate::models::{
    derive_title, AuthorProfile, AuthorshipTracker, CheckMessage, CollabError, Cursor, NoteRecord,
    NoteUpdate, OnlineUser, PermissionLevel, RefreshMessage, ServerMessage,
};

/// Display colours handed out to participants
pub const PALETTE: [&str; 12] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4",
    "#f032e6", "#bfef45", "#469990", "#9a6324", "#800000", "#000075",
];

/// Ephemeral state of one live connection
#[derive(Debug, Clone)]
pub struct UserSession {
    pub conn: ConnectionHandle,
    pub note_id: String,
    pub color: String,
    pub cursor: Option<Cursor>,
    pub idle: bool,
    pub client_type: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl UserSession {
    pub fn display_name(&self) -> String {
        let identity = &self.conn.identity;
        identity
            .name
            .clone()
            .or_else(|| identity.id().map(str::to_string))
            .unwrap_or_else(|| "Guest".to_string())
    }

    pub fn online_user(&self) -> OnlineUser {
        OnlineUser {
            id: self.conn.id.clone(),
            login: self.conn.identity.authenticated,
            user_id: self.conn.identity.id().map(str::to_string),
            name: self.display_name(),
            color: self.color.clone(),
            cursor: self.cursor,
            idle: self.idle,
            client_type: self.client_type.clone(),
        }
    }
}

/// Live collaboration state of one note
pub struct NoteSession {
    pub id: String,
    pub alias: Option<String>,
    pub title: String,
    pub owner: Option<String>,
    pub permission: PermissionLevel,
    pub last_change_user: Option<String>,
    pub sockets: Vec<String>,
    /// identity -> last edit time, flushed into user history
    pub temp_users: HashMap<String, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub engine: Box<dyn SyncEngine>,
    pub authors: HashMap<String, AuthorProfile>,
    /// authors registered since the last successful flush
    pub unsaved_authors: HashSet<String>,
    pub authorship: AuthorshipTracker,
    /// Held for the whole of a store write, so writes of one note never overlap
    pub write_lock: Arc<Mutex<()>>,
}

impl NoteSession {
    pub fn bootstrap(record: NoteRecord, now: DateTime<Utc>) -> Result<Self, CollabError> {
        let engine = LoroSyncEngine::new(&record.content)?;
        let authorship = AuthorshipTracker::from_persisted(record.authorship, engine.len(), now);

        Ok(Self {
            id: record.id,
            alias: record.alias,
            title: record.title,
            owner: record.owner,
            permission: record.permission,
            last_change_user: record.last_change_user,
            sockets: Vec::new(),
            temp_users: HashMap::new(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            engine: Box::new(engine),
            authors: record
                .authors
                .into_iter()
                .map(|a| (a.user_id.clone(), a))
                .collect(),
            unsaved_authors: HashSet::new(),
            authorship,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.engine.is_dirty()
    }

    /// Everything a flush writes, captured at the current revision.
    pub fn pending_update(&self, now: DateTime<Utc>) -> (NoteUpdate, u64) {
        let content = self.engine.text();
        let update = NoteUpdate {
            note_id: self.id.clone(),
            title: derive_title(&content),
            content,
            authorship: self.authorship.ranges().to_vec(),
            last_change_user: self.last_change_user.clone(),
            new_authors: self
                .unsaved_authors
                .iter()
                .filter_map(|id| self.authors.get(id).cloned())
                .collect(),
            updated_at: now,
        };
        (update, self.engine.revision())
    }

    /// Apply the bookkeeping of a successful flush.
    pub fn persisted(&mut self, update: &NoteUpdate, revision: u64) {
        self.engine.mark_persisted(revision);
        self.title = update.title.clone();
        self.updated_at = update.updated_at;
        for author in &update.new_authors {
            self.unsaved_authors.remove(&author.user_id);
        }
    }

    pub fn refresh_message(&self) -> Result<RefreshMessage, CollabError> {
        let mut authors: Vec<AuthorProfile> = self.authors.values().cloned().collect();
        authors.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Ok(RefreshMessage {
            id: self.id.clone(),
            alias: self.alias.clone(),
            title: self.title.clone(),
            owner: self.owner.clone(),
            permission: self.permission,
            last_change_user: self.last_change_user.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            revision: self.engine.revision(),
            text: self.engine.text(),
            snapshot: self.engine.snapshot()?,
            authorship: self.authorship.ranges().to_vec(),
            authors,
        })
    }

    pub fn check_message(&self) -> CheckMessage {
        CheckMessage {
            updated_at: self.updated_at,
            revision: self.engine.revision(),
            last_change_user: self.last_change_user.clone(),
        }
    }
}

/// In-memory maps of active notes and live connections
#[derive(Default)]
pub struct Registry {
    pub(crate) notes: HashMap<String, NoteSession>,
    pub(crate) aliases: HashMap<String, String>,
    pub(crate) users: HashMap<String, UserSession>,
}

impl Registry {
    /// Canonical id of an active note, looked up by id or alias
    pub fn resolve(&self, key: &str) -> Option<String> {
        if self.notes.contains_key(key) {
            return Some(key.to_string());
        }
        self.aliases.get(key).filter(|id| self.notes.contains_key(*id)).cloned()
    }

    pub fn insert_note(&mut self, session: NoteSession) {
        if let Some(alias) = &session.alias {
            self.aliases.insert(alias.clone(), session.id.clone());
        }
        self.notes.insert(session.id.clone(), session);
    }

    pub fn remove_note(&mut self, note_id: &str) -> Option<NoteSession> {
        let session = self.notes.remove(note_id)?;
        if let Some(alias) = &session.alias {
            self.aliases.remove(alias);
        }
        Some(session)
    }

    pub fn note(&self, note_id: &str) -> Option<&NoteSession> {
        self.notes.get(note_id)
    }

    pub fn note_mut(&mut self, note_id: &str) -> Option<&mut NoteSession> {
        self.notes.get_mut(note_id)
    }

    pub fn user(&self, conn_id: &str) -> Option<&UserSession> {
        self.users.get(conn_id)
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.notes.values().filter(|n| n.is_dirty()).count()
    }

    /// Presence list of a note, in attach order
    pub fn online_users(&self, note_id: &str) -> Vec<OnlineUser> {
        self.notes
            .get(note_id)
            .map(|note| {
                note.sockets
                    .iter()
                    .filter_map(|s| self.users.get(s))
                    .map(UserSession::online_user)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Send to every socket attached to a note, optionally skipping one.
    pub fn broadcast(&self, note_id: &str, msg: &ServerMessage, except: Option<&str>) {
        let Some(note) = self.notes.get(note_id) else {
            return;
        };
        for socket in &note.sockets {
            if Some(socket.as_str()) == except {
                continue;
            }
            if let Some(user) = self.users.get(socket) {
                user.conn.send(msg.clone());
            }
        }
    }

    pub fn broadcast_online_users(&self, note_id: &str) {
        let users = self.online_users(note_id);
        self.broadcast(
            note_id,
            &ServerMessage::OnlineUsers(crate::models::OnlineUsersMessage { users }),
            None,
        );
    }

    /// First palette colour not already used on the note
    pub fn pick_color(&self, note_id: &str) -> String {
        let used: HashSet<&str> = self
            .notes
            .get(note_id)
            .map(|note| {
                note.sockets
                    .iter()
                    .filter_map(|s| self.users.get(s))
                    .map(|u| u.color.as_str())
                    .collect()
            })
            .unwrap_or_default();

        PALETTE
            .iter()
            .find(|c| !used.contains(**c))
            .copied()
            .unwrap_or_else(|| {
                let n = self.notes.get(note_id).map_or(0, |n| n.sockets.len());
                PALETTE[n % PALETTE.len()]
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Identity;
    use crate::models::AuthorshipRange;

    fn record(content: &str) -> NoteRecord {
        let now = Utc::now();
        NoteRecord {
            id: "n1".into(),
            alias: Some("standup".into()),
            title: "Standup".into(),
            content: content.into(),
            owner: Some("owner".into()),
            permission: PermissionLevel::Editable,
            last_change_user: None,
            authorship: vec![AuthorshipRange {
                author: Some("owner".into()),
                start: 0,
                end: 3,
                created_at: now,
                updated_at: now,
            }],
            authors: vec![AuthorProfile { user_id: "owner".into(), name: None, color: "#123456".into() }],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn bootstrap_covers_loaded_content() {
        let session = NoteSession::bootstrap(record("abcdef"), Utc::now()).unwrap();
        let spans: Vec<_> = session
            .authorship
            .ranges()
            .iter()
            .map(|r| (r.author.clone(), r.start, r.end))
            .collect();
        assert_eq!(spans, vec![(Some("owner".into()), 0, 3), (None, 3, 6)]);
        assert!(!session.is_dirty());
        assert_eq!(session.authors.len(), 1);
    }

    #[test]
    fn registry_resolves_aliases_and_picks_distinct_colors() {
        let mut registry = Registry::default();
        registry.insert_note(NoteSession::bootstrap(record("x"), Utc::now()).unwrap());
        assert_eq!(registry.resolve("standup").as_deref(), Some("n1"));
        assert_eq!(registry.resolve("n1").as_deref(), Some("n1"));
        assert_eq!(registry.resolve("other"), None);

        let first = registry.pick_color("n1");
        let (conn, _rx) = ConnectionHandle::new("n1", Identity::anonymous(), None, None);
        registry.users.insert(
            conn.id.clone(),
            UserSession {
                conn: conn.clone(),
                note_id: "n1".into(),
                color: first.clone(),
                cursor: None,
                idle: false,
                client_type: None,
                connected_at: Utc::now(),
            },
        );
        if let Some(note) = registry.note_mut("n1") {
            note.sockets.push(conn.id.clone());
        }
        assert_ne!(registry.pick_color("n1"), first);
        assert_eq!(registry.online_users("n1")[0].name, "Guest");

        assert!(registry.remove_note("n1").is_some());
        assert_eq!(registry.resolve("standup"), None);
    }
}
