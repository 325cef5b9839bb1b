//! Realtime collaboration coordinator.
//!
//! Owns the note and user registries and is the only code that mutates them.
//! Connection admission and teardown are funnelled through two serial queues
//! so that store I/O during bootstrap or a final flush never races with
//! another admission or drain.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::{debug, error, info, warn};

use super::connctx::ConnectionHandle;
use super::engine::{EngineHooks, OperationOutcome};
use super::guard;
use super::queue::{Keyed, SerialQueue, SerialWorker};
use super::session::{NoteSession, Registry, UserSession};
use crate::auth::identity::Identity;
use crate::db::NoteStore;
use crate::models::{
    AckMessage, AuthorProfile, AuthorshipRange, AuthorshipTracker, ClientMessage, CollabError,
    Cursor, ErrorMessage, OnlineUsersMessage, PermissionLevel, PermissionMessage, PongMessage,
    RelayedUpdateMessage, ServerMessage, TextEdit, UserMessage,
};

/// Intervals of the periodic persistence tasks
#[derive(Debug, Clone)]
pub struct CollabSettings {
    pub flush_interval: Duration,
    pub revision_interval: Duration,
    pub reaper_interval: Duration,
}

impl Default for CollabSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(1_000),
            revision_interval: Duration::from_millis(300_000),
            reaper_interval: Duration::from_millis(60_000),
        }
    }
}

impl Keyed for ConnectionHandle {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Teardown request for one connection
#[derive(Debug, Clone)]
pub struct DrainJob {
    pub conn_id: String,
}

impl Keyed for DrainJob {
    fn key(&self) -> &str {
        &self.conn_id
    }
}

/// Result of one dirty-flush pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub abandoned: usize,
}

/// Live counters for diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollabStats {
    pub connections: usize,
    pub notes: usize,
    pub dirty_notes: usize,
    pub pending_admissions: usize,
    pub pending_drains: usize,
    /// Revision snapshot passes run so far, idle ones included
    pub revision_passes: u64,
}

/// Read-only copy of a note session's state
#[derive(Debug, Clone)]
pub struct NoteView {
    pub id: String,
    pub sockets: Vec<String>,
    pub text: String,
    pub revision: u64,
    pub dirty: bool,
    pub permission: PermissionLevel,
    pub last_change_user: Option<String>,
    pub authorship: Vec<AuthorshipRange>,
    pub authors: Vec<String>,
}

/// Notes that reached the store since the last revision snapshot
#[derive(Default)]
struct RevisionBacklog {
    pending: StdMutex<HashSet<String>>,
    activity: Notify,
    passes: AtomicU64,
}

impl RevisionBacklog {
    fn mark(&self, note_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(note_id.to_string());
        self.activity.notify_one();
    }

    fn take(&self) -> Vec<String> {
        self.passes.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = pending.drain().collect();
        ids.sort();
        ids
    }
}

pub struct Coordinator {
    registry: Mutex<Registry>,
    store: Arc<dyn NoteStore>,
    admissions: SerialQueue<ConnectionHandle>,
    drains: SerialQueue<DrainJob>,
    revisions: RevisionBacklog,
}

/// Applies the edit path's side effects on the note session while the
/// engine processes one operation.
struct EditHooks<'a> {
    permission: PermissionLevel,
    owner: Option<&'a str>,
    identity: &'a Identity,
    profile: &'a AuthorProfile,
    now: DateTime<Utc>,
    last_change_user: &'a mut Option<String>,
    authorship: &'a mut AuthorshipTracker,
    authors: &'a mut HashMap<String, AuthorProfile>,
    unsaved_authors: &'a mut HashSet<String>,
    temp_users: &'a mut HashMap<String, DateTime<Utc>>,
}

impl EngineHooks for EditHooks<'_> {
    fn may_edit(&mut self, _client: &str, is_text_mutation: bool) -> bool {
        let allowed = guard::may_edit(self.permission, self.owner, self.identity);
        if allowed && is_text_mutation {
            *self.last_change_user = self.identity.id().map(str::to_string);
        }
        allowed
    }

    fn on_operation(&mut self, _client: &str, edits: &[TextEdit]) {
        let author = self.identity.id();
        for edit in edits {
            self.authorship.apply(edit, author, self.now);
        }

        if let Some(user_id) = author {
            if !self.authors.contains_key(user_id) {
                debug!("Registering {} as author", user_id);
                self.authors.insert(user_id.to_string(), self.profile.clone());
                self.unsaved_authors.insert(user_id.to_string());
            }
            self.temp_users.insert(user_id.to_string(), self.now);
        }
    }
}

fn unknown_connection(conn_id: &str) -> CollabError {
    CollabError::NotFound(format!("connection {}", conn_id))
}

fn unknown_note(note_id: &str) -> CollabError {
    CollabError::NotFound(format!("note {}", note_id))
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn NoteStore>,
    ) -> (Arc<Self>, SerialWorker<ConnectionHandle>, SerialWorker<DrainJob>) {
        let (admissions, admission_worker) = SerialQueue::channel("admission");
        let (drains, drain_worker) = SerialQueue::channel("drain");
        let coordinator = Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            store,
            admissions,
            drains,
            revisions: RevisionBacklog::default(),
        });
        (coordinator, admission_worker, drain_worker)
    }

    async fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().await
    }

    /// Queue a new connection for admission.
    pub fn connect(&self, conn: ConnectionHandle) -> bool {
        debug!("Queueing admission of {} for note {}", conn.id, conn.note_key);
        self.admissions.enqueue(conn)
    }

    /// Queue a departed connection for teardown.
    pub fn disconnect(&self, conn_id: &str) -> bool {
        debug!("Queueing drain of {}", conn_id);
        self.drains.enqueue(DrainJob { conn_id: conn_id.to_string() })
    }

    /// Admit one connection. Runs on the admission worker only.
    pub async fn admit(&self, conn: ConnectionHandle) -> Result<String, CollabError> {
        match self.bootstrap_and_attach(&conn).await {
            Ok(note_id) => {
                info!(
                    "Connection {} ({}) joined note {}",
                    conn.id,
                    conn.remote_addr.as_deref().unwrap_or("unknown"),
                    note_id
                );
                if let Err(e) = self.store.increment_view_count(&note_id).await {
                    warn!("Failed to count view of note {}: {}", note_id, e);
                }
                if let Some(user_id) = conn.identity.id() {
                    if let Err(e) = self.store.touch_user_history(user_id, &note_id, Utc::now()).await {
                        warn!("Failed to record visit of {} on note {}: {}", user_id, note_id, e);
                    }
                }
                Ok(note_id)
            }
            Err(e) => {
                warn!("Rejected connection {} for note {}: {}", conn.id, conn.note_key, e);
                conn.reject(&e);
                Err(e)
            }
        }
    }

    async fn bootstrap_and_attach(&self, conn: &ConnectionHandle) -> Result<String, CollabError> {
        {
            let mut registry = self.registry().await;
            if let Some(note_id) = registry.resolve(&conn.note_key) {
                return Self::attach(&mut registry, &note_id, conn);
            }
        }

        let record = self.store.load_note(&conn.note_key).await?;
        let session = NoteSession::bootstrap(record, Utc::now())?;
        let note_id = session.id.clone();

        let mut registry = self.registry().await;
        if registry.note(&note_id).is_none() {
            info!("Opened note session {} ({} chars)", note_id, session.engine.len());
            registry.insert_note(session);
        }
        Self::attach(&mut registry, &note_id, conn)
    }

    /// View check and attach. A session left without sockets by a failed
    /// attach is removed again.
    fn attach(registry: &mut Registry, note_id: &str, conn: &ConnectionHandle) -> Result<String, CollabError> {
        let session = registry.note(note_id).ok_or_else(|| unknown_note(note_id))?;

        let outcome = if !guard::may_view(session.permission, session.owner.as_deref(), &conn.identity) {
            Err(CollabError::Forbidden(format!("no view access to note {}", note_id)))
        } else if conn.is_closed() {
            Err(CollabError::Disconnected(conn.id.clone()))
        } else {
            session.refresh_message()
        };

        let refresh = match outcome {
            Ok(refresh) => refresh,
            Err(e) => {
                if session.sockets.is_empty() {
                    debug!("Discarding unattached note session {}", note_id);
                    registry.remove_note(note_id);
                }
                return Err(e);
            }
        };

        let user = UserSession {
            conn: conn.clone(),
            note_id: note_id.to_string(),
            color: registry.pick_color(note_id),
            cursor: None,
            idle: false,
            client_type: conn.client_type.clone(),
            connected_at: Utc::now(),
        };
        let name = user.display_name();

        let session = registry.note_mut(note_id).ok_or_else(|| unknown_note(note_id))?;
        session.sockets.push(conn.id.clone());
        session.engine.register_client(&conn.id, &name, &user.color);
        registry.users.insert(conn.id.clone(), user);

        conn.send(ServerMessage::Refresh(Box::new(refresh)));
        registry.broadcast_online_users(note_id);
        Ok(note_id.to_string())
    }

    /// Tear down one connection. Runs on the drain worker only.
    pub async fn release(&self, conn_id: &str) {
        let mut registry = self.registry().await;
        let note_ids: Vec<String> = match registry.users.remove(conn_id) {
            Some(user) => vec![user.note_id],
            None => registry
                .notes
                .iter()
                .filter(|(_, note)| note.sockets.iter().any(|s| s == conn_id))
                .map(|(id, _)| id.clone())
                .collect(),
        };

        let mut emptied = Vec::new();
        for note_id in note_ids {
            let Some(session) = registry.note_mut(&note_id) else {
                continue;
            };
            session.sockets.retain(|s| s != conn_id);
            session.engine.remove_client(conn_id);
            if session.sockets.is_empty() {
                emptied.push(note_id);
            } else {
                registry.broadcast_online_users(&note_id);
            }
        }
        drop(registry);
        debug!("Released connection {}", conn_id);

        for note_id in emptied {
            self.close_if_unused(&note_id).await;
        }
    }

    /// Remove a socketless session, flushing it first when dirty. The
    /// session stays registered during the flush so a connection admitted
    /// meanwhile reuses it. A periodic write still in flight for the note is
    /// waited for, so the final write is always the newest.
    async fn close_if_unused(&self, note_id: &str) {
        let write_lock = {
            let registry = self.registry().await;
            match registry.note(note_id) {
                Some(session) if session.sockets.is_empty() => session.write_lock.clone(),
                _ => return,
            }
        };
        let _writing = write_lock.lock_owned().await;

        let (pending, visits) = {
            let mut registry = self.registry().await;
            let Some(session) = registry.note_mut(note_id) else {
                return;
            };
            if !session.sockets.is_empty() {
                return;
            }
            let visits = drain_visits(session);
            let pending = session.is_dirty().then(|| session.pending_update(Utc::now()));
            (pending, visits)
        };
        self.record_visits(visits).await;

        let mut flushed = None;
        if let Some((update, revision)) = pending {
            info!("Final flush of note {} at revision {}", note_id, revision);
            match self.store.update_note(&update).await {
                Ok(()) => {
                    self.revisions.mark(note_id);
                    flushed = Some((update, revision));
                }
                Err(e) => error!("Final flush of note {} failed, unsaved edits are lost: {}", note_id, e),
            }
        }

        let mut registry = self.registry().await;
        let still_unused = match registry.note_mut(note_id) {
            Some(session) => {
                if let Some((update, revision)) = &flushed {
                    session.persisted(update, *revision);
                }
                session.sockets.is_empty()
            }
            None => false,
        };
        if still_unused {
            registry.remove_note(note_id);
            info!("Closed note session {}", note_id);
        } else {
            debug!("Note {} was rejoined during its final flush", note_id);
        }
    }

    /// Dispatch one client message.
    pub async fn handle_message(&self, conn_id: &str, msg: ClientMessage) -> Result<(), CollabError> {
        match msg {
            ClientMessage::Update(update) => self.apply_update(conn_id, &update.delta).await.map(|_| ()),
            ClientMessage::Cursor(cursor) => self.update_cursor(conn_id, cursor.cursor).await,
            ClientMessage::Status(status) => self.update_status(conn_id, status.idle, status.client_type).await,
            ClientMessage::Refresh => self.send_refresh(conn_id).await,
            ClientMessage::Check => self.send_check(conn_id).await,
            ClientMessage::OnlineUsers => self.send_online_users(conn_id).await,
            ClientMessage::Permission(change) => self.change_permission(conn_id, change.permission).await,
            ClientMessage::Delete => self.delete_note(conn_id).await,
            ClientMessage::Ping => self.send_pong(conn_id).await,
        }
    }

    /// Run one client operation through the guard, the engine and the
    /// authorship tracker, then relay it.
    pub async fn apply_update(&self, conn_id: &str, delta: &[u8]) -> Result<OperationOutcome, CollabError> {
        let mut guard = self.registry().await;
        let registry = &mut *guard;

        let user = registry.users.get(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        let note_id = user.note_id.clone();
        let identity = user.conn.identity.clone();
        let profile = AuthorProfile {
            user_id: identity.id().unwrap_or_default().to_string(),
            name: Some(user.display_name()),
            color: user.color.clone(),
        };

        let session = registry.notes.get_mut(&note_id).ok_or_else(|| unknown_note(&note_id))?;
        let NoteSession {
            engine,
            permission,
            owner,
            last_change_user,
            authorship,
            authors,
            unsaved_authors,
            temp_users,
            ..
        } = session;
        let previous_change_user = last_change_user.clone();
        let mut hooks = EditHooks {
            permission: *permission,
            owner: owner.as_deref(),
            identity: &identity,
            profile: &profile,
            now: Utc::now(),
            last_change_user,
            authorship,
            authors,
            unsaved_authors,
            temp_users,
        };
        let outcome = match engine.receive_operation(conn_id, delta, &mut hooks) {
            Ok(outcome) => outcome,
            Err(e) => {
                // nothing was merged
                *hooks.last_change_user = previous_change_user;
                return Err(e);
            }
        };

        match &outcome {
            OperationOutcome::Rejected => {
                warn!("Edit by {} on note {} denied", conn_id, note_id);
                if let Some(user) = registry.user(conn_id) {
                    user.conn.send(ServerMessage::Error(ErrorMessage {
                        code: 403,
                        message: format!("no edit access to note {}", note_id),
                    }));
                }
            }
            OperationOutcome::Applied { revision, .. } => {
                let relayed = ServerMessage::Update(RelayedUpdateMessage {
                    sender: conn_id.to_string(),
                    revision: *revision,
                    delta: delta.to_vec(),
                });
                registry.broadcast(&note_id, &relayed, Some(conn_id));
                if let Some(user) = registry.user(conn_id) {
                    user.conn.send(ServerMessage::Ack(AckMessage { revision: *revision }));
                }
            }
        }
        Ok(outcome)
    }

    /// Note id of a connection, and whether it may currently edit
    fn membership(registry: &Registry, conn_id: &str) -> Result<(String, bool), CollabError> {
        let user = registry.user(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        let note = registry.note(&user.note_id).ok_or_else(|| unknown_note(&user.note_id))?;
        let may_edit = guard::may_edit(note.permission, note.owner.as_deref(), &user.conn.identity);
        Ok((note.id.clone(), may_edit))
    }

    pub async fn update_cursor(&self, conn_id: &str, cursor: Option<Cursor>) -> Result<(), CollabError> {
        let mut registry = self.registry().await;
        let (note_id, may_edit) = Self::membership(&registry, conn_id)?;
        if !may_edit {
            return Err(CollabError::Forbidden(format!("no edit access to note {}", note_id)));
        }

        let user = registry.users.get_mut(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        user.cursor = cursor;
        let online = user.online_user();
        registry.broadcast(&note_id, &ServerMessage::Cursor(UserMessage { user: online }), Some(conn_id));
        Ok(())
    }

    pub async fn update_status(
        &self,
        conn_id: &str,
        idle: bool,
        client_type: Option<String>,
    ) -> Result<(), CollabError> {
        let mut registry = self.registry().await;
        let user = registry.users.get_mut(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        user.idle = idle;
        if client_type.is_some() {
            user.client_type = client_type;
        }
        let note_id = user.note_id.clone();
        let online = user.online_user();
        registry.broadcast(&note_id, &ServerMessage::UserStatus(UserMessage { user: online }), Some(conn_id));
        Ok(())
    }

    pub async fn send_refresh(&self, conn_id: &str) -> Result<(), CollabError> {
        let registry = self.registry().await;
        let user = registry.user(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        let note = registry.note(&user.note_id).ok_or_else(|| unknown_note(&user.note_id))?;
        user.conn.send(ServerMessage::Refresh(Box::new(note.refresh_message()?)));
        Ok(())
    }

    pub async fn send_check(&self, conn_id: &str) -> Result<(), CollabError> {
        let registry = self.registry().await;
        let user = registry.user(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        let note = registry.note(&user.note_id).ok_or_else(|| unknown_note(&user.note_id))?;
        user.conn.send(ServerMessage::Check(note.check_message()));
        Ok(())
    }

    pub async fn send_online_users(&self, conn_id: &str) -> Result<(), CollabError> {
        let registry = self.registry().await;
        let user = registry.user(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        let users = registry.online_users(&user.note_id);
        user.conn.send(ServerMessage::OnlineUsers(OnlineUsersMessage { users }));
        Ok(())
    }

    pub async fn send_pong(&self, conn_id: &str) -> Result<(), CollabError> {
        let registry = self.registry().await;
        let user = registry.user(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        user.conn.send(ServerMessage::Pong(PongMessage { date: Utc::now().to_rfc3339() }));
        Ok(())
    }

    /// Note id of a connection whose identity owns the note
    async fn owned_note(&self, conn_id: &str, action: &str) -> Result<String, CollabError> {
        let registry = self.registry().await;
        let user = registry.user(conn_id).ok_or_else(|| unknown_connection(conn_id))?;
        let note = registry.note(&user.note_id).ok_or_else(|| unknown_note(&user.note_id))?;
        if !user.conn.identity.is(note.owner.as_deref()) {
            return Err(CollabError::Forbidden(format!("only the owner may {} note {}", action, note.id)));
        }
        Ok(note.id.clone())
    }

    /// Owner-only permission change. Sockets that lose view access are
    /// disconnected.
    pub async fn change_permission(&self, conn_id: &str, permission: PermissionLevel) -> Result<(), CollabError> {
        let note_id = self.owned_note(conn_id, "change permission of").await?;
        self.store.update_permission(&note_id, permission).await?;

        let mut registry = self.registry().await;
        let Some(session) = registry.note_mut(&note_id) else {
            return Ok(());
        };
        session.permission = permission;
        let owner = session.owner.clone();
        info!("Permission of note {} changed to {}", note_id, permission);

        registry.broadcast(&note_id, &ServerMessage::Permission(PermissionMessage { permission }), None);

        let evicted: Vec<String> = registry
            .online_users(&note_id)
            .into_iter()
            .filter_map(|u| registry.user(&u.id))
            .filter(|u| !guard::may_view(permission, owner.as_deref(), &u.conn.identity))
            .map(|u| u.conn.id.clone())
            .collect();
        let denied = CollabError::Forbidden(format!("no view access to note {}", note_id));
        for socket in evicted {
            if let Some(user) = registry.user(&socket) {
                user.conn.reject(&denied);
            }
            self.drains.enqueue(DrainJob { conn_id: socket });
        }
        Ok(())
    }

    /// Owner-only delete. The session is dropped without a final flush.
    pub async fn delete_note(&self, conn_id: &str) -> Result<(), CollabError> {
        let note_id = self.owned_note(conn_id, "delete").await?;
        self.store.delete_note(&note_id).await?;

        let mut registry = self.registry().await;
        let Some(session) = registry.remove_note(&note_id) else {
            return Ok(());
        };
        info!("Note {} deleted, closing {} connections", note_id, session.sockets.len());
        for socket in &session.sockets {
            if let Some(user) = registry.user(socket) {
                user.conn.send(ServerMessage::Delete);
                user.conn.close(1000, "note deleted");
            }
            self.drains.enqueue(DrainJob { conn_id: socket.clone() });
        }
        Ok(())
    }

    /// Persist every dirty session once. A note whose previous write is
    /// still in flight is left for the next pass.
    pub async fn flush_dirty(&self) -> FlushReport {
        let (candidates, visits) = {
            let mut registry = self.registry().await;
            let mut candidates = Vec::new();
            let mut visits = Vec::new();
            for session in registry.notes.values_mut() {
                visits.extend(drain_visits(session));
                if session.is_dirty() {
                    candidates.push((session.id.clone(), session.write_lock.clone()));
                }
            }
            (candidates, visits)
        };
        self.record_visits(visits).await;

        let mut report = FlushReport::default();
        for (note_id, write_lock) in candidates {
            let Ok(_writing) = write_lock.try_lock_owned() else {
                debug!("Write of note {} already in flight, skipping", note_id);
                continue;
            };
            let pending = {
                let registry = self.registry().await;
                registry
                    .note(&note_id)
                    .filter(|session| session.is_dirty())
                    .map(|session| session.pending_update(Utc::now()))
            };
            let Some((update, revision)) = pending else {
                continue;
            };

            match self.store.update_note(&update).await {
                Ok(()) => {
                    let mut registry = self.registry().await;
                    if let Some(session) = registry.note_mut(&note_id) {
                        session.persisted(&update, revision);
                        let check = ServerMessage::Check(session.check_message());
                        registry.broadcast(&note_id, &check, None);
                    }
                    self.revisions.mark(&note_id);
                    report.flushed += 1;
                }
                Err(e) => {
                    error!("Failed to persist note {}, dropping its session: {}", note_id, e);
                    self.abandon(&note_id, &CollabError::from(e)).await;
                    report.abandoned += 1;
                }
            }
        }

        if report.flushed + report.abandoned > 0 {
            debug!("Flushed {} notes, abandoned {}", report.flushed, report.abandoned);
        }
        report
    }

    /// Disconnect every socket of a note with an error and forget the session.
    pub async fn abandon(&self, note_id: &str, reason: &CollabError) {
        let mut registry = self.registry().await;
        let Some(session) = registry.remove_note(note_id) else {
            return;
        };
        warn!("Abandoned note session {} with {} connections", note_id, session.sockets.len());
        for socket in &session.sockets {
            if let Some(user) = registry.user(socket) {
                user.conn.reject(reason);
            }
            self.drains.enqueue(DrainJob { conn_id: socket.clone() });
        }
    }

    async fn record_visits(&self, visits: Vec<(String, String, DateTime<Utc>)>) {
        for (user_id, note_id, at) in visits {
            if let Err(e) = self.store.touch_user_history(&user_id, &note_id, at).await {
                warn!("Failed to record history of {} on note {}: {}", user_id, note_id, e);
            }
        }
    }

    /// Store a revision of every note flushed since the last call. Returns
    /// how many notes needed one.
    pub async fn snapshot_revisions(&self) -> usize {
        let note_ids = self.revisions.take();
        for note_id in &note_ids {
            match self.store.create_revision(note_id).await {
                Ok(()) => debug!("Saved revision of note {}", note_id),
                Err(e) => error!("Failed to save revision of note {}: {}", note_id, e),
            }
        }
        note_ids.len()
    }

    /// Resolves once a note has been flushed since the last snapshot pass.
    pub async fn wait_for_activity(&self) {
        self.revisions.activity.notified().await;
    }

    /// Drain user sessions whose socket is gone or whose note no longer
    /// lists them.
    pub async fn reap(&self) -> usize {
        let stale: Vec<String> = {
            let registry = self.registry().await;
            registry
                .users
                .iter()
                .filter(|(id, user)| {
                    user.conn.is_closed()
                        || !registry
                            .note(&user.note_id)
                            .is_some_and(|note| note.sockets.contains(*id))
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for conn_id in &stale {
            warn!("Reaping stale connection {}", conn_id);
            self.drains.enqueue(DrainJob { conn_id: conn_id.clone() });
        }
        stale.len()
    }

    pub async fn stats(&self) -> CollabStats {
        let registry = self.registry().await;
        CollabStats {
            connections: registry.user_count(),
            notes: registry.note_count(),
            dirty_notes: registry.dirty_count(),
            pending_admissions: self.admissions.len(),
            pending_drains: self.drains.len(),
            revision_passes: self.revisions.passes.load(Ordering::Relaxed),
        }
    }

    /// True while both queue workers are alive
    pub fn is_accepting(&self) -> bool {
        self.admissions.is_running() && self.drains.is_running()
    }

    pub async fn is_connected(&self, conn_id: &str) -> bool {
        self.registry().await.user(conn_id).is_some()
    }

    /// Snapshot of an active note session, looked up by id or alias
    pub async fn inspect(&self, note_key: &str) -> Option<NoteView> {
        let registry = self.registry().await;
        let note_id = registry.resolve(note_key)?;
        let session = registry.note(&note_id)?;
        let mut authors: Vec<String> = session.authors.keys().cloned().collect();
        authors.sort();
        Some(NoteView {
            id: session.id.clone(),
            sockets: session.sockets.clone(),
            text: session.engine.text(),
            revision: session.engine.revision(),
            dirty: session.is_dirty(),
            permission: session.permission,
            last_change_user: session.last_change_user.clone(),
            authorship: session.authorship.ranges().to_vec(),
            authors,
        })
    }
}

/// Take the pending history entries of a session
fn drain_visits(session: &mut NoteSession) -> Vec<(String, String, DateTime<Utc>)> {
    let note_id = session.id.clone();
    session
        .temp_users
        .drain()
        .map(|(user_id, at)| (user_id, note_id.clone(), at))
        .collect()
}
