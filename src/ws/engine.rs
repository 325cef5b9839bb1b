//! Document sync engine seam.
//!
//! The coordinator never merges text itself. It hands raw client operations
//! to a [`SyncEngine`], which asks the coordinator for permission before
//! applying and reports the resulting text edits afterwards.

use loro::{LoroDoc, LoroText};
use std::collections::HashMap;
use tracing::debug;

use crate::models::{CollabError, TextEdit};

/// Callbacks the engine invokes around every client operation.
pub trait EngineHooks {
    /// Asked before anything is applied. Returning false rejects the operation.
    fn may_edit(&mut self, client: &str, is_text_mutation: bool) -> bool;

    /// Called once the operation is merged, with the edits it caused.
    fn on_operation(&mut self, client: &str, edits: &[TextEdit]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Rejected,
    Applied { revision: u64, text_changed: bool },
}

pub trait SyncEngine: Send {
    fn register_client(&mut self, client: &str, name: &str, color: &str);

    fn remove_client(&mut self, client: &str);

    fn client_count(&self) -> usize;

    /// Current merged document text
    fn text(&self) -> String;

    /// Document length in characters
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Increases on every applied operation that changed the text
    fn revision(&self) -> u64;

    /// True while the text diverges from what was last persisted
    fn is_dirty(&self) -> bool;

    /// Record that the text as of `revision` reached the store
    fn mark_persisted(&mut self, revision: u64);

    /// Full state for a (re)joining client
    fn snapshot(&self) -> Result<Vec<u8>, CollabError>;

    fn receive_operation(
        &mut self,
        client: &str,
        operation: &[u8],
        hooks: &mut dyn EngineHooks,
    ) -> Result<OperationOutcome, CollabError>;
}

#[derive(Debug, Clone)]
struct ClientInfo {
    name: String,
    color: String,
}

/// Engine backed by a Loro document. Clients are Loro peers and send Loro
/// update blobs; the merged text lives in the `content` text container.
pub struct LoroSyncEngine {
    doc: LoroDoc,
    text: LoroText,
    revision: u64,
    persisted_revision: u64,
    clients: HashMap<String, ClientInfo>,
}

pub const TEXT_CONTAINER: &str = "content";

impl LoroSyncEngine {
    pub fn new(content: &str) -> Result<Self, CollabError> {
        let doc = LoroDoc::new();
        let text = doc.get_text(TEXT_CONTAINER);
        if !content.is_empty() {
            text.insert(0, content)
                .map_err(|e| CollabError::Store(format!("Failed to seed document: {}", e)))?;
        }
        doc.commit();

        Ok(Self {
            doc,
            text,
            revision: 0,
            persisted_revision: 0,
            clients: HashMap::new(),
        })
    }

    pub fn client_display(&self, client: &str) -> Option<(&str, &str)> {
        self.clients.get(client).map(|c| (c.name.as_str(), c.color.as_str()))
    }
}

impl SyncEngine for LoroSyncEngine {
    fn register_client(&mut self, client: &str, name: &str, color: &str) {
        self.clients.insert(
            client.to_string(),
            ClientInfo {
                name: name.to_string(),
                color: color.to_string(),
            },
        );
    }

    fn remove_client(&mut self, client: &str) {
        self.clients.remove(client);
    }

    fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn text(&self) -> String {
        self.text.to_string()
    }

    fn len(&self) -> usize {
        self.text.len_unicode()
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn is_dirty(&self) -> bool {
        self.revision > self.persisted_revision
    }

    fn mark_persisted(&mut self, revision: u64) {
        self.persisted_revision = self.persisted_revision.max(revision.min(self.revision));
    }

    fn snapshot(&self) -> Result<Vec<u8>, CollabError> {
        self.doc
            .export(loro::ExportMode::Snapshot)
            .map_err(|e| CollabError::Store(format!("Failed to export snapshot: {}", e)))
    }

    fn receive_operation(
        &mut self,
        client: &str,
        operation: &[u8],
        hooks: &mut dyn EngineHooks,
    ) -> Result<OperationOutcome, CollabError> {
        if !self.clients.contains_key(client) {
            return Err(CollabError::Protocol(format!("Client '{}' is not registered", client)));
        }
        if operation.is_empty() {
            return Err(CollabError::Protocol("Empty operation".to_string()));
        }
        if !hooks.may_edit(client, true) {
            debug!("Operation from {} rejected", client);
            return Ok(OperationOutcome::Rejected);
        }

        let before = self.text();
        self.doc
            .import(operation)
            .map_err(|e| CollabError::Protocol(format!("Malformed operation: {}", e)))?;
        let after = self.text();

        match TextEdit::between(&before, &after) {
            Some(edit) => {
                self.revision += 1;
                hooks.on_operation(client, &[edit]);
                Ok(OperationOutcome::Applied { revision: self.revision, text_changed: true })
            }
            None => Ok(OperationOutcome::Applied { revision: self.revision, text_changed: false }),
        }
    }
}
