use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::identity::Identity;
use crate::models::{CollabError, ErrorMessage, ServerMessage};

/// What the socket task should do next
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    Close { code: u16, reason: String },
}

/// Coordinator-side handle of one live connection. The socket task owns the
/// receiving end of `outbox` and forwards everything to the client.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: String,
    pub note_key: String,
    pub remote_addr: Option<String>,
    pub identity: Identity,
    pub client_type: Option<String>,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(
        note_key: impl Into<String>,
        identity: Identity,
        remote_addr: Option<String>,
        client_type: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4().to_string(),
            note_key: note_key.into(),
            remote_addr,
            identity,
            client_type,
            outbox,
        };
        (handle, rx)
    }

    pub fn send(&self, msg: ServerMessage) {
        if self.outbox.send(Outbound::Message(msg)).is_err() {
            debug!("Dropping message for closed connection {}", self.id);
        }
    }

    /// Signal an error and ask the socket task to close.
    pub fn reject(&self, error: &CollabError) {
        self.send(ServerMessage::Error(ErrorMessage {
            code: error.code(),
            message: error.to_string(),
        }));
        let _ = self.outbox.send(Outbound::Close {
            code: error.code(),
            reason: error.to_string(),
        });
    }

    /// Ask the socket task to close without an error message.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbox.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }

    /// True once the socket task is gone
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}
