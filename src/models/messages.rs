use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, base64::Base64};

use crate::models::{AuthorProfile, AuthorshipRange, PermissionLevel};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub line: u32,
    pub ch: u32,
}

/// Presence entry of one live connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub id: String,
    pub login: bool,
    pub user_id: Option<String>,
    pub name: String,
    pub color: String,
    pub cursor: Option<Cursor>,
    pub idle: bool,
    pub client_type: Option<String>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    #[serde_as(as = "Base64")]
    pub delta: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    pub cursor: Option<Cursor>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub idle: bool,
    #[serde(default)]
    pub client_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PermissionMessage {
    pub permission: PermissionLevel,
}

/// Messages received from clients
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "cursor")]
    Cursor(CursorMessage),
    #[serde(rename = "status")]
    Status(StatusMessage),
    #[serde(rename = "refresh")]
    Refresh,
    #[serde(rename = "check")]
    Check,
    #[serde(rename = "onlineUsers")]
    OnlineUsers,
    #[serde(rename = "permission")]
    Permission(PermissionMessage),
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "ping")]
    Ping,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMessage {
    pub id: String,
    pub alias: Option<String>,
    pub title: String,
    pub owner: Option<String>,
    pub permission: PermissionLevel,
    pub last_change_user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
    pub text: String,
    #[serde_as(as = "Base64")]
    pub snapshot: Vec<u8>,
    pub authorship: Vec<AuthorshipRange>,
    pub authors: Vec<AuthorProfile>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RelayedUpdateMessage {
    pub sender: String,
    pub revision: u64,
    #[serde_as(as = "Base64")]
    pub delta: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    pub revision: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CheckMessage {
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
    pub last_change_user: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersMessage {
    pub users: Vec<OnlineUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub user: OnlineUser,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

/// Messages pushed to clients
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "refresh")]
    Refresh(Box<RefreshMessage>),
    #[serde(rename = "update")]
    Update(RelayedUpdateMessage),
    #[serde(rename = "ack")]
    Ack(AckMessage),
    #[serde(rename = "check")]
    Check(CheckMessage),
    #[serde(rename = "onlineUsers")]
    OnlineUsers(OnlineUsersMessage),
    #[serde(rename = "cursor")]
    Cursor(UserMessage),
    #[serde(rename = "userStatus")]
    UserStatus(UserMessage),
    #[serde(rename = "permission")]
    Permission(PermissionMessage),
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "pong")]
    Pong(PongMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"update","delta":"AQID"}"#).unwrap();
        match msg {
            ClientMessage::Update(update) => assert_eq!(update.delta, vec![1, 2, 3]),
            other => panic!("unexpected {:?}", other),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"permission","permission":"locked"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Permission(PermissionMessage { permission: PermissionLevel::Locked })));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"status","idle":true}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Status(StatusMessage { idle: true, client_type: None })));

        assert!(matches!(serde_json::from_str::<ClientMessage>(r#"{"type":"refresh"}"#).unwrap(), ClientMessage::Refresh));
    }

    #[test]
    fn rejects_malformed_client_messages() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"update","delta":"not base64!"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"explode"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("nope").is_err());
    }

    #[test]
    fn server_messages_are_type_tagged() {
        let json = serde_json::to_value(ServerMessage::Error(ErrorMessage { code: 403, message: "no".into() })).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 403);

        let json = serde_json::to_value(ServerMessage::Delete).unwrap();
        assert_eq!(json["type"], "delete");
    }
}
