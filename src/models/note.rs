use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AuthorshipRange, PermissionLevel};

/// Display metadata of an identity that contributed to a note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorProfile {
    pub user_id: String,
    pub name: Option<String>,
    pub color: String,
}

/// Note as loaded from the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: String,
    pub alias: Option<String>,
    pub title: String,
    pub content: String,
    pub owner: Option<String>,
    pub permission: PermissionLevel,
    pub last_change_user: Option<String>,
    pub authorship: Vec<AuthorshipRange>,
    pub authors: Vec<AuthorProfile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything a dirty flush writes back in a single store call
#[derive(Debug, Clone)]
pub struct NoteUpdate {
    pub note_id: String,
    pub title: String,
    pub content: String,
    pub authorship: Vec<AuthorshipRange>,
    pub last_change_user: Option<String>,
    pub new_authors: Vec<AuthorProfile>,
    pub updated_at: DateTime<Utc>,
}

/// Title of a markdown note: the first heading, else the first non-empty
/// line, else "Untitled".
pub fn derive_title(content: &str) -> String {
    let heading = content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim());

    let title = match heading {
        Some(h) if !h.is_empty() => h,
        _ => content.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or(""),
    };

    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title.chars().take(120).collect()
    }
}
