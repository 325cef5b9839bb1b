use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Visibility level of a note. Drives both view and edit eligibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Freely,
    Editable,
    Limited,
    Locked,
    Private,
    Protected,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Freely => write!(f, "freely"),
            PermissionLevel::Editable => write!(f, "editable"),
            PermissionLevel::Limited => write!(f, "limited"),
            PermissionLevel::Locked => write!(f, "locked"),
            PermissionLevel::Private => write!(f, "private"),
            PermissionLevel::Protected => write!(f, "protected"),
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "freely" => Ok(PermissionLevel::Freely),
            "editable" => Ok(PermissionLevel::Editable),
            "limited" => Ok(PermissionLevel::Limited),
            "locked" => Ok(PermissionLevel::Locked),
            "private" => Ok(PermissionLevel::Private),
            "protected" => Ok(PermissionLevel::Protected),
            other => Err(format!("Unknown permission level '{}'", other)),
        }
    }
}
