use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// An organization owning lists in the organizational namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    pub id: Uuid,
    pub name: String,
}

/// A mailing list as stored by the list repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub archived: bool,
    /// Raw stored value; see [`SenderPolicy`]
    pub sender_policy: String,
}

/// A recorded member of a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub list_id: Uuid,
    pub user_id: Uuid,
}

/// Metadata for one accepted message, keyed by (list id, message id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub list_id: Uuid,
    pub message_id: String,
    pub sender_id: Uuid,
    pub subject: String,
    pub spf_domain: Option<String>,
    pub dkim_domain: Option<String>,
    pub in_reply_to: Option<String>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Who may post to a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderPolicy {
    /// Only the owner (or, for organizations, its members)
    Owner,
    /// Only recorded list members
    Member,
    /// Any registered user
    User,
}

impl FromStr for SenderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(SenderPolicy::Owner),
            "member" => Ok(SenderPolicy::Member),
            "user" => Ok(SenderPolicy::User),
            other => Err(format!("invalid sender policy: {:?}", other)),
        }
    }
}

impl fmt::Display for SenderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderPolicy::Owner => write!(f, "owner"),
            SenderPolicy::Member => write!(f, "member"),
            SenderPolicy::User => write!(f, "user"),
        }
    }
}
