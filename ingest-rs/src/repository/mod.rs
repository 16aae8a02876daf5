//! Identity, authorization and list repositories
//!
//! These are the external collaborators the ingress reads from and writes
//! to. Implementations must be safe for unbounded concurrent use.
//!
//! - [`memory`]: in-process implementation
//! - [`sqlite`]: SQLite implementation on `sqlx`

pub mod memory;
pub mod sqlite;
pub mod types;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
pub use types::{List, Member, MessageRecord, Org, SenderPolicy, User};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// User and organization lookups plus authorization checks.
///
/// Lookups return [`crate::IngestError::NotFound`] when nothing matches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    async fn org_by_name(&self, name: &str) -> Result<Org>;

    async fn user_by_name(&self, name: &str) -> Result<User>;

    async fn user_by_email(&self, email: &str) -> Result<User>;

    /// Whether `user_id` is an authenticated member of `org_id`
    async fn auth_member(&self, org_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Whether `user_id` is an authenticated (active) account
    async fn auth_user(&self, user_id: Uuid) -> Result<bool>;
}

/// Lists, their members, and per-list message records.
#[async_trait]
pub trait ListRepository: Send + Sync {
    async fn get_list(&self, owner_id: Uuid, name: &str) -> Result<List>;

    async fn get_member(&self, list_id: Uuid, user_id: Uuid) -> Result<Member>;

    async fn get_msg(&self, list_id: Uuid, message_id: &str) -> Result<MessageRecord>;

    /// Fails with [`crate::IngestError::UniqueViolation`] if a record for
    /// the same (list id, message id) already exists.
    async fn insert_msg(&self, msg: &MessageRecord) -> Result<()>;

    async fn mark_msg_processed(&self, list_id: Uuid, message_id: &str) -> Result<()>;

    /// Records still unprocessed that were created before `older_than`
    async fn unprocessed_msgs(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;
}
