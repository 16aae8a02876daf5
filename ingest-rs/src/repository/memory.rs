use super::types::{List, Member, MessageRecord, Org, User};
use super::{Directory, ListRepository};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory [`Directory`] and [`ListRepository`]
#[derive(Default, Clone)]
pub struct MemoryRepository {
    users: Arc<RwLock<HashMap<Uuid, (User, bool)>>>,
    orgs: Arc<RwLock<HashMap<Uuid, Org>>>,
    org_members: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
    lists: Arc<RwLock<HashMap<Uuid, List>>>,
    list_members: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
    messages: Arc<RwLock<HashMap<(Uuid, String), MessageRecord>>>,
    processed_marks: Arc<AtomicUsize>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active user
    pub async fn add_user(&self, name: &str, email: &str) -> User {
        self.add_user_with_status(name, email, true).await
    }

    pub async fn add_user_with_status(&self, name: &str, email: &str, active: bool) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_lowercase(),
        };
        self.users
            .write()
            .await
            .insert(user.id, (user.clone(), active));
        user
    }

    pub async fn add_org(&self, name: &str) -> Org {
        let org = Org {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.orgs.write().await.insert(org.id, org.clone());
        org
    }

    pub async fn add_org_member(&self, org_id: Uuid, user_id: Uuid) {
        self.org_members.write().await.insert((org_id, user_id));
    }

    pub async fn add_list(&self, owner_id: Uuid, name: &str, sender_policy: &str) -> List {
        let list = List {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            archived: false,
            sender_policy: sender_policy.to_string(),
        };
        self.lists.write().await.insert(list.id, list.clone());
        list
    }

    pub async fn archive_list(&self, list_id: Uuid) {
        if let Some(list) = self.lists.write().await.get_mut(&list_id) {
            list.archived = true;
        }
    }

    pub async fn add_list_member(&self, list_id: Uuid, user_id: Uuid) {
        self.list_members.write().await.insert((list_id, user_id));
    }

    /// Number of stored message records
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// How many times a record's processed flag went from false to true
    pub fn processed_transitions(&self) -> usize {
        self.processed_marks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for MemoryRepository {
    async fn org_by_name(&self, name: &str) -> Result<Org> {
        self.orgs
            .read()
            .await
            .values()
            .find(|org| org.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| IngestError::NotFound(format!("org {}", name)))
    }

    async fn user_by_name(&self, name: &str) -> Result<User> {
        self.users
            .read()
            .await
            .values()
            .find(|(user, _)| user.name.eq_ignore_ascii_case(name))
            .map(|(user, _)| user.clone())
            .ok_or_else(|| IngestError::NotFound(format!("user {}", name)))
    }

    async fn user_by_email(&self, email: &str) -> Result<User> {
        self.users
            .read()
            .await
            .values()
            .find(|(user, _)| user.email.eq_ignore_ascii_case(email))
            .map(|(user, _)| user.clone())
            .ok_or_else(|| IngestError::NotFound(format!("user with email {}", email)))
    }

    async fn auth_member(&self, org_id: Uuid, user_id: Uuid) -> Result<bool> {
        let active = self.auth_user(user_id).await?;
        Ok(active && self.org_members.read().await.contains(&(org_id, user_id)))
    }

    async fn auth_user(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .users
            .read()
            .await
            .get(&user_id)
            .map(|(_, active)| *active)
            .unwrap_or(false))
    }
}

#[async_trait]
impl ListRepository for MemoryRepository {
    async fn get_list(&self, owner_id: Uuid, name: &str) -> Result<List> {
        self.lists
            .read()
            .await
            .values()
            .find(|list| list.owner_id == owner_id && list.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| IngestError::NotFound(format!("list {}", name)))
    }

    async fn get_member(&self, list_id: Uuid, user_id: Uuid) -> Result<Member> {
        if self.list_members.read().await.contains(&(list_id, user_id)) {
            Ok(Member { list_id, user_id })
        } else {
            Err(IngestError::NotFound(format!(
                "member {} of list {}",
                user_id, list_id
            )))
        }
    }

    async fn get_msg(&self, list_id: Uuid, message_id: &str) -> Result<MessageRecord> {
        self.messages
            .read()
            .await
            .get(&(list_id, message_id.to_string()))
            .cloned()
            .ok_or_else(|| IngestError::NotFound(format!("message {}", message_id)))
    }

    async fn insert_msg(&self, msg: &MessageRecord) -> Result<()> {
        let mut messages = self.messages.write().await;
        let key = (msg.list_id, msg.message_id.clone());
        if messages.contains_key(&key) {
            return Err(IngestError::UniqueViolation(format!(
                "message {} in list {}",
                msg.message_id, msg.list_id
            )));
        }
        messages.insert(key, msg.clone());
        Ok(())
    }

    async fn mark_msg_processed(&self, list_id: Uuid, message_id: &str) -> Result<()> {
        let mut messages = self.messages.write().await;
        let record = messages
            .get_mut(&(list_id, message_id.to_string()))
            .ok_or_else(|| IngestError::NotFound(format!("message {}", message_id)))?;

        if !record.processed {
            record.processed = true;
            self.processed_marks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn unprocessed_msgs(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let mut pending: Vec<MessageRecord> = self
            .messages
            .read()
            .await
            .values()
            .filter(|msg| !msg.processed && msg.created_at < older_than)
            .cloned()
            .collect();
        pending.sort_by_key(|msg| msg.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}
