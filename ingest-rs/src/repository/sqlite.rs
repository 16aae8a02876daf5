//! SQLite-backed repositories
//!
//! One pool serves both the directory (users, orgs, memberships) and the
//! list tables. Identifiers are stored as hyphenated UUID text and
//! timestamps as unix milliseconds.

use super::types::{List, Member, MessageRecord, Org, User};
use super::{Directory, ListRepository};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

type MessageRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
    i64,
);

#[derive(Clone)]
pub struct SqliteRepository {
    db: SqlitePool,
}

impl SqliteRepository {
    /// Connect to `database_url` and create the schema if missing
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        Self::from_pool(db).await
    }

    pub async fn from_pool(db: SqlitePool) -> Result<Self> {
        let repo = Self { db };
        repo.init_schema().await?;
        info!("List repository ready");
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL COLLATE NOCASE,
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orgs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS org_members (
                org_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (org_id, user_id)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lists (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL COLLATE NOCASE,
                archived INTEGER NOT NULL DEFAULT 0,
                sender_policy TEXT NOT NULL,
                UNIQUE (owner_id, name)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS list_members (
                list_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (list_id, user_id)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS list_messages (
                list_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                spf_domain TEXT,
                dkim_domain TEXT,
                in_reply_to TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (list_id, message_id)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_list_messages_pending ON list_messages(processed, created_at)",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn add_user(&self, name: &str, email: &str, active: bool) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_lowercase(),
        };

        sqlx::query("INSERT INTO users (id, name, email, active) VALUES (?, ?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.name)
            .bind(&user.email)
            .bind(active)
            .execute(&self.db)
            .await
            .map_err(map_insert_error)?;

        Ok(user)
    }

    pub async fn add_org(&self, name: &str) -> Result<Org> {
        let org = Org {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };

        sqlx::query("INSERT INTO orgs (id, name) VALUES (?, ?)")
            .bind(org.id.to_string())
            .bind(&org.name)
            .execute(&self.db)
            .await
            .map_err(map_insert_error)?;

        Ok(org)
    }

    pub async fn add_org_member(&self, org_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO org_members (org_id, user_id) VALUES (?, ?)")
            .bind(org_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn add_list(&self, owner_id: Uuid, name: &str, sender_policy: &str) -> Result<List> {
        let list = List {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            archived: false,
            sender_policy: sender_policy.to_string(),
        };

        sqlx::query(
            "INSERT INTO lists (id, owner_id, name, archived, sender_policy) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(list.id.to_string())
        .bind(owner_id.to_string())
        .bind(&list.name)
        .bind(&list.sender_policy)
        .execute(&self.db)
        .await
        .map_err(map_insert_error)?;

        Ok(list)
    }

    pub async fn archive_list(&self, list_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE lists SET archived = 1 WHERE id = ?")
            .bind(list_id.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn add_list_member(&self, list_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO list_members (list_id, user_id) VALUES (?, ?)")
            .bind(list_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error) -> IngestError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            IngestError::UniqueViolation(db_err.message().to_string())
        }
        _ => IngestError::Database(err),
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| IngestError::Parse(format!("bad id {:?}: {}", value, e)))
}

fn parse_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| IngestError::Parse(format!("bad timestamp {}", ms)))
}

fn message_from_row(row: MessageRow) -> Result<MessageRecord> {
    let (list_id, message_id, sender_id, subject, spf_domain, dkim_domain, in_reply_to, processed, created_at) =
        row;

    Ok(MessageRecord {
        list_id: parse_uuid(&list_id)?,
        message_id,
        sender_id: parse_uuid(&sender_id)?,
        subject,
        spf_domain,
        dkim_domain,
        in_reply_to,
        processed,
        created_at: parse_millis(created_at)?,
    })
}

#[async_trait]
impl Directory for SqliteRepository {
    async fn org_by_name(&self, name: &str) -> Result<Org> {
        let row = sqlx::query_as::<_, (String, String)>("SELECT id, name FROM orgs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some((id, name)) => Ok(Org {
                id: parse_uuid(&id)?,
                name,
            }),
            None => Err(IngestError::NotFound(format!("org {}", name))),
        }
    }

    async fn user_by_name(&self, name: &str) -> Result<User> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, name, email FROM users WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some((id, name, email)) => Ok(User {
                id: parse_uuid(&id)?,
                name,
                email,
            }),
            None => Err(IngestError::NotFound(format!("user {}", name))),
        }
    }

    async fn user_by_email(&self, email: &str) -> Result<User> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, name, email FROM users WHERE email = ? LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some((id, name, email)) => Ok(User {
                id: parse_uuid(&id)?,
                name,
                email,
            }),
            None => Err(IngestError::NotFound(format!("user with email {}", email))),
        }
    }

    async fn auth_member(&self, org_id: Uuid, user_id: Uuid) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM org_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.org_id = ? AND m.user_id = ? AND u.active = 1
            "#,
        )
        .bind(org_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }

    async fn auth_user(&self, user_id: Uuid) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>("SELECT active FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(|(active,)| active).unwrap_or(false))
    }
}

#[async_trait]
impl ListRepository for SqliteRepository {
    async fn get_list(&self, owner_id: Uuid, name: &str) -> Result<List> {
        let row = sqlx::query_as::<_, (String, String, bool, String)>(
            "SELECT id, name, archived, sender_policy FROM lists WHERE owner_id = ? AND name = ?",
        )
        .bind(owner_id.to_string())
        .bind(name)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some((id, name, archived, sender_policy)) => Ok(List {
                id: parse_uuid(&id)?,
                owner_id,
                name,
                archived,
                sender_policy,
            }),
            None => Err(IngestError::NotFound(format!("list {}", name))),
        }
    }

    async fn get_member(&self, list_id: Uuid, user_id: Uuid) -> Result<Member> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT user_id FROM list_members WHERE list_id = ? AND user_id = ?",
        )
        .bind(list_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(_) => Ok(Member { list_id, user_id }),
            None => Err(IngestError::NotFound(format!(
                "member {} of list {}",
                user_id, list_id
            ))),
        }
    }

    async fn get_msg(&self, list_id: Uuid, message_id: &str) -> Result<MessageRecord> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT list_id, message_id, sender_id, subject, spf_domain, dkim_domain,
                   in_reply_to, processed, created_at
            FROM list_messages WHERE list_id = ? AND message_id = ?
            "#,
        )
        .bind(list_id.to_string())
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => message_from_row(row),
            None => Err(IngestError::NotFound(format!("message {}", message_id))),
        }
    }

    async fn insert_msg(&self, msg: &MessageRecord) -> Result<()> {
        debug!("Inserting message {} for list {}", msg.message_id, msg.list_id);

        sqlx::query(
            r#"
            INSERT INTO list_messages
                (list_id, message_id, sender_id, subject, spf_domain, dkim_domain,
                 in_reply_to, processed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(msg.list_id.to_string())
        .bind(&msg.message_id)
        .bind(msg.sender_id.to_string())
        .bind(&msg.subject)
        .bind(&msg.spf_domain)
        .bind(&msg.dkim_domain)
        .bind(&msg.in_reply_to)
        .bind(msg.processed)
        .bind(msg.created_at.timestamp_millis())
        .execute(&self.db)
        .await
        .map_err(map_insert_error)?;

        Ok(())
    }

    async fn mark_msg_processed(&self, list_id: Uuid, message_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE list_messages SET processed = 1 WHERE list_id = ? AND message_id = ?",
        )
        .bind(list_id.to_string())
        .bind(message_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IngestError::NotFound(format!("message {}", message_id)));
        }
        Ok(())
    }

    async fn unprocessed_msgs(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT list_id, message_id, sender_id, subject, spf_domain, dkim_domain,
                   in_reply_to, processed, created_at
            FROM list_messages
            WHERE processed = 0 AND created_at < ?
            ORDER BY created_at
            LIMIT ?
            "#,
        )
        .bind(older_than.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteRepository::from_pool(pool).await.unwrap()
    }

    fn record(list_id: Uuid, message_id: &str, sender_id: Uuid) -> MessageRecord {
        MessageRecord {
            list_id,
            message_id: message_id.to_string(),
            sender_id,
            subject: "Quarterly numbers".to_string(),
            spf_domain: Some("example.com".to_string()),
            dkim_domain: None,
            in_reply_to: Some("<parent@example.com>".to_string()),
            processed: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let repo = repo().await;
        let alice = repo.add_user("alice", "Alice@Example.com", true).await.unwrap();
        let acme = repo.add_org("acme").await.unwrap();
        repo.add_org_member(acme.id, alice.id).await.unwrap();

        assert_eq!(repo.user_by_name("Alice").await.unwrap(), alice);
        assert_eq!(repo.user_by_email("alice@example.com").await.unwrap().id, alice.id);
        assert_eq!(repo.org_by_name("acme").await.unwrap(), acme);
        assert!(repo.org_by_name("globex").await.unwrap_err().is_not_found());
        assert!(repo.auth_user(alice.id).await.unwrap());
        assert!(repo.auth_member(acme.id, alice.id).await.unwrap());
        assert!(!repo.auth_member(acme.id, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_inactive_user_is_not_authenticated() {
        let repo = repo().await;
        let acme = repo.add_org("acme").await.unwrap();
        let eve = repo.add_user("eve", "eve@example.com", false).await.unwrap();
        repo.add_org_member(acme.id, eve.id).await.unwrap();

        assert!(!repo.auth_user(eve.id).await.unwrap());
        assert!(!repo.auth_member(acme.id, eve.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_lists_and_members() {
        let repo = repo().await;
        let bob = repo.add_user("bob", "bob@example.org", true).await.unwrap();
        let list = repo.add_list(bob.id, "announce", "member").await.unwrap();

        let fetched = repo.get_list(bob.id, "announce").await.unwrap();
        assert_eq!(fetched, list);
        assert!(repo.get_member(list.id, bob.id).await.unwrap_err().is_not_found());

        repo.add_list_member(list.id, bob.id).await.unwrap();
        assert_eq!(repo.get_member(list.id, bob.id).await.unwrap().user_id, bob.id);

        repo.archive_list(list.id).await.unwrap();
        assert!(repo.get_list(bob.id, "announce").await.unwrap().archived);
    }

    #[tokio::test]
    async fn test_message_records() {
        let repo = repo().await;
        let list_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let msg = record(list_id, "abc@example.com", sender);

        repo.insert_msg(&msg).await.unwrap();
        let err = repo.insert_msg(&msg).await.unwrap_err();
        assert!(matches!(err, IngestError::UniqueViolation(_)));

        let stored = repo.get_msg(list_id, "abc@example.com").await.unwrap();
        assert_eq!(stored.subject, msg.subject);
        assert_eq!(stored.in_reply_to, msg.in_reply_to);
        assert!(!stored.processed);

        let pending = repo
            .unprocessed_msgs(Utc::now() + chrono::Duration::seconds(5), 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        repo.mark_msg_processed(list_id, "abc@example.com").await.unwrap();
        assert!(repo.get_msg(list_id, "abc@example.com").await.unwrap().processed);
        assert!(repo
            .unprocessed_msgs(Utc::now() + chrono::Duration::seconds(5), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mark_missing_message() {
        let repo = repo().await;
        let err = repo
            .mark_msg_processed(Uuid::new_v4(), "missing@example.com")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
