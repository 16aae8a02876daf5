use super::{ListTarget, Namespace};
use crate::error::{IngestError, Rejection};
use crate::repository::{Directory, ListRepository, SenderPolicy};
use crate::utils::bounded;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Evaluates a list's sender policy against an identified sender
pub struct PolicyEngine {
    directory: Arc<dyn Directory>,
    lists: Arc<dyn ListRepository>,
    lookup_timeout: Duration,
}

impl PolicyEngine {
    pub fn new(
        directory: Arc<dyn Directory>,
        lists: Arc<dyn ListRepository>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            lists,
            lookup_timeout,
        }
    }

    /// Decide whether `sender_id` may post to `target`.
    ///
    /// - `owner`: org lists need an authenticated org member; personal lists
    ///   need the owner themself, authenticated
    /// - `member`: an authenticated user recorded as a list member
    /// - `user`: any authenticated user
    pub async fn authorize(&self, target: &ListTarget, sender_id: Uuid) -> Result<(), Rejection> {
        let policy: SenderPolicy = target.sender_policy.parse().map_err(|e: String| {
            error!(list_id = %target.list_id, "Misconfigured list: {}", e);
            Rejection::MailboxMisconfigured(e)
        })?;

        let allowed = match policy {
            SenderPolicy::Owner => match target.namespace {
                Namespace::Organization => self.auth_member(target.owner_id, sender_id).await?,
                Namespace::Personal => {
                    sender_id == target.owner_id && self.auth_user(sender_id).await?
                }
            },
            SenderPolicy::Member => {
                self.auth_user(sender_id).await? && self.is_member(target.list_id, sender_id).await?
            }
            SenderPolicy::User => self.auth_user(sender_id).await?,
        };

        if !allowed {
            info!(
                list_id = %target.list_id,
                "Sender {} refused by {} policy",
                sender_id,
                policy
            );
            return Err(Rejection::Unauthorized(format!(
                "not permitted to post to {}",
                target.recipient
            )));
        }

        debug!(list_id = %target.list_id, "Sender {} allowed by {} policy", sender_id, policy);
        Ok(())
    }

    async fn auth_user(&self, user_id: Uuid) -> Result<bool, Rejection> {
        Ok(bounded(
            self.lookup_timeout,
            "user authorization",
            self.directory.auth_user(user_id),
        )
        .await?)
    }

    async fn auth_member(&self, org_id: Uuid, user_id: Uuid) -> Result<bool, Rejection> {
        Ok(bounded(
            self.lookup_timeout,
            "org membership",
            self.directory.auth_member(org_id, user_id),
        )
        .await?)
    }

    async fn is_member(&self, list_id: Uuid, user_id: Uuid) -> Result<bool, Rejection> {
        match bounded(
            self.lookup_timeout,
            "list membership",
            self.lists.get_member(list_id, user_id),
        )
        .await
        {
            Ok(_) => Ok(true),
            Err(IngestError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
