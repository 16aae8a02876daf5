use super::{IdentityResolver, ListTarget};
use crate::error::{IngestError, Rejection};
use crate::repository::ListRepository;
use crate::utils::{bounded, parse_mailbox, split_list_local};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolves a `RCPT TO` address to a live list
pub struct ListResolver {
    identity: IdentityResolver,
    lists: Arc<dyn ListRepository>,
    lookup_timeout: Duration,
}

impl ListResolver {
    pub fn new(
        identity: IdentityResolver,
        lists: Arc<dyn ListRepository>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            lists,
            lookup_timeout,
        }
    }

    /// `<owner><sep><list>@<namespace domain>` to a [`ListTarget`].
    ///
    /// A well-formed address without exactly one separator is a missing
    /// mailbox, not a syntax error.
    pub async fn resolve(&self, recipient: &str) -> Result<ListTarget, Rejection> {
        let mailbox = parse_mailbox(recipient)
            .map_err(|e| Rejection::AddressSyntax(e.to_string()))?;

        let namespace = self.identity.namespace_for(&mailbox.domain)?;

        let (owner, list_name) = split_list_local(&mailbox.local_part, self.identity.separator())
            .ok_or(Rejection::MailboxNotFound)?;

        let owner_id = self.identity.resolve_owner(namespace, owner).await?;

        let list = match bounded(
            self.lookup_timeout,
            "list lookup",
            self.lists.get_list(owner_id, list_name),
        )
        .await
        {
            Ok(list) => list,
            Err(IngestError::NotFound(_)) => {
                debug!("No list {} for owner {}", list_name, owner_id);
                return Err(Rejection::MailboxNotFound);
            }
            Err(e) => {
                warn!("List lookup for {} failed: {}", mailbox, e);
                return Err(e.into());
            }
        };

        if list.archived {
            info!(list_id = %list.id, "Recipient {} is an archived list", mailbox);
            return Err(Rejection::MailboxDisabled);
        }

        Ok(ListTarget {
            recipient: mailbox.address(),
            list_id: list.id,
            owner_id,
            namespace,
            list_name: list.name,
            sender_policy: list.sender_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceConfig;
    use crate::lists::Namespace;
    use crate::repository::MemoryRepository;

    async fn setup() -> (MemoryRepository, ListResolver) {
        let repo = MemoryRepository::new();
        let namespaces = NamespaceConfig {
            user_domain: "lists.example.org".to_string(),
            org_domain: "orgs.example.org".to_string(),
            separator: '.',
        };
        let timeout = Duration::from_secs(1);
        let identity = IdentityResolver::new(Arc::new(repo.clone()), namespaces, timeout);
        let resolver = ListResolver::new(identity, Arc::new(repo.clone()), timeout);
        (repo, resolver)
    }

    #[tokio::test]
    async fn test_resolves_personal_list() {
        let (repo, resolver) = setup().await;
        let bob = repo.add_user("bob", "bob@example.org").await;
        let list = repo.add_list(bob.id, "announce", "user").await;

        let target = resolver.resolve("<bob.announce@Lists.Example.org>").await.unwrap();
        assert_eq!(target.list_id, list.id);
        assert_eq!(target.owner_id, bob.id);
        assert_eq!(target.namespace, Namespace::Personal);
        assert_eq!(target.recipient, "bob.announce@lists.example.org");
        assert_eq!(target.sender_policy, "user");
    }

    #[tokio::test]
    async fn test_resolves_org_list() {
        let (repo, resolver) = setup().await;
        let acme = repo.add_org("acme").await;
        let list = repo.add_list(acme.id, "eng", "owner").await;

        let target = resolver.resolve("acme.eng@orgs.example.org").await.unwrap();
        assert_eq!(target.list_id, list.id);
        assert_eq!(target.namespace, Namespace::Organization);
    }

    #[tokio::test]
    async fn test_missing_separator_is_mailbox_not_found() {
        let (repo, resolver) = setup().await;
        repo.add_user("bob", "bob@example.org").await;

        for rcpt in [
            "bob@lists.example.org",
            "bob.announce.extra@lists.example.org",
            "bob_announce@lists.example.org",
        ] {
            assert_eq!(
                resolver.resolve(rcpt).await,
                Err(Rejection::MailboxNotFound),
                "{}",
                rcpt
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_owner_or_list() {
        let (repo, resolver) = setup().await;
        let bob = repo.add_user("bob", "bob@example.org").await;
        repo.add_list(bob.id, "announce", "user").await;

        assert_eq!(
            resolver.resolve("carol.announce@lists.example.org").await,
            Err(Rejection::MailboxNotFound)
        );
        assert_eq!(
            resolver.resolve("bob.other@lists.example.org").await,
            Err(Rejection::MailboxNotFound)
        );
    }

    #[tokio::test]
    async fn test_archived_list_is_disabled() {
        let (repo, resolver) = setup().await;
        let bob = repo.add_user("bob", "bob@example.org").await;
        let list = repo.add_list(bob.id, "old", "user").await;
        repo.archive_list(list.id).await;

        assert_eq!(
            resolver.resolve("bob.old@lists.example.org").await,
            Err(Rejection::MailboxDisabled)
        );
    }

    #[tokio::test]
    async fn test_foreign_domain_and_bad_syntax() {
        let (_, resolver) = setup().await;

        assert!(matches!(
            resolver.resolve("bob.announce@example.net").await,
            Err(Rejection::UnrecognizedSystem(_))
        ));
        assert!(matches!(
            resolver.resolve("not an address").await,
            Err(Rejection::AddressSyntax(_))
        ));
    }
}
