use super::Namespace;
use crate::config::NamespaceConfig;
use crate::error::{IngestError, Rejection};
use crate::repository::Directory;
use crate::utils::bounded;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maps recipient domains to namespaces and owner tokens to owner ids
pub struct IdentityResolver {
    directory: Arc<dyn Directory>,
    namespaces: NamespaceConfig,
    lookup_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(
        directory: Arc<dyn Directory>,
        namespaces: NamespaceConfig,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            namespaces,
            lookup_timeout,
        }
    }

    pub fn separator(&self) -> char {
        self.namespaces.separator
    }

    /// Select the namespace served at `domain`
    pub fn namespace_for(&self, domain: &str) -> Result<Namespace, Rejection> {
        if domain.eq_ignore_ascii_case(&self.namespaces.user_domain) {
            Ok(Namespace::Personal)
        } else if domain.eq_ignore_ascii_case(&self.namespaces.org_domain) {
            Ok(Namespace::Organization)
        } else {
            Err(Rejection::UnrecognizedSystem(domain.to_string()))
        }
    }

    /// Look up the user or organization named `token`
    pub async fn resolve_owner(&self, namespace: Namespace, token: &str) -> Result<Uuid, Rejection> {
        let lookup = match namespace {
            Namespace::Personal => bounded(
                self.lookup_timeout,
                "user lookup",
                async { self.directory.user_by_name(token).await.map(|user| user.id) },
            )
            .await,
            Namespace::Organization => bounded(
                self.lookup_timeout,
                "org lookup",
                async { self.directory.org_by_name(token).await.map(|org| org.id) },
            )
            .await,
        };

        match lookup {
            Ok(id) => {
                debug!("Resolved {} owner {} to {}", namespace, token, id);
                Ok(id)
            }
            Err(IngestError::NotFound(_)) => Err(Rejection::MailboxNotFound),
            Err(e) => {
                warn!("Owner lookup for {} failed: {}", token, e);
                Err(e.into())
            }
        }
    }
}
