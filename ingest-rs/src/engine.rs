//! Wiring of the ingestion components
//!
//! One [`Engine`] is shared by every session. It owns no mutable state
//! beyond the request id counter.

use crate::authentication::{
    DkimVerifier, DmarcValidator, Envelope, MessageAuthenticator, SpfCheck, SpfChecker,
    SpfVerifier,
};
use crate::bus::EventBus;
use crate::config::Config;
use crate::error::Rejection;
use crate::ingest::{IngestOutcome, IngestPipeline, Reconciler};
use crate::lists::{IdentityResolver, ListResolver, ListTarget, PolicyEngine};
use crate::repository::{Directory, ListRepository};
use crate::storage::BlobStore;
use crate::utils::{parse_mailbox, TxtResolver};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// External collaborators the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn Directory>,
    pub lists: Arc<dyn ListRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub bus: Arc<dyn EventBus>,
    pub spf: Arc<dyn SpfVerifier>,
    pub dkim: Arc<dyn DkimVerifier>,
    pub txt: Arc<dyn TxtResolver>,
}

pub struct Engine {
    config: Config,
    spf: SpfChecker,
    recipients: ListResolver,
    authenticator: MessageAuthenticator,
    pipeline: IngestPipeline,
    lists: Arc<dyn ListRepository>,
    bus: Arc<dyn EventBus>,
    next_request_id: AtomicU64,
}

impl Engine {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let timeout = config.lookup_timeout();
        let Collaborators {
            directory,
            lists,
            blobs,
            bus,
            spf,
            dkim,
            txt,
        } = collaborators;

        let identity = IdentityResolver::new(directory.clone(), config.namespaces.clone(), timeout);
        let recipients = ListResolver::new(identity, lists.clone(), timeout);
        let policy = PolicyEngine::new(directory.clone(), lists.clone(), timeout);
        let authenticator = MessageAuthenticator::new(
            directory,
            policy,
            dkim,
            DmarcValidator::new(txt, timeout),
            config.server.clone(),
            timeout,
        )
        .with_dkim_require_pass(config.authentication.dkim_require_pass);
        let pipeline = IngestPipeline::new(
            lists.clone(),
            blobs,
            bus.clone(),
            config.bus.channel.clone(),
            timeout,
            config.bookkeeping_timeout(),
        );

        Self {
            spf: SpfChecker::new(spf, timeout),
            recipients,
            authenticator,
            pipeline,
            lists,
            bus,
            next_request_id: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Monotonic per-instance transaction id
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// `MAIL FROM`: validate the reverse path and run the SPF gate.
    pub async fn check_sender(
        &self,
        client_ip: IpAddr,
        helo: &str,
        reverse_path: &str,
    ) -> Result<SpfCheck, Rejection> {
        if reverse_path.trim().is_empty() {
            return Err(Rejection::AddressSyntax(
                "null reverse-path not accepted".to_string(),
            ));
        }

        let mailbox =
            parse_mailbox(reverse_path).map_err(|e| Rejection::AddressSyntax(e.to_string()))?;

        self.spf
            .check(client_ip, helo, &mailbox.address(), &mailbox.domain)
            .await
    }

    /// `RCPT TO`: resolve the recipient to a live list.
    pub async fn resolve_recipient(&self, recipient: &str) -> Result<ListTarget, Rejection> {
        self.recipients.resolve(recipient).await
    }

    /// End of `DATA`: authenticate, then ingest.
    pub async fn accept_message(
        &self,
        envelope: Envelope<'_>,
        raw: &[u8],
    ) -> Result<IngestOutcome, Rejection> {
        let verified = self.authenticator.authenticate(envelope, raw).await?;
        let outcome = self.pipeline.ingest(envelope.target, &verified).await?;

        info!(
            request_id = envelope.request_id,
            list_id = %envelope.target.list_id,
            "Message {} accepted ({:?})",
            verified.message_id,
            outcome
        );
        Ok(outcome)
    }

    /// Sweep for records left unprocessed, sharing this engine's collaborators
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.lists.clone(),
            self.bus.clone(),
            self.config.bus.channel.clone(),
            &self.config.ingest,
        )
    }
}
