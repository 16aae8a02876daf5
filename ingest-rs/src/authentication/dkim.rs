use super::types::AuthenticationStatus;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use mail_auth::common::verify::VerifySignature;
use mail_auth::{AuthenticatedMessage, DkimResult as MailAuthDkimResult, Resolver};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of verifying one `DKIM-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimSignatureResult {
    pub status: AuthenticationStatus,
    pub domain: String,
    pub selector: String,
}

/// Verifies every DKIM signature in a raw message
#[async_trait]
pub trait DkimVerifier: Send + Sync {
    /// One entry per signature; a message without signatures yields an
    /// empty vector. An error means verification could not run.
    async fn verify(&self, message: &[u8]) -> Result<Vec<DkimSignatureResult>>;
}

/// [`DkimVerifier`] on the `mail-auth` resolver
pub struct DkimValidator {
    resolver: Arc<Resolver>,
}

impl DkimValidator {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl DkimVerifier for DkimValidator {
    async fn verify(&self, message: &[u8]) -> Result<Vec<DkimSignatureResult>> {
        let parsed_message = AuthenticatedMessage::parse(message).ok_or_else(|| {
            warn!("Failed to parse message for DKIM validation");
            IngestError::Parse("message not parseable for DKIM".to_string())
        })?;

        let dkim_results = self.resolver.verify_dkim(&parsed_message).await;
        debug!("DKIM verification returned {} results", dkim_results.len());

        let results = dkim_results
            .iter()
            .map(|output| {
                let status = match output.result() {
                    MailAuthDkimResult::Pass => AuthenticationStatus::Pass,
                    MailAuthDkimResult::Fail(err) => {
                        info!("DKIM signature invalid: {:?}", err);
                        AuthenticationStatus::Fail
                    }
                    MailAuthDkimResult::Neutral(err) => {
                        info!("DKIM validation neutral: {:?}", err);
                        AuthenticationStatus::Neutral
                    }
                    MailAuthDkimResult::TempError(err) => {
                        warn!("DKIM temporary error: {:?}", err);
                        AuthenticationStatus::TempError
                    }
                    MailAuthDkimResult::PermError(err) => {
                        warn!("DKIM permanent error: {:?}", err);
                        AuthenticationStatus::PermError
                    }
                    MailAuthDkimResult::None => AuthenticationStatus::None,
                };

                let (domain, selector) = output
                    .signature()
                    .map(|sig| (sig.domain().to_string(), sig.selector().to_string()))
                    .unwrap_or_default();

                DkimSignatureResult {
                    status,
                    domain,
                    selector,
                }
            })
            .collect();

        Ok(results)
    }
}

/// Classification used by DMARC: only pass, temperror, permerror and fail
/// are distinguished.
pub fn classify(status: AuthenticationStatus) -> AuthenticationStatus {
    match status {
        AuthenticationStatus::Pass => AuthenticationStatus::Pass,
        AuthenticationStatus::TempError => AuthenticationStatus::TempError,
        AuthenticationStatus::PermError => AuthenticationStatus::PermError,
        _ => AuthenticationStatus::Fail,
    }
}
