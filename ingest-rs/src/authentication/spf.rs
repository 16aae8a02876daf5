use super::types::{AuthenticationStatus, SpfCheck};
use crate::error::{IngestError, Rejection, Result};
use crate::utils::bounded;
use async_trait::async_trait;
use mail_auth::{Resolver, SpfResult as MailAuthSpfResult};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SPF policy evaluation for one sender
#[async_trait]
pub trait SpfVerifier: Send + Sync {
    async fn verify(
        &self,
        client_ip: IpAddr,
        helo_domain: &str,
        domain: &str,
        sender: &str,
    ) -> Result<AuthenticationStatus>;
}

/// [`SpfVerifier`] on the `mail-auth` resolver
pub struct SpfValidator {
    resolver: Arc<Resolver>,
}

impl SpfValidator {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl SpfVerifier for SpfValidator {
    async fn verify(
        &self,
        client_ip: IpAddr,
        helo_domain: &str,
        domain: &str,
        sender: &str,
    ) -> Result<AuthenticationStatus> {
        let spf_output = self
            .resolver
            .verify_spf_sender(client_ip, helo_domain, domain, sender)
            .await;

        let spf_result = spf_output.result();
        debug!("SPF result for {} from {}: {:?}", sender, client_ip, spf_result);

        Ok(match spf_result {
            MailAuthSpfResult::Pass => AuthenticationStatus::Pass,
            MailAuthSpfResult::Fail => AuthenticationStatus::Fail,
            MailAuthSpfResult::SoftFail => AuthenticationStatus::SoftFail,
            MailAuthSpfResult::Neutral => AuthenticationStatus::Neutral,
            MailAuthSpfResult::TempError => AuthenticationStatus::TempError,
            MailAuthSpfResult::PermError => AuthenticationStatus::PermError,
            MailAuthSpfResult::None => AuthenticationStatus::None,
        })
    }
}

/// The `MAIL FROM` SPF gate
pub struct SpfChecker {
    verifier: Arc<dyn SpfVerifier>,
    lookup_timeout: Duration,
}

impl SpfChecker {
    pub fn new(verifier: Arc<dyn SpfVerifier>, lookup_timeout: Duration) -> Self {
        Self {
            verifier,
            lookup_timeout,
        }
    }

    /// Check the envelope identity. The returned [`SpfCheck`] is kept for
    /// the alignment checks made once the header From is known.
    pub async fn check(
        &self,
        client_ip: IpAddr,
        helo: &str,
        envelope_from: &str,
        domain: &str,
    ) -> std::result::Result<SpfCheck, Rejection> {
        info!(
            "Validating SPF for {} from {} (HELO: {})",
            envelope_from, client_ip, helo
        );

        let status = match bounded(
            self.lookup_timeout,
            "SPF evaluation",
            self.verifier.verify(client_ip, helo, domain, envelope_from),
        )
        .await
        {
            Ok(status) => status,
            Err(IngestError::Timeout(what)) => {
                warn!("{} for {} timed out", what, envelope_from);
                return Err(Rejection::Temporary(format!("{} timed out", what)));
            }
            Err(e) => {
                warn!("SPF evaluation for {} failed: {}", envelope_from, e);
                AuthenticationStatus::TempError
            }
        };

        spf_disposition(status)?;

        Ok(SpfCheck {
            status,
            client_ip,
            envelope_from: envelope_from.to_string(),
            domain: domain.to_string(),
            helo: helo.to_string(),
        })
    }
}

/// Map an SPF verdict to accept or a rejection.
///
/// pass, neutral and none proceed; every other verdict has its own code.
pub fn spf_disposition(status: AuthenticationStatus) -> std::result::Result<(), Rejection> {
    match status {
        AuthenticationStatus::Pass | AuthenticationStatus::Neutral | AuthenticationStatus::None => {
            Ok(())
        }
        AuthenticationStatus::Fail => Err(Rejection::SpfFail),
        AuthenticationStatus::SoftFail => Err(Rejection::SpfSoftFail),
        AuthenticationStatus::PermError => Err(Rejection::SpfPermError),
        AuthenticationStatus::TempError => Err(Rejection::SpfTempError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(std::result::Result<AuthenticationStatus, ()>, Duration);

    #[async_trait]
    impl SpfVerifier for Fixed {
        async fn verify(&self, _: IpAddr, _: &str, _: &str, _: &str) -> Result<AuthenticationStatus> {
            tokio::time::sleep(self.1).await;
            self.0
                .map_err(|_| IngestError::DnsLookup("SERVFAIL".to_string()))
        }
    }

    fn checker(result: std::result::Result<AuthenticationStatus, ()>, delay: Duration) -> SpfChecker {
        SpfChecker::new(Arc::new(Fixed(result, delay)), Duration::from_millis(200))
    }

    async fn check(checker: &SpfChecker) -> std::result::Result<SpfCheck, Rejection> {
        checker
            .check(
                "192.0.2.1".parse().unwrap(),
                "mail.example.com",
                "alice@example.com",
                "example.com",
            )
            .await
    }

    #[test]
    fn test_spf_disposition() {
        assert_eq!(spf_disposition(AuthenticationStatus::Pass), Ok(()));
        assert_eq!(spf_disposition(AuthenticationStatus::Neutral), Ok(()));
        assert_eq!(spf_disposition(AuthenticationStatus::None), Ok(()));
        assert_eq!(spf_disposition(AuthenticationStatus::Fail), Err(Rejection::SpfFail));
        assert_eq!(
            spf_disposition(AuthenticationStatus::SoftFail),
            Err(Rejection::SpfSoftFail)
        );
        assert_eq!(
            spf_disposition(AuthenticationStatus::PermError),
            Err(Rejection::SpfPermError)
        );
        assert_eq!(
            spf_disposition(AuthenticationStatus::TempError),
            Err(Rejection::SpfTempError)
        );
    }

    #[tokio::test]
    async fn test_check_keeps_verdict() {
        let checker = checker(Ok(AuthenticationStatus::Pass), Duration::ZERO);
        let spf = check(&checker).await.unwrap();
        assert_eq!(spf.status, AuthenticationStatus::Pass);
        assert_eq!(spf.domain, "example.com");
        assert_eq!(spf.envelope_from, "alice@example.com");
    }

    #[tokio::test]
    async fn test_verifier_error_is_temperror() {
        let checker = checker(Err(()), Duration::ZERO);
        assert_eq!(check(&checker).await, Err(Rejection::SpfTempError));
    }

    #[tokio::test]
    async fn test_timeout_is_temporary() {
        let checker = checker(Ok(AuthenticationStatus::Pass), Duration::from_secs(5));
        let result = check(&checker).await;
        assert!(matches!(result, Err(Rejection::Temporary(_))));
        assert!(result.unwrap_err().is_temporary());
    }
}
