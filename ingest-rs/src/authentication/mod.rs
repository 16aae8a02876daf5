//! Sender authentication (SPF, DKIM, DMARC)
//!
//! SPF is checked against the envelope at `MAIL FROM`; everything else
//! runs over the complete message in [`message`].

pub mod dkim;
pub mod dmarc;
pub mod message;
pub mod spf;
pub mod types;

pub use dkim::{DkimSignatureResult, DkimValidator, DkimVerifier};
pub use dmarc::{DmarcLookup, DmarcPolicy, DmarcValidator};
pub use message::{Envelope, MessageAuthenticator, VerifiedMessage};
pub use spf::{SpfChecker, SpfValidator, SpfVerifier};
pub use types::{AuthenticationResults, AuthenticationStatus, DkimCheck, DkimResults, DmarcCheck, SpfCheck};

use crate::error::{IngestError, Result};
use mail_auth::Resolver;
use std::sync::Arc;
use tracing::warn;

/// Shared `mail-auth` resolver for SPF and DKIM key lookups
pub fn system_resolver() -> Result<Arc<Resolver>> {
    Resolver::new_system_conf()
        .or_else(|e| {
            warn!("Failed to load system DNS config ({}), using default resolver", e);
            Resolver::new_cloudflare_tls()
        })
        .map(Arc::new)
        .map_err(|e| IngestError::DnsLookup(format!("Failed to create DNS resolver: {}", e)))
}
