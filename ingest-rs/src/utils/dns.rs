//! DNS TXT lookups
//!
//! The rest of the crate only needs `LookupTXT(domain) -> [string]`, so
//! that is all [`TxtResolver`] exposes.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// TXT record lookup capability
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Return every TXT record at `name`, each with its character strings
    /// concatenated. A name without TXT records yields an empty vector.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// [`TxtResolver`] backed by the system (or default) DNS configuration
pub struct DnsTxtResolver {
    resolver: TokioAsyncResolver,
}

impl DnsTxtResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("Failed to load system DNS config ({}), using default resolver", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });

        Self { resolver }
    }
}

impl Default for DnsTxtResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtResolver for DnsTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        debug!("Looking up TXT records at {}", name);

        let lookup = match self.resolver.txt_lookup(name).await {
            Ok(lookup) => lookup,
            Err(e) => {
                return match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                    _ => Err(IngestError::DnsLookup(format!(
                        "TXT lookup for {} failed: {}",
                        name, e
                    ))),
                };
            }
        };

        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect())
    }
}
