//! DMARC record lookup and evaluation (RFC 7489)
//!
//! Only the tags that affect disposition are interpreted: `p`, `sp`,
//! `adkim` and `aspf`. Reporting tags are ignored.

use super::types::{AuthenticationStatus, DmarcCheck};
use crate::error::{IngestError, Rejection, Result};
use crate::utils::{bounded, TxtResolver};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// DMARC policy extracted from DNS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmarcPolicy {
    /// p=none : monitoring only
    #[default]
    None,
    /// p=quarantine
    Quarantine,
    /// p=reject
    Reject,
}

impl DmarcPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(DmarcPolicy::None),
            "quarantine" => Ok(DmarcPolicy::Quarantine),
            "reject" => Ok(DmarcPolicy::Reject),
            other => Err(IngestError::Parse(format!("unknown DMARC policy {:?}", other))),
        }
    }
}

impl fmt::Display for DmarcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmarcPolicy::None => write!(f, "none"),
            DmarcPolicy::Quarantine => write!(f, "quarantine"),
            DmarcPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// DMARC alignment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmarcAlignment {
    /// Subdomain alignment allowed
    #[default]
    Relaxed,
    /// Exact domain match required
    Strict,
}

/// A parsed `_dmarc` TXT record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DmarcRecord {
    pub policy: DmarcPolicy,
    pub subdomain_policy: Option<DmarcPolicy>,
    pub spf_alignment: DmarcAlignment,
    pub dkim_alignment: DmarcAlignment,
}

/// Parse a DMARC record. The version tag must come first.
pub fn parse_dmarc_record(record: &str) -> Result<DmarcRecord> {
    let mut dmarc = DmarcRecord::default();
    let mut tags = record
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty());

    match tags.next().and_then(|tag| tag.split_once('=')) {
        Some((key, value)) if key.trim() == "v" && value.trim() == "DMARC1" => {}
        _ => return Err(IngestError::Parse("Invalid DMARC version".to_string())),
    }

    for pair in tags {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "p" => dmarc.policy = DmarcPolicy::parse(value)?,
            "sp" => dmarc.subdomain_policy = Some(DmarcPolicy::parse(value)?),
            "aspf" => dmarc.spf_alignment = parse_alignment(value),
            "adkim" => dmarc.dkim_alignment = parse_alignment(value),
            _ => {} // Ignore unknown tags
        }
    }

    Ok(dmarc)
}

fn parse_alignment(value: &str) -> DmarcAlignment {
    if value.eq_ignore_ascii_case("s") {
        DmarcAlignment::Strict
    } else {
        DmarcAlignment::Relaxed
    }
}

/// Check if two domains align according to DMARC alignment mode.
///
/// Relaxed mode accepts either domain being a subdomain of the other.
pub fn domains_align(from_domain: &str, auth_domain: &str, mode: DmarcAlignment) -> bool {
    if from_domain.eq_ignore_ascii_case(auth_domain) {
        return true;
    }

    match mode {
        DmarcAlignment::Strict => false,
        DmarcAlignment::Relaxed => {
            let from_lower = from_domain.to_lowercase();
            let auth_lower = auth_domain.to_lowercase();

            from_lower.ends_with(&format!(".{}", auth_lower))
                || auth_lower.ends_with(&format!(".{}", from_lower))
        }
    }
}

/// What DNS said about a domain's DMARC policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmarcLookup {
    /// `policy` is the one that applies to the queried domain
    Found {
        record: DmarcRecord,
        policy: DmarcPolicy,
    },
    NoRecord,
    TempError(String),
    PermError(String),
}

impl DmarcLookup {
    pub fn spf_alignment(&self) -> DmarcAlignment {
        match self {
            DmarcLookup::Found { record, .. } => record.spf_alignment,
            _ => DmarcAlignment::Relaxed,
        }
    }

    pub fn dkim_alignment(&self) -> DmarcAlignment {
        match self {
            DmarcLookup::Found { record, .. } => record.dkim_alignment,
            _ => DmarcAlignment::Relaxed,
        }
    }
}

/// Looks up and enforces DMARC policies
pub struct DmarcValidator {
    resolver: Arc<dyn TxtResolver>,
    lookup_timeout: Duration,
}

impl DmarcValidator {
    pub fn new(resolver: Arc<dyn TxtResolver>, lookup_timeout: Duration) -> Self {
        Self {
            resolver,
            lookup_timeout,
        }
    }

    /// Find the policy for `domain`, falling back to its organizational
    /// domain (public suffix list) where `sp=` overrides `p=`.
    ///
    /// DNS failures are reported in the result; only a timeout is an error.
    pub async fn lookup(&self, domain: &str) -> Result<DmarcLookup> {
        let lookup = self.lookup_record(domain).await?;
        if lookup != DmarcLookup::NoRecord {
            return Ok(lookup);
        }

        let org_domain = organizational_domain(domain);
        if org_domain.eq_ignore_ascii_case(domain) {
            return Ok(DmarcLookup::NoRecord);
        }

        debug!("No DMARC record at {}, trying {}", domain, org_domain);
        Ok(match self.lookup_record(&org_domain).await? {
            DmarcLookup::Found { record, .. } => DmarcLookup::Found {
                policy: record.subdomain_policy.unwrap_or(record.policy),
                record,
            },
            other => other,
        })
    }

    async fn lookup_record(&self, domain: &str) -> Result<DmarcLookup> {
        let name = format!("_dmarc.{}", domain);
        let txts = match bounded(
            self.lookup_timeout,
            "DMARC lookup",
            self.resolver.lookup_txt(&name),
        )
        .await
        {
            Ok(txts) => txts,
            Err(e @ IngestError::Timeout(_)) => return Err(e),
            Err(e) => {
                warn!("DMARC lookup at {} failed: {}", name, e);
                return Ok(DmarcLookup::TempError(e.to_string()));
            }
        };

        let mut records = txts
            .iter()
            .filter(|txt| txt.trim_start().starts_with("v=DMARC1"));

        let record = match (records.next(), records.next()) {
            (None, _) => return Ok(DmarcLookup::NoRecord),
            (Some(record), None) => record,
            (Some(_), Some(_)) => {
                return Ok(DmarcLookup::PermError(format!(
                    "multiple DMARC records at {}",
                    name
                )))
            }
        };

        match parse_dmarc_record(record) {
            Ok(record) => Ok(DmarcLookup::Found {
                policy: record.policy,
                record,
            }),
            Err(e) => {
                warn!("Bad DMARC record at {}: {}", name, e);
                Ok(DmarcLookup::PermError(e.to_string()))
            }
        }
    }

    /// Apply the disposition: with neither identifier aligned, a policy
    /// other than `none` rejects; everything else is accepted and reported.
    ///
    /// `dkim_temperror` marks a signature for the From domain whose key
    /// lookup failed transiently. An enforced rejection is then retryable.
    pub fn evaluate(
        &self,
        from_domain: &str,
        lookup: &DmarcLookup,
        spf_aligned: bool,
        dkim_aligned: bool,
        dkim_temperror: bool,
    ) -> std::result::Result<DmarcCheck, Rejection> {
        let aligned = spf_aligned || dkim_aligned;

        let (status, policy) = match lookup {
            DmarcLookup::Found { policy, .. } if aligned => {
                (AuthenticationStatus::Pass, Some(policy.to_string()))
            }
            DmarcLookup::Found { policy, .. } => {
                if *policy != DmarcPolicy::None && dkim_temperror {
                    info!(
                        "DMARC {} policy of {} deferred on DKIM key lookup failure",
                        policy, from_domain
                    );
                    return Err(Rejection::DkimFailure { temporary: true });
                }
                if *policy != DmarcPolicy::None {
                    info!(
                        "DMARC {} policy of {} rejects unaligned message",
                        policy, from_domain
                    );
                    return Err(Rejection::DmarcPolicy);
                }
                (AuthenticationStatus::Fail, Some(policy.to_string()))
            }
            DmarcLookup::NoRecord if aligned => (AuthenticationStatus::Pass, None),
            DmarcLookup::NoRecord => (AuthenticationStatus::None, None),
            DmarcLookup::TempError(_) => (AuthenticationStatus::TempError, None),
            DmarcLookup::PermError(_) => (AuthenticationStatus::PermError, None),
        };

        if status != AuthenticationStatus::Pass {
            info!("DMARC {} for {}, accepting", status, from_domain);
        }

        Ok(DmarcCheck {
            status,
            policy,
            from_domain: from_domain.to_string(),
        })
    }
}

/// Registrable domain of `domain` per the public suffix list
fn organizational_domain(domain: &str) -> String {
    let domain = domain.trim_end_matches('.');
    psl::domain_str(domain).unwrap_or(domain).to_string()
}
