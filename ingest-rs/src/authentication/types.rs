use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Authentication status for SPF/DKIM/DMARC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationStatus {
    /// Authentication passed
    Pass,
    /// Authentication failed
    Fail,
    /// Temporary error (DNS timeout, etc.)
    TempError,
    /// Permanent error (broken record, etc.)
    PermError,
    /// Neutral (policy allows but doesn't endorse)
    Neutral,
    /// Softfail (policy suggests reject but not enforced)
    SoftFail,
    /// Nothing to evaluate
    None,
}

impl fmt::Display for AuthenticationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationStatus::Pass => write!(f, "pass"),
            AuthenticationStatus::Fail => write!(f, "fail"),
            AuthenticationStatus::TempError => write!(f, "temperror"),
            AuthenticationStatus::PermError => write!(f, "permerror"),
            AuthenticationStatus::Neutral => write!(f, "neutral"),
            AuthenticationStatus::SoftFail => write!(f, "softfail"),
            AuthenticationStatus::None => write!(f, "none"),
        }
    }
}

/// Outcome of the envelope SPF check made at `MAIL FROM`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfCheck {
    pub status: AuthenticationStatus,
    pub client_ip: IpAddr,
    /// Full MAIL FROM address
    pub envelope_from: String,
    /// Domain the policy was queried for
    pub domain: String,
    pub helo: String,
}

impl SpfCheck {
    /// Value for a `Received-SPF` header (RFC 7208 section 9.1)
    pub fn received_spf(&self, hostname: &str) -> String {
        let comment = match self.status {
            AuthenticationStatus::Pass => format!(
                "domain of {} designates {} as permitted sender",
                self.envelope_from, self.client_ip
            ),
            AuthenticationStatus::Neutral => format!(
                "{} is neither permitted nor denied by domain of {}",
                self.client_ip, self.envelope_from
            ),
            AuthenticationStatus::None => format!(
                "domain of {} does not publish an SPF record",
                self.domain
            ),
            _ => format!(
                "domain of {} does not designate {} as permitted sender",
                self.envelope_from, self.client_ip
            ),
        };

        format!(
            "{} ({}: {}) client-ip={}; envelope-from=<{}>; helo={};",
            self.status, hostname, comment, self.client_ip, self.envelope_from, self.helo
        )
    }
}

/// One verified DKIM signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimCheck {
    pub status: AuthenticationStatus,
    /// Signing domain (`d=`)
    pub domain: String,
    /// Selector (`s=`)
    pub selector: String,
    /// Passed and aligned with the header From domain
    pub aligned: bool,
}

/// DKIM section of the results header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DkimResults {
    /// Verification ran; empty when the message carries no signature
    Verified(Vec<DkimCheck>),
    /// Verification could not run at all
    Unavailable,
}

/// DMARC verdict for the header From domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmarcCheck {
    pub status: AuthenticationStatus,
    /// Disposition requested by the record, when one was found
    pub policy: Option<String>,
    pub from_domain: String,
}

/// Everything that goes into the `Authentication-Results` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResults {
    pub spf: SpfCheck,
    pub dkim: DkimResults,
    pub dmarc: DmarcCheck,
}

impl AuthenticationResults {
    /// Generate Authentication-Results header value (RFC 8601)
    pub fn to_header(&self, authserv_id: &str) -> String {
        let mut parts = vec![authserv_id.to_string()];

        parts.push(format!(
            "spf={} smtp.mailfrom={}",
            self.spf.status, self.spf.domain
        ));

        match &self.dkim {
            DkimResults::Verified(checks) if checks.is_empty() => {
                parts.push("dkim=none".to_string());
            }
            DkimResults::Verified(checks) => {
                for check in checks {
                    parts.push(format!(
                        "dkim={} header.d={} header.s={}",
                        check.status, check.domain, check.selector
                    ));
                }
            }
            DkimResults::Unavailable => parts.push("dkim=neutral".to_string()),
        }

        match &self.dmarc.policy {
            Some(policy) => parts.push(format!(
                "dmarc={} (p={}) header.from={}",
                self.dmarc.status, policy, self.dmarc.from_domain
            )),
            None => parts.push(format!(
                "dmarc={} header.from={}",
                self.dmarc.status, self.dmarc.from_domain
            )),
        }

        parts.join("; ")
    }
}
