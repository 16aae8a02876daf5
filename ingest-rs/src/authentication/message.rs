//! DATA-phase authentication of a complete message
//!
//! Runs once per transaction after the body has been received. Each step
//! short-circuits with a [`Rejection`]:
//!
//! 1. parse; `Message-ID`, `Content-Type` and a single `From` are required
//! 2. header From must align (relaxed) with the envelope domain
//! 3. header From must belong to a registered user allowed by the list policy
//! 4. DMARC record lookup, aligned SPF, DKIM verification with alignment
//! 5. DMARC disposition
//! 6. trace and results headers are prepended to the stored bytes

use super::dkim::{classify, DkimVerifier};
use super::dmarc::{domains_align, DmarcAlignment, DmarcValidator};
use super::types::{AuthenticationResults, AuthenticationStatus, DkimCheck, DkimResults, SpfCheck};
use crate::config::ServerConfig;
use crate::error::{IngestError, Rejection};
use crate::lists::{ListTarget, PolicyEngine};
use crate::repository::Directory;
use crate::utils::{bounded, parse_mailbox, Mailbox};
use mail_parser::{HeaderName, HeaderValue, Message, MessageParser, MimeHeaders};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subjects longer than this many characters are cut
pub const MAX_SUBJECT_CHARS: usize = 255;

/// Transaction state the authenticator needs from the session
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub request_id: u64,
    pub spf: &'a SpfCheck,
    pub target: &'a ListTarget,
}

/// A message that passed authentication and policy, ready for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    /// Without angle brackets
    pub message_id: String,
    pub content_type: String,
    pub sender_id: Uuid,
    pub subject: String,
    pub in_reply_to: Option<String>,
    /// Envelope domain, when SPF passed with DMARC alignment
    pub spf_domain: Option<String>,
    /// First aligned passing signature domain
    pub dkim_domain: Option<String>,
    pub results: AuthenticationResults,
    /// Original bytes with trace and results headers prepended
    pub data: Vec<u8>,
}

pub struct MessageAuthenticator {
    directory: Arc<dyn Directory>,
    policy: PolicyEngine,
    dkim: Arc<dyn DkimVerifier>,
    dmarc: DmarcValidator,
    server: ServerConfig,
    lookup_timeout: Duration,
    dkim_require_pass: bool,
}

impl MessageAuthenticator {
    pub fn new(
        directory: Arc<dyn Directory>,
        policy: PolicyEngine,
        dkim: Arc<dyn DkimVerifier>,
        dmarc: DmarcValidator,
        server: ServerConfig,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            policy,
            dkim,
            dmarc,
            server,
            lookup_timeout,
            dkim_require_pass: false,
        }
    }

    pub fn with_dkim_require_pass(mut self, require: bool) -> Self {
        self.dkim_require_pass = require;
        self
    }

    pub async fn authenticate(
        &self,
        envelope: Envelope<'_>,
        raw: &[u8],
    ) -> Result<VerifiedMessage, Rejection> {
        let spf = envelope.spf;
        let target = envelope.target;

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| Rejection::MalformedBody("unparsable message".to_string()))?;

        let message_id = message
            .message_id()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Rejection::MalformedBody("missing Message-ID".to_string()))?
            .to_string();

        let content_type = content_type(&message)
            .ok_or_else(|| Rejection::MalformedBody("missing Content-Type".to_string()))?;

        let from = header_from(&message)?;
        let from_domain = from.domain.clone();

        if !domains_align(&from_domain, &spf.domain, DmarcAlignment::Relaxed) {
            info!(
                request_id = envelope.request_id,
                "Header From domain {} not aligned with envelope domain {}",
                from_domain,
                spf.domain
            );
            return Err(Rejection::SpfAlignment);
        }

        let sender = match bounded(
            self.lookup_timeout,
            "sender lookup",
            self.directory.user_by_email(&from.address()),
        )
        .await
        {
            Ok(user) => user,
            Err(IngestError::NotFound(_)) => {
                info!(request_id = envelope.request_id, "Unregistered sender {}", from);
                return Err(Rejection::Unauthorized(format!("{} is not registered", from)));
            }
            Err(e) => {
                warn!("Sender lookup for {} failed: {}", from, e);
                return Err(e.into());
            }
        };

        self.policy.authorize(target, sender.id).await?;

        let dmarc_lookup = self.dmarc.lookup(&from_domain).await?;

        let spf_aligned = spf.status == AuthenticationStatus::Pass
            && domains_align(&from_domain, &spf.domain, dmarc_lookup.spf_alignment());

        let dkim = match bounded(self.lookup_timeout, "DKIM verification", self.dkim.verify(raw)).await {
            Ok(signatures) => DkimResults::Verified(
                signatures
                    .into_iter()
                    .map(|sig| {
                        let status = classify(sig.status);
                        let aligned = status == AuthenticationStatus::Pass
                            && domains_align(&from_domain, &sig.domain, dmarc_lookup.dkim_alignment());
                        DkimCheck {
                            status,
                            domain: sig.domain,
                            selector: sig.selector,
                            aligned,
                        }
                    })
                    .collect(),
            ),
            Err(e @ IngestError::Timeout(_)) => return Err(e.into()),
            Err(e) => {
                warn!(request_id = envelope.request_id, "DKIM verification unavailable: {}", e);
                DkimResults::Unavailable
            }
        };

        let checks: &[DkimCheck] = match &dkim {
            DkimResults::Verified(checks) => checks,
            DkimResults::Unavailable => &[],
        };

        if self.dkim_require_pass && !checks.iter().any(|c| c.status == AuthenticationStatus::Pass) {
            let temporary = checks.iter().any(|c| c.status == AuthenticationStatus::TempError);
            info!(request_id = envelope.request_id, "No passing DKIM signature");
            return Err(Rejection::DkimFailure { temporary });
        }

        let dkim_domain = checks
            .iter()
            .find(|c| c.aligned)
            .map(|c| c.domain.clone());

        let dkim_temperror = checks.iter().any(|c| {
            c.status == AuthenticationStatus::TempError
                && domains_align(&from_domain, &c.domain, dmarc_lookup.dkim_alignment())
        });

        let dmarc = self.dmarc.evaluate(
            &from_domain,
            &dmarc_lookup,
            spf_aligned,
            dkim_domain.is_some(),
            dkim_temperror,
        )?;

        let results = AuthenticationResults {
            spf: spf.clone(),
            dkim,
            dmarc,
        };

        debug!(
            request_id = envelope.request_id,
            "Authentication results: {}",
            results.to_header(&self.server.hostname)
        );

        let data = self.annotate(&envelope, &results, raw);

        Ok(VerifiedMessage {
            message_id,
            content_type,
            sender_id: sender.id,
            subject: truncate_subject(message.subject().unwrap_or_default()),
            in_reply_to: single_in_reply_to(&message),
            spf_domain: spf_aligned.then(|| spf.domain.clone()),
            dkim_domain,
            results,
            data,
        })
    }

    /// Prepend `Received`, `Received-SPF` and `Authentication-Results`
    fn annotate(&self, envelope: &Envelope<'_>, results: &AuthenticationResults, raw: &[u8]) -> Vec<u8> {
        let spf = envelope.spf;
        let received = format!(
            "Received: from {} ([{}])\r\n\tby {} ({}) with ESMTP id {:016x}\r\n\tfor <{}>; {}\r\n",
            spf.helo,
            spf.client_ip,
            self.server.hostname,
            self.server.instance_id,
            envelope.request_id,
            envelope.target.recipient,
            chrono::Utc::now().to_rfc2822()
        );
        let received_spf = format!("Received-SPF: {}\r\n", spf.received_spf(&self.server.hostname));
        let auth_results = format!(
            "Authentication-Results: {}\r\n",
            results.to_header(&self.server.hostname)
        );

        let mut data = Vec::with_capacity(received.len() + received_spf.len() + auth_results.len() + raw.len());
        data.extend_from_slice(received.as_bytes());
        data.extend_from_slice(received_spf.as_bytes());
        data.extend_from_slice(auth_results.as_bytes());
        data.extend_from_slice(raw);
        data
    }
}

/// `type/subtype; name=value` as parsed, values quoted where needed
fn content_type(message: &Message<'_>) -> Option<String> {
    let ct = message.content_type()?;
    let mut value = match ct.subtype() {
        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
        None => ct.ctype().to_string(),
    };

    for (name, attr) in ct.attributes().unwrap_or_default() {
        let needs_quotes = attr.is_empty()
            || attr
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || "()<>@,;:\\\"/[]?=".contains(c));
        if needs_quotes {
            let escaped = attr.replace('\\', "\\\\").replace('"', "\\\"");
            value.push_str(&format!("; {}=\"{}\"", name, escaped));
        } else {
            value.push_str(&format!("; {}={}", name, attr));
        }
    }

    Some(value)
}

/// Exactly one mailbox across all From headers, groups included
fn header_from<'x>(message: &'x Message<'x>) -> Result<Mailbox, Rejection> {
    if message.header_values(HeaderName::From).count() > 1 {
        return Err(Rejection::SpfAlignment);
    }

    let from = message
        .from()
        .ok_or_else(|| Rejection::MalformedBody("missing From".to_string()))?;

    let mut addrs = from
        .iter()
        .filter_map(|addr| addr.address().map(|address| (addr.name(), address)));

    let (name, address) = match (addrs.next(), addrs.next()) {
        (None, _) => return Err(Rejection::MalformedBody("empty From header".to_string())),
        (Some(first), None) => first,
        (Some(_), Some(_)) => return Err(Rejection::SpfAlignment),
    };

    let mut mailbox = parse_mailbox(address)
        .map_err(|e| Rejection::MalformedBody(format!("bad From address: {}", e)))?;
    mailbox.display_name = name.map(str::to_string);
    Ok(mailbox)
}

/// The referenced id when a single In-Reply-To header names exactly one
fn single_in_reply_to(message: &Message<'_>) -> Option<String> {
    if message.header_values(HeaderName::InReplyTo).count() != 1 {
        return None;
    }

    match message.in_reply_to() {
        HeaderValue::Text(id) => Some(id.trim().to_string()).filter(|id| !id.is_empty()),
        _ => None,
    }
}

pub fn truncate_subject(subject: &str) -> String {
    subject.chars().take(MAX_SUBJECT_CHARS).collect()
}
