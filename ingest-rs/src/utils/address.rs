//! Envelope path parsing and list-address splitting
//!
//! Covers the `addr-spec` grammar of SMTP paths: dot-atom or quoted local
//! parts, domain names or address literals, and obsolete source routes.

use crate::error::{IngestError, Result};
use std::fmt;

/// A single parsed mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub display_name: Option<String>,
    pub local_part: String,
    /// Always lowercase
    pub domain: String,
}

impl Mailbox {
    /// `local@domain` without display name
    pub fn address(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Parse an SMTP path: an `addr-spec`, optionally in angle brackets.
///
/// Header mailboxes come from `mail-parser`; this only sees envelope paths
/// and the bare addresses extracted from headers.
pub fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let input = input.trim();
    let spec = match input.strip_prefix('<') {
        Some(inner) => inner.strip_suffix('>').ok_or_else(|| {
            IngestError::InvalidAddress(format!("Unterminated angle address: {}", input))
        })?,
        None => input,
    };

    if spec.trim().is_empty() {
        return Err(IngestError::InvalidAddress("Address is empty".to_string()));
    }

    let (local_part, domain) = parse_addr_spec(spec)?;
    Ok(Mailbox {
        display_name: None,
        local_part,
        domain,
    })
}

/// Split `local@domain` at the last `@`.
pub fn split_address(address: &str) -> Result<(&str, &str)> {
    let (local, domain) = address
        .rsplit_once('@')
        .ok_or_else(|| IngestError::InvalidAddress("Email must contain @".to_string()))?;

    if local.is_empty() || domain.is_empty() {
        return Err(IngestError::InvalidAddress(
            "Email parts cannot be empty".to_string(),
        ));
    }

    Ok((local, domain))
}

/// Split a list local part into `(owner, list)`.
///
/// The separator must appear exactly once with non-empty tokens on both
/// sides; anything else is not a list address.
pub fn split_list_local(local: &str, separator: char) -> Option<(&str, &str)> {
    let mut parts = local.split(separator);
    let owner = parts.next()?;
    let list = parts.next()?;
    if parts.next().is_some() || owner.is_empty() || list.is_empty() {
        return None;
    }
    Some((owner, list))
}

fn parse_addr_spec(spec: &str) -> Result<(String, String)> {
    let spec = spec.trim();
    // Source routes (`@a,@b:user@host`) are obsolete; drop them.
    let spec = match (spec.starts_with('@'), spec.find(':')) {
        (true, Some(colon)) => &spec[colon + 1..],
        _ => spec,
    };

    let (local, domain) = split_address(spec)?;

    let local = if local.starts_with('"') {
        if local.len() < 2 || !local.ends_with('"') {
            return Err(IngestError::InvalidAddress(format!(
                "Unterminated quoted local part: {}",
                spec
            )));
        }
        local.to_string()
    } else {
        if local
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "<>()[]\\,;:\"@".contains(c))
        {
            return Err(IngestError::InvalidAddress(format!(
                "Invalid local part: {}",
                local
            )));
        }
        if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
            return Err(IngestError::InvalidAddress(format!(
                "Invalid dots in local part: {}",
                local
            )));
        }
        local.to_string()
    };

    let valid_domain = if domain.starts_with('[') && domain.ends_with(']') {
        true
    } else {
        domain
            .split('.')
            .all(|label| {
                !label.is_empty()
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || !c.is_ascii())
            })
    };
    if !valid_domain {
        return Err(IngestError::InvalidAddress(format!(
            "Invalid domain: {}",
            domain
        )));
    }

    Ok((local, domain.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_addr_spec() {
        let mailbox = parse_mailbox("alice@Example.COM").unwrap();
        assert_eq!(mailbox.local_part, "alice");
        assert_eq!(mailbox.domain, "example.com");
        assert_eq!(mailbox.display_name, None);
        assert_eq!(mailbox.address(), "alice@example.com");
    }

    #[test]
    fn test_angle_path() {
        let mailbox = parse_mailbox("<bob.announce@Lists.Example.org>").unwrap();
        assert_eq!(mailbox.address(), "bob.announce@lists.example.org");

        let routed = parse_mailbox("<@relay.example.net:alice@example.com>").unwrap();
        assert_eq!(routed.address(), "alice@example.com");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(parse_mailbox("").is_err());
        assert!(parse_mailbox("alice").is_err());
        assert!(parse_mailbox("alice@").is_err());
        assert!(parse_mailbox("@example.com").is_err());
        assert!(parse_mailbox("al ice@example.com").is_err());
        assert!(parse_mailbox("alice@exa mple.com").is_err());
        assert!(parse_mailbox("<alice@example.com").is_err());
        assert!(parse_mailbox("<>").is_err());
        assert!(parse_mailbox("Alice <alice@example.com>").is_err());
        assert!(parse_mailbox("alice..x@example.com").is_err());
    }

    #[test]
    fn test_quoted_local_part() {
        let mailbox = parse_mailbox("\"john doe\"@example.com").unwrap();
        assert_eq!(mailbox.local_part, "\"john doe\"");
    }

    #[test]
    fn test_split_list_local() {
        assert_eq!(split_list_local("bob.announce", '.'), Some(("bob", "announce")));
        assert_eq!(split_list_local("bob", '.'), None);
        assert_eq!(split_list_local("bob.", '.'), None);
        assert_eq!(split_list_local(".announce", '.'), None);
        assert_eq!(split_list_local("bob.announce.extra", '.'), None);
        assert_eq!(split_list_local("acme+dev", '+'), Some(("acme", "dev")));
    }

    #[test]
    fn test_split_address() {
        assert_eq!(
            split_address("bob.announce@lists.example.org").unwrap(),
            ("bob.announce", "lists.example.org")
        );
        assert!(split_address("no-at-sign").is_err());
    }
}
