//! Recipient resolution and per-list sender policy
//!
//! - [`identity`]: recipient domain to namespace, owner token to owner id
//! - [`resolver`]: full `RCPT TO` resolution down to a list
//! - [`policy`]: who may post, evaluated once the sender is known

pub mod identity;
pub mod policy;
pub mod resolver;

pub use identity::IdentityResolver;
pub use policy::PolicyEngine;
pub use resolver::ListResolver;

use std::fmt;
use uuid::Uuid;

/// Which owner directory a recipient domain maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Lists owned by a single user
    Personal,
    /// Lists owned by an organization
    Organization,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Personal => write!(f, "personal"),
            Namespace::Organization => write!(f, "organization"),
        }
    }
}

/// A recipient resolved to a live list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTarget {
    /// Normalized recipient address
    pub recipient: String,
    pub list_id: Uuid,
    pub owner_id: Uuid,
    pub namespace: Namespace,
    pub list_name: String,
    /// Raw stored policy, validated at DATA time
    pub sender_policy: String,
}
