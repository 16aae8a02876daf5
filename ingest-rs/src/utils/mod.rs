//! Utility modules
//!
//! - [`address`]: Envelope path parsing and list-address splitting
//! - [`dns`]: TXT record lookups

pub mod address;
pub mod dns;

pub use address::{parse_mailbox, split_address, split_list_local, Mailbox};
pub use dns::{DnsTxtResolver, TxtResolver};

use crate::error::{IngestError, Result};
use std::future::Future;
use std::time::Duration;

/// Run a collaborator call under a deadline. Expiry is reported as
/// [`IngestError::Timeout`], which callers surface as a temporary rejection.
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout(what.to_string())),
    }
}
