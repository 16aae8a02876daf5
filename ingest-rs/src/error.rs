use thiserror::Error;

/// Failures raised by collaborators (repository, storage, DNS, bus).
///
/// These never reach the wire directly: the session maps them to a
/// [`Rejection`] first.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IngestError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Every reason a command or message can be refused.
///
/// The set is closed; the reply code triple for each variant lives in
/// [`crate::smtp::reply`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("bad source address")]
    BadConnection,

    #[error("malformed address: {0}")]
    AddressSyntax(String),

    #[error("unrecognized destination system: {0}")]
    UnrecognizedSystem(String),

    #[error("mailbox not found")]
    MailboxNotFound,

    #[error("mailbox disabled")]
    MailboxDisabled,

    #[error("mailbox misconfigured: {0}")]
    MailboxMisconfigured(String),

    #[error("too many recipients")]
    TooManyRecipients,

    #[error("bad sequence of commands")]
    BadSequence,

    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("command not implemented")]
    NotImplemented,

    #[error("AUTH not supported")]
    AuthNotSupported,

    #[error("message too large")]
    MessageTooLarge,

    #[error("malformed message: {0}")]
    MalformedBody(String),

    #[error("SPF fail")]
    SpfFail,

    #[error("SPF soft-fail")]
    SpfSoftFail,

    #[error("SPF permanent error")]
    SpfPermError,

    #[error("SPF temporary error")]
    SpfTempError,

    #[error("header From not aligned with envelope sender")]
    SpfAlignment,

    #[error("DKIM verification failed")]
    DkimFailure { temporary: bool },

    #[error("rejected by DMARC policy")]
    DmarcPolicy,

    #[error("sender not authorized: {0}")]
    Unauthorized(String),

    #[error("temporary failure: {0}")]
    Temporary(String),

    #[error("timeout")]
    Timeout,

    #[error("too many errors")]
    TooManyErrors,
}

impl Rejection {
    /// Whether a well-behaved client should retry later.
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Rejection::TooManyRecipients
                | Rejection::SpfTempError
                | Rejection::DkimFailure { temporary: true }
                | Rejection::Temporary(_)
                | Rejection::Timeout
                | Rejection::TooManyErrors
        )
    }
}

impl From<IngestError> for Rejection {
    fn from(err: IngestError) -> Self {
        Rejection::Temporary(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_errors_are_temporary() {
        let rejection: Rejection = IngestError::Storage("disk full".to_string()).into();
        assert!(rejection.is_temporary());

        let rejection: Rejection = IngestError::Timeout("dmarc lookup".to_string()).into();
        assert!(matches!(rejection, Rejection::Temporary(_)));
    }

    #[test]
    fn test_permanent_rejections() {
        assert!(!Rejection::SpfFail.is_temporary());
        assert!(!Rejection::MailboxDisabled.is_temporary());
        assert!(!Rejection::DmarcPolicy.is_temporary());
        assert!(Rejection::SpfTempError.is_temporary());
    }
}
