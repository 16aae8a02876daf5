//! SMTP replies and the fixed rejection table

use crate::error::Rejection;
use std::fmt;

/// One reply: basic code, enhanced status code, text.
///
/// An empty enhanced code is omitted (greeting, HELO, EHLO). Each line of a
/// multi-line text becomes its own reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub enhanced: &'static str,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, enhanced: &'static str, text: impl Into<String>) -> Self {
        Self {
            code,
            enhanced,
            text: text.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(250, "2.0.0", "OK")
    }

    /// Transient (4yz) replies
    pub fn is_temporary(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_positive(&self) -> bool {
        self.code < 400
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = self.text.split('\n').peekable();
        while let Some(line) = lines.next() {
            let sep = if lines.peek().is_some() { '-' } else { ' ' };
            if self.enhanced.is_empty() {
                write!(f, "{}{}{}\r\n", self.code, sep, line)?;
            } else {
                write!(f, "{}{}{} {}\r\n", self.code, sep, self.enhanced, line)?;
            }
        }
        Ok(())
    }
}

impl From<&Rejection> for Reply {
    fn from(rejection: &Rejection) -> Self {
        let (code, enhanced) = match rejection {
            Rejection::BadConnection => (554, "5.7.1"),
            Rejection::AddressSyntax(_) => (501, "5.1.3"),
            Rejection::UnrecognizedSystem(_) => (550, "5.1.2"),
            Rejection::MailboxNotFound => (550, "5.1.1"),
            Rejection::MailboxDisabled => (550, "5.2.1"),
            Rejection::MailboxMisconfigured(_) => (550, "5.3.5"),
            Rejection::TooManyRecipients => (452, "4.5.3"),
            Rejection::BadSequence => (503, "5.5.1"),
            Rejection::SyntaxError(_) => (500, "5.5.2"),
            Rejection::NotImplemented => (502, "5.5.1"),
            Rejection::AuthNotSupported => (502, "5.5.1"),
            Rejection::MessageTooLarge => (552, "5.3.4"),
            Rejection::MalformedBody(_) => (550, "5.6.0"),
            Rejection::SpfFail | Rejection::SpfSoftFail => (550, "5.7.23"),
            Rejection::SpfPermError => (550, "5.7.24"),
            Rejection::SpfTempError => (451, "4.7.24"),
            Rejection::SpfAlignment => (550, "5.7.1"),
            Rejection::DkimFailure { temporary: true } => (451, "4.7.20"),
            Rejection::DkimFailure { temporary: false } => (550, "5.7.20"),
            Rejection::DmarcPolicy => (550, "5.7.26"),
            Rejection::Unauthorized(_) => (550, "5.7.1"),
            // Collaborator failures keep their detail in the log, not on the wire
            Rejection::Temporary(_) => {
                return Self::new(451, "4.3.0", "temporary failure, try again later")
            }
            Rejection::Timeout => (421, "4.4.2"),
            Rejection::TooManyErrors => (421, "4.7.0"),
        };

        let text = rejection
            .to_string()
            .replace(|c: char| c == '\r' || c == '\n', " ");
        Self::new(code, enhanced, text)
    }
}

impl From<Rejection> for Reply {
    fn from(rejection: Rejection) -> Self {
        Reply::from(&rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(Reply::ok().to_string(), "250 2.0.0 OK\r\n");
        assert_eq!(
            Reply::from(Rejection::MailboxNotFound).to_string(),
            "550 5.1.1 mailbox not found\r\n"
        );
    }

    #[test]
    fn test_render_multiline() {
        let reply = Reply::new(250, "", "mx.example.org Hello client\nSIZE 1024\n8BITMIME");
        assert_eq!(
            reply.to_string(),
            "250-mx.example.org Hello client\r\n250-SIZE 1024\r\n250 8BITMIME\r\n"
        );
    }

    #[test]
    fn test_rejection_table() {
        let cases = [
            (Rejection::BadConnection, 554, "5.7.1"),
            (Rejection::AddressSyntax("x".into()), 501, "5.1.3"),
            (Rejection::UnrecognizedSystem("x".into()), 550, "5.1.2"),
            (Rejection::MailboxDisabled, 550, "5.2.1"),
            (Rejection::MailboxMisconfigured("x".into()), 550, "5.3.5"),
            (Rejection::TooManyRecipients, 452, "4.5.3"),
            (Rejection::BadSequence, 503, "5.5.1"),
            (Rejection::AuthNotSupported, 502, "5.5.1"),
            (Rejection::MessageTooLarge, 552, "5.3.4"),
            (Rejection::MalformedBody("x".into()), 550, "5.6.0"),
            (Rejection::SpfSoftFail, 550, "5.7.23"),
            (Rejection::SpfPermError, 550, "5.7.24"),
            (Rejection::SpfTempError, 451, "4.7.24"),
            (Rejection::DkimFailure { temporary: false }, 550, "5.7.20"),
            (Rejection::DmarcPolicy, 550, "5.7.26"),
            (Rejection::Temporary("db down".into()), 451, "4.3.0"),
            (Rejection::Timeout, 421, "4.4.2"),
            (Rejection::TooManyErrors, 421, "4.7.0"),
        ];

        for (rejection, code, enhanced) in cases {
            let reply = Reply::from(&rejection);
            assert_eq!((reply.code, reply.enhanced), (code, enhanced), "{:?}", rejection);
        }
    }

    #[test]
    fn test_temporary_class_matches_rejection() {
        for rejection in [
            Rejection::SpfTempError,
            Rejection::Temporary("x".into()),
            Rejection::DkimFailure { temporary: true },
            Rejection::SpfFail,
            Rejection::MailboxNotFound,
        ] {
            assert_eq!(
                Reply::from(&rejection).is_temporary(),
                rejection.is_temporary(),
                "{:?}",
                rejection
            );
        }
    }

    #[test]
    fn test_temporary_hides_detail() {
        let reply = Reply::from(Rejection::Temporary("sqlite locked at /var/db".into()));
        assert!(!reply.text.contains("sqlite"));
    }
}
