use crate::error::Rejection;

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// Reverse path (empty for `<>`) and its ESMTP parameters
    MailFrom { address: String, params: Vec<String> },
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    Auth,
    Starttls,
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self, Rejection> {
        let line = line.trim();
        if line.is_empty() {
            return Err(Rejection::SyntaxError("empty command".to_string()));
        }

        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command.to_uppercase(), args.trim()),
            None => (line.to_uppercase(), ""),
        };

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(Rejection::SyntaxError("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(Rejection::SyntaxError("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "MAIL" => {
                let rest = strip_keyword(args, "FROM:")
                    .ok_or_else(|| Rejection::SyntaxError("expected MAIL FROM:<address>".to_string()))?;
                let (address, params) = parse_path(rest)?;
                Ok(SmtpCommand::MailFrom { address, params })
            }
            "RCPT" => {
                let rest = strip_keyword(args, "TO:")
                    .ok_or_else(|| Rejection::SyntaxError("expected RCPT TO:<address>".to_string()))?;
                let (address, _) = parse_path(rest)?;
                Ok(SmtpCommand::RcptTo(address))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            "AUTH" => Ok(SmtpCommand::Auth),
            "STARTTLS" => Ok(SmtpCommand::Starttls),
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }
}

/// Value of a `KEY=value` ESMTP parameter, matched case-insensitively
pub fn param_value<'a>(params: &'a [String], key: &str) -> Option<&'a str> {
    params.iter().find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.eq_ignore_ascii_case(key).then_some(value)
    })
}

fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let head = args.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(args[keyword.len()..].trim_start())
    } else {
        None
    }
}

/// Split `<path> PARAM PARAM` into the bare path and its parameters.
fn parse_path(rest: &str) -> Result<(String, Vec<String>), Rejection> {
    let (path, params) = if let Some(inner) = rest.strip_prefix('<') {
        let end = inner
            .find('>')
            .ok_or_else(|| Rejection::SyntaxError("unterminated path".to_string()))?;
        (&inner[..end], &inner[end + 1..])
    } else {
        match rest.split_once(char::is_whitespace) {
            Some((path, params)) => (path, params),
            None => (rest, ""),
        }
    };

    let params = params.split_whitespace().map(str::to_string).collect();
    Ok((path.trim().to_string(), params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helo() {
        let cmd = SmtpCommand::parse("HELO example.com").unwrap();
        assert_eq!(cmd, SmtpCommand::Helo("example.com".to_string()));
    }

    #[test]
    fn test_parse_ehlo_requires_domain() {
        assert!(matches!(
            SmtpCommand::parse("EHLO"),
            Err(Rejection::SyntaxError(_))
        ));
    }

    #[test]
    fn test_parse_mail_from_with_params() {
        let cmd = SmtpCommand::parse("mail from:<alice@example.com> SIZE=1024 BODY=8BITMIME").unwrap();
        match cmd {
            SmtpCommand::MailFrom { address, params } => {
                assert_eq!(address, "alice@example.com");
                assert_eq!(param_value(&params, "size"), Some("1024"));
                assert_eq!(param_value(&params, "BODY"), Some("8BITMIME"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_null_reverse_path() {
        let cmd = SmtpCommand::parse("MAIL FROM:<>").unwrap();
        assert_eq!(
            cmd,
            SmtpCommand::MailFrom {
                address: String::new(),
                params: vec![]
            }
        );
    }

    #[test]
    fn test_parse_rcpt_to() {
        let cmd = SmtpCommand::parse("RCPT TO: <bob.announce@lists.example.org>").unwrap();
        assert_eq!(
            cmd,
            SmtpCommand::RcptTo("bob.announce@lists.example.org".to_string())
        );
    }

    #[test]
    fn test_parse_bad_keyword() {
        assert!(SmtpCommand::parse("RCPT FROM:<a@b.c>").is_err());
        assert!(SmtpCommand::parse("MAIL FROM:<a@b.c").is_err());
    }

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(SmtpCommand::parse("DATA").unwrap(), SmtpCommand::Data);
        assert_eq!(SmtpCommand::parse("quit").unwrap(), SmtpCommand::Quit);
        assert_eq!(SmtpCommand::parse("AUTH PLAIN xyz").unwrap(), SmtpCommand::Auth);
        assert_eq!(
            SmtpCommand::parse("VRFY bob").unwrap(),
            SmtpCommand::Unknown("VRFY".to_string())
        );
    }
}
