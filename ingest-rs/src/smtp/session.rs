use crate::authentication::{Envelope, SpfCheck};
use crate::engine::Engine;
use crate::error::{Rejection, Result};
use crate::lists::ListTarget;
use crate::smtp::commands::{param_value, SmtpCommand};
use crate::smtp::reply::Reply;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Maximum line length in SMTP protocol (RFC 5321), CRLF included
pub const MAX_LINE_LENGTH: usize = 1000;

/// The envelope sender of an open transaction
#[derive(Debug, Clone)]
struct Sender {
    request_id: u64,
    spf: SpfCheck,
}

/// Where the session is in the command sequence.
///
/// Every transaction field lives in the variant that makes it valid, so a
/// recipient cannot be read before `RCPT` succeeded.
#[derive(Debug, Clone)]
enum SessionState {
    Connected,
    /// Greeted with the given HELO/EHLO name
    Ready(String),
    MailFrom(Sender),
    Recipient(Sender, ListTarget),
    /// `354` sent, message content comes next
    Data(Sender, ListTarget),
}

impl SessionState {
    fn helo(&self) -> Option<&str> {
        match self {
            SessionState::Connected => None,
            SessionState::Ready(helo) => Some(helo),
            SessionState::MailFrom(sender)
            | SessionState::Recipient(sender, _)
            | SessionState::Data(sender, _) => Some(&sender.spf.helo),
        }
    }
}

enum Input {
    Line,
    TooLong,
    Closed,
}

enum Flow {
    Continue,
    Close,
}

/// One inbound SMTP connection
pub struct SmtpSession {
    engine: Arc<Engine>,
    client_ip: IpAddr,
    state: SessionState,
    error_count: usize,
}

impl SmtpSession {
    pub fn new(engine: Arc<Engine>, client_ip: IpAddr) -> Self {
        Self {
            engine,
            client_ip,
            state: SessionState::Connected,
            error_count: 0,
        }
    }

    /// Run the session until QUIT, disconnect, timeout or too many errors.
    pub async fn handle<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let smtp = self.engine.config().smtp.clone();
        let command_timeout = Duration::from_secs(smtp.command_timeout_secs);
        let mut stream = BufReader::new(stream);

        let greeting = Reply::new(
            220,
            "",
            format!("{} ESMTP ready", self.engine.config().server.hostname),
        );
        send(&mut stream, &greeting).await?;

        let mut line = Vec::new();
        loop {
            if self.error_count >= smtp.max_errors {
                warn!("Too many errors, disconnecting");
                send(&mut stream, &Reply::from(Rejection::TooManyErrors)).await?;
                break;
            }

            let input = match timeout(command_timeout, read_line(&mut stream, &mut line)).await {
                Ok(input) => input?,
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    send(&mut stream, &Reply::from(Rejection::Timeout)).await?;
                    break;
                }
            };

            match input {
                Input::Closed => {
                    debug!("Client disconnected");
                    break;
                }
                Input::TooLong => {
                    let reply = self.rejected(Rejection::SyntaxError("line too long".to_string()));
                    send(&mut stream, &reply).await?;
                    continue;
                }
                Input::Line => {}
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();
            debug!("Received: {}", text);

            let reply = match SmtpCommand::parse(text) {
                Ok(command) => match self.handle_command(command).await {
                    Ok(reply) => reply,
                    Err(rejection) => self.rejected(rejection),
                },
                Err(rejection) => self.rejected(rejection),
            };
            send(&mut stream, &reply).await?;

            if reply.code == 221 {
                break;
            }

            if matches!(self.state, SessionState::Data(..)) {
                if let Flow::Close = self.receive_data(&mut stream).await? {
                    break;
                }
            }
        }

        stream.flush().await?;
        Ok(())
    }

    async fn handle_command(
        &mut self,
        command: SmtpCommand,
    ) -> std::result::Result<Reply, Rejection> {
        let hostname = &self.engine.config().server.hostname;

        match command {
            SmtpCommand::Helo(domain) => {
                info!("HELO from {}", domain);
                let reply = Reply::new(250, "", format!("{} Hello {}", hostname, domain));
                self.state = SessionState::Ready(domain);
                Ok(reply)
            }
            SmtpCommand::Ehlo(domain) => {
                info!("EHLO from {}", domain);
                let reply = Reply::new(
                    250,
                    "",
                    format!(
                        "{} Hello {}\nSIZE {}\n8BITMIME\nENHANCEDSTATUSCODES",
                        hostname,
                        domain,
                        self.engine.config().smtp.max_message_size
                    ),
                );
                self.state = SessionState::Ready(domain);
                Ok(reply)
            }
            SmtpCommand::MailFrom { address, params } => {
                let helo = match &self.state {
                    SessionState::Ready(helo) => helo.clone(),
                    _ => return Err(Rejection::BadSequence),
                };

                if let Some(size) = param_value(&params, "SIZE") {
                    let size: usize = size
                        .parse()
                        .map_err(|_| {
                            Rejection::SyntaxError("invalid SIZE parameter".to_string())
                        })?;
                    if size > self.engine.config().smtp.max_message_size {
                        return Err(Rejection::MessageTooLarge);
                    }
                }

                let request_id = self.engine.next_request_id();
                info!(
                    request_id,
                    client_ip = %self.client_ip,
                    "MAIL FROM: <{}>",
                    address
                );

                let spf = self
                    .engine
                    .check_sender(self.client_ip, &helo, &address)
                    .await?;
                debug!(request_id, "SPF {} for {}", spf.status, spf.domain);

                self.state = SessionState::MailFrom(Sender { request_id, spf });
                Ok(Reply::new(250, "2.1.0", "Sender OK"))
            }
            SmtpCommand::RcptTo(address) => {
                let sender = match &self.state {
                    SessionState::MailFrom(sender) => sender.clone(),
                    SessionState::Recipient(..) => return Err(Rejection::TooManyRecipients),
                    _ => return Err(Rejection::BadSequence),
                };

                info!(request_id = sender.request_id, "RCPT TO: <{}>", address);
                let target = self.engine.resolve_recipient(&address).await?;
                info!(
                    request_id = sender.request_id,
                    list_id = %target.list_id,
                    "Recipient resolved to {} list {}",
                    target.namespace,
                    target.list_name
                );

                self.state = SessionState::Recipient(sender, target);
                Ok(Reply::new(250, "2.1.5", "Recipient OK"))
            }
            SmtpCommand::Data => {
                match std::mem::replace(&mut self.state, SessionState::Connected) {
                    SessionState::Recipient(sender, target) => {
                        debug!(request_id = sender.request_id, "DATA");
                        self.state = SessionState::Data(sender, target);
                        Ok(Reply::new(354, "", "Start mail input; end with <CRLF>.<CRLF>"))
                    }
                    other => {
                        self.state = other;
                        Err(Rejection::BadSequence)
                    }
                }
            }
            SmtpCommand::Rset => {
                debug!("RSET");
                self.state = match self.state.helo() {
                    Some(helo) => SessionState::Ready(helo.to_string()),
                    None => SessionState::Connected,
                };
                Ok(Reply::ok())
            }
            SmtpCommand::Noop => Ok(Reply::ok()),
            SmtpCommand::Quit => {
                info!("QUIT");
                Ok(Reply::new(221, "2.0.0", format!("{} closing connection", hostname)))
            }
            SmtpCommand::Auth => Err(Rejection::AuthNotSupported),
            SmtpCommand::Starttls => Err(Rejection::NotImplemented),
            SmtpCommand::Unknown(verb) => {
                debug!("Unknown command: {}", verb);
                Err(Rejection::NotImplemented)
            }
        }
    }

    /// Read the message up to the terminating dot, then authenticate and
    /// ingest it. Oversized content is drained and refused once complete.
    async fn receive_data<S>(&mut self, stream: &mut BufReader<S>) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (sender, target) = match std::mem::replace(&mut self.state, SessionState::Connected) {
            SessionState::Data(sender, target) => (sender, target),
            other => {
                self.state = other;
                return Ok(Flow::Continue);
            }
        };
        // Whatever the outcome, the transaction ends here
        self.state = SessionState::Ready(sender.spf.helo.clone());

        let smtp = &self.engine.config().smtp;
        let data_timeout = Duration::from_secs(smtp.data_timeout_secs);
        let max_message_size = smtp.max_message_size;

        let mut data = Vec::new();
        let mut refused: Option<Rejection> = None;
        let mut line = Vec::new();

        loop {
            let input = match timeout(data_timeout, read_line(stream, &mut line)).await {
                Ok(input) => input?,
                Err(_) => {
                    warn!(request_id = sender.request_id, "DATA timeout");
                    send(stream, &Reply::from(Rejection::Timeout)).await?;
                    return Ok(Flow::Close);
                }
            };

            match input {
                Input::Closed => {
                    warn!(request_id = sender.request_id, "Connection closed during DATA");
                    return Ok(Flow::Close);
                }
                Input::TooLong => {
                    refused.get_or_insert(Rejection::SyntaxError("line too long".to_string()));
                    continue;
                }
                Input::Line => {}
            }

            if line == b".\r\n" || line == b".\n" {
                break;
            }
            if refused.is_some() {
                continue;
            }

            // Transparency: a leading dot was doubled by the client
            let content = line.strip_prefix(b".").unwrap_or(&line[..]);
            if data.len() + content.len() > max_message_size {
                warn!(
                    request_id = sender.request_id,
                    "Message too large (max {} bytes)", max_message_size
                );
                refused = Some(Rejection::MessageTooLarge);
                data = Vec::new();
                continue;
            }
            data.extend_from_slice(content);
        }

        info!(
            request_id = sender.request_id,
            "End of DATA received, total size: {} bytes",
            data.len()
        );

        if let Some(rejection) = refused {
            let reply = self.rejected(rejection);
            send(stream, &reply).await?;
            return Ok(Flow::Continue);
        }
        if data.is_empty() {
            let reply = self.rejected(Rejection::MalformedBody("empty message".to_string()));
            send(stream, &reply).await?;
            return Ok(Flow::Continue);
        }

        let envelope = Envelope {
            request_id: sender.request_id,
            spf: &sender.spf,
            target: &target,
        };

        let reply = match self.engine.accept_message(envelope, &data).await {
            Ok(_) => Reply::new(250, "2.0.0", format!("OK id={:016x}", sender.request_id)),
            Err(rejection) => self.rejected(rejection),
        };
        send(stream, &reply).await?;

        Ok(Flow::Continue)
    }

    /// Count the failure and render it.
    fn rejected(&mut self, rejection: Rejection) -> Reply {
        self.error_count += 1;
        if rejection.is_temporary() {
            warn!(client_ip = %self.client_ip, "Temporary rejection: {}", rejection);
        } else {
            info!(client_ip = %self.client_ip, "Rejected: {}", rejection);
        }
        Reply::from(&rejection)
    }
}

async fn send<W>(stream: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(reply.to_string().as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one line, at most [`MAX_LINE_LENGTH`] octets. The remainder of a
/// longer line is consumed and discarded.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<Input>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', line)
        .await?;

    if n == 0 {
        return Ok(Input::Closed);
    }
    if line.ends_with(b"\n") || n < MAX_LINE_LENGTH {
        return Ok(Input::Line);
    }

    let mut discard = Vec::new();
    loop {
        discard.clear();
        let n = (&mut *reader)
            .take(MAX_LINE_LENGTH as u64)
            .read_until(b'\n', &mut discard)
            .await?;
        if n == 0 || discard.ends_with(b"\n") {
            return Ok(Input::TooLong);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{AuthenticationStatus, DkimSignatureResult, DkimVerifier, SpfVerifier};
    use crate::bus::MemoryBus;
    use crate::config::Config;
    use crate::engine::Collaborators;
    use crate::repository::MemoryRepository;
    use crate::storage::MemoryBlobStore;
    use crate::utils::TxtResolver;
    use async_trait::async_trait;
    use tokio::io::{duplex, DuplexStream};

    struct PassSpf;

    #[async_trait]
    impl SpfVerifier for PassSpf {
        async fn verify(&self, _: IpAddr, _: &str, _: &str, _: &str) -> Result<AuthenticationStatus> {
            Ok(AuthenticationStatus::Pass)
        }
    }

    struct NoDkim;

    #[async_trait]
    impl DkimVerifier for NoDkim {
        async fn verify(&self, _: &[u8]) -> Result<Vec<DkimSignatureResult>> {
            Ok(Vec::new())
        }
    }

    struct NoTxt;

    #[async_trait]
    impl TxtResolver for NoTxt {
        async fn lookup_txt(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn engine(config: Config) -> Arc<Engine> {
        let repo = Arc::new(MemoryRepository::new());
        Arc::new(Engine::new(
            config,
            Collaborators {
                directory: repo.clone(),
                lists: repo,
                blobs: Arc::new(MemoryBlobStore::new()),
                bus: Arc::new(MemoryBus::new()),
                spf: Arc::new(PassSpf),
                dkim: Arc::new(NoDkim),
                txt: Arc::new(NoTxt),
            },
        ))
    }

    struct Client {
        stream: BufReader<DuplexStream>,
    }

    impl Client {
        fn start(config: Config) -> Self {
            let (client, server) = duplex(64 * 1024);
            let session = SmtpSession::new(engine(config), "192.0.2.10".parse().unwrap());
            tokio::spawn(session.handle(server));
            Self {
                stream: BufReader::new(client),
            }
        }

        /// Read one complete (possibly multi-line) reply
        async fn reply(&mut self) -> String {
            let mut reply = String::new();
            loop {
                let mut line = String::new();
                if self.stream.read_line(&mut line).await.unwrap() == 0 {
                    return reply;
                }
                reply.push_str(&line);
                if line.as_bytes().get(3) != Some(&b'-') {
                    return reply;
                }
            }
        }

        async fn send(&mut self, line: &str) -> String {
            self.stream
                .get_mut()
                .write_all(format!("{}\r\n", line).as_bytes())
                .await
                .unwrap();
            self.reply().await
        }
    }

    #[tokio::test]
    async fn test_greeting_and_ehlo() {
        let mut client = Client::start(Config::default());
        assert!(client.reply().await.starts_with("220 "));

        let reply = client.send("EHLO client.example.com").await;
        assert!(reply.contains("250-SIZE"));
        assert!(reply.contains("250-8BITMIME"));
        assert!(reply.ends_with("250 ENHANCEDSTATUSCODES\r\n"));

        assert!(client.send("QUIT").await.starts_with("221 2.0.0"));
    }

    #[tokio::test]
    async fn test_mail_requires_helo() {
        let mut client = Client::start(Config::default());
        client.reply().await;
        assert!(client
            .send("MAIL FROM:<alice@example.com>")
            .await
            .starts_with("503 5.5.1"));
    }

    #[tokio::test]
    async fn test_sequence_errors() {
        let mut client = Client::start(Config::default());
        client.reply().await;
        client.send("HELO client.example.com").await;

        assert!(client
            .send("RCPT TO:<bob.announce@lists.localhost>")
            .await
            .starts_with("503 5.5.1"));
        assert!(client.send("DATA").await.starts_with("503 5.5.1"));

        assert!(client
            .send("MAIL FROM:<alice@example.com>")
            .await
            .starts_with("250 2.1.0"));
        assert!(client
            .send("MAIL FROM:<alice@example.com>")
            .await
            .starts_with("503 5.5.1"));
        assert!(client.send("DATA").await.starts_with("503 5.5.1"));
    }

    #[tokio::test]
    async fn test_rset_keeps_greeting() {
        let mut client = Client::start(Config::default());
        client.reply().await;
        client.send("HELO client.example.com").await;
        client.send("MAIL FROM:<alice@example.com>").await;

        assert!(client.send("RSET").await.starts_with("250 2.0.0"));
        assert!(client
            .send("MAIL FROM:<alice@example.com>")
            .await
            .starts_with("250 2.1.0"));
    }

    #[tokio::test]
    async fn test_null_sender_and_declared_size() {
        let mut config = Config::default();
        config.smtp.max_message_size = 1024;
        let mut client = Client::start(config);
        client.reply().await;
        client.send("EHLO client.example.com").await;

        assert!(client.send("MAIL FROM:<>").await.starts_with("501 5.1.3"));
        assert!(client
            .send("MAIL FROM:<alice@example.com> SIZE=4096")
            .await
            .starts_with("552 5.3.4"));
        assert!(client
            .send("MAIL FROM:<alice@example.com> SIZE=512")
            .await
            .starts_with("250 2.1.0"));
    }

    #[tokio::test]
    async fn test_unsupported_commands() {
        let mut client = Client::start(Config::default());
        client.reply().await;
        assert!(client.send("AUTH PLAIN AGFsaWNlAHNlY3JldA==").await.starts_with("502 5.5.1"));
        assert!(client.send("STARTTLS").await.starts_with("502 5.5.1"));
        assert!(client.send("VRFY bob").await.starts_with("502 5.5.1"));
        assert!(client.send("NOOP").await.starts_with("250 2.0.0"));
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let mut client = Client::start(Config::default());
        client.reply().await;
        let long = format!("NOOP {}", "x".repeat(MAX_LINE_LENGTH * 2));
        assert!(client.send(&long).await.starts_with("500 5.5.2"));
        assert!(client.send("NOOP").await.starts_with("250 2.0.0"));
    }

    #[tokio::test]
    async fn test_too_many_errors_closes() {
        let mut config = Config::default();
        config.smtp.max_errors = 2;
        let mut client = Client::start(config);
        client.reply().await;

        assert!(client.send("DATA").await.starts_with("503"));
        assert!(client.send("DATA").await.starts_with("503"));
        assert!(client.reply().await.starts_with("421 4.7.0"));
        assert_eq!(client.reply().await, "");
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mut config = Config::default();
        config.smtp.command_timeout_secs = 1;
        let mut client = Client::start(config);
        client.reply().await;

        assert!(client.reply().await.starts_with("421 4.4.2"));
    }
}
