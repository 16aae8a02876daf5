//! Shared harness: an SMTP server on a loopback port backed by in-memory
//! collaborators and scripted SPF, DKIM and DNS answers.

#![allow(dead_code)]

use async_trait::async_trait;
use ingest_rs::authentication::{
    AuthenticationStatus, DkimSignatureResult, DkimVerifier, SpfVerifier,
};
use ingest_rs::bus::{DeliveryEvent, MemoryBus};
use ingest_rs::config::Config;
use ingest_rs::engine::{Collaborators, Engine};
use ingest_rs::repository::{List, MemoryRepository, User};
use ingest_rs::smtp::SmtpServer;
use ingest_rs::storage::MemoryBlobStore;
use ingest_rs::utils::TxtResolver;
use ingest_rs::Result;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const LIST_ADDRESS: &str = "bob.announce@lists.example.org";

/// SPF verdict per envelope domain; unknown domains pass
#[derive(Default)]
pub struct ScriptedSpf(pub HashMap<String, AuthenticationStatus>);

#[async_trait]
impl SpfVerifier for ScriptedSpf {
    async fn verify(
        &self,
        _client_ip: IpAddr,
        _helo: &str,
        domain: &str,
        _sender: &str,
    ) -> Result<AuthenticationStatus> {
        Ok(self
            .0
            .get(domain)
            .copied()
            .unwrap_or(AuthenticationStatus::Pass))
    }
}

/// The same signature results for every message
#[derive(Default)]
pub struct ScriptedDkim(pub Vec<DkimSignatureResult>);

impl ScriptedDkim {
    pub fn single(status: AuthenticationStatus, domain: &str) -> Self {
        Self(vec![DkimSignatureResult {
            status,
            domain: domain.to_string(),
            selector: "s1".to_string(),
        }])
    }
}

#[async_trait]
impl DkimVerifier for ScriptedDkim {
    async fn verify(&self, _message: &[u8]) -> Result<Vec<DkimSignatureResult>> {
        Ok(self.0.clone())
    }
}

/// TXT records by name
#[derive(Default)]
pub struct ScriptedTxt(pub HashMap<String, Vec<String>>);

impl ScriptedTxt {
    pub fn dmarc(domain: &str, record: &str) -> Self {
        let mut records = HashMap::new();
        records.insert(format!("_dmarc.{}", domain), vec![record.to_string()]);
        Self(records)
    }
}

#[async_trait]
impl TxtResolver for ScriptedTxt {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.0.get(name).cloned().unwrap_or_default())
    }
}

/// Authentication answers a test scripts before starting the server
#[derive(Default)]
pub struct Script {
    pub spf: ScriptedSpf,
    pub dkim: ScriptedDkim,
    pub txt: ScriptedTxt,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.hostname = "mx.example.org".to_string();
    config.server.instance_id = "ingest-test".to_string();
    config.namespaces.user_domain = "lists.example.org".to_string();
    config.namespaces.org_domain = "orgs.example.org".to_string();
    config.smtp.max_message_size = 64 * 1024;
    config.authentication.lookup_timeout_secs = 5;
    config
}

pub struct Harness {
    pub addr: SocketAddr,
    pub repo: MemoryRepository,
    pub blobs: MemoryBlobStore,
    pub bus: MemoryBus,
    pub alice: User,
    pub bob: User,
    /// `bob.announce`, policy `user`
    pub announce: List,
}

impl Harness {
    pub async fn start(script: Script) -> Self {
        Self::start_with(test_config(), script).await
    }

    pub async fn start_with(config: Config, script: Script) -> Self {
        let repo = MemoryRepository::new();
        let alice = repo.add_user("alice", "alice@example.com").await;
        let bob = repo.add_user("bob", "bob@example.org").await;
        let announce = repo.add_list(bob.id, "announce", "user").await;

        let blobs = MemoryBlobStore::new();
        let bus = MemoryBus::new();

        let engine = Engine::new(
            config,
            Collaborators {
                directory: Arc::new(repo.clone()),
                lists: Arc::new(repo.clone()),
                blobs: Arc::new(blobs.clone()),
                bus: Arc::new(bus.clone()),
                spf: Arc::new(script.spf),
                dkim: Arc::new(script.dkim),
                txt: Arc::new(script.txt),
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = SmtpServer::new(Arc::new(engine));
        tokio::spawn(async move { server.serve(listener).await });

        Self {
            addr,
            repo,
            blobs,
            bus,
            alice,
            bob,
            announce,
        }
    }

    /// Connect and consume the greeting
    pub async fn connect(&self) -> SmtpClient {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let mut client = SmtpClient {
            stream: BufReader::new(stream),
        };
        let greeting = client.reply().await;
        assert!(greeting.starts_with("220 "), "greeting: {}", greeting);
        client
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.bus
            .published()
            .into_iter()
            .map(|(_, payload)| serde_json::from_slice(&payload).unwrap())
            .collect()
    }
}

pub struct SmtpClient {
    stream: BufReader<TcpStream>,
}

impl SmtpClient {
    /// Read one complete (possibly multi-line) reply
    pub async fn reply(&mut self) -> String {
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

    pub async fn command(&mut self, line: &str) -> String {
        self.stream
            .get_mut()
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
        self.reply().await
    }

    /// `DATA`, the content (already dot-stuffed), and the final dot
    pub async fn data(&mut self, message: &str) -> String {
        let reply = self.command("DATA").await;
        if !reply.starts_with("354") {
            return reply;
        }
        self.stream
            .get_mut()
            .write_all(format!("{}.\r\n", message).as_bytes())
            .await
            .unwrap();
        self.reply().await
    }

    /// EHLO, MAIL, RCPT and DATA; returns the reply to the final dot, or
    /// the first refusal.
    pub async fn send_mail(&mut self, from: &str, to: &str, message: &str) -> String {
        let reply = self.command("EHLO mail.example.com").await;
        assert!(reply.starts_with("250"), "EHLO: {}", reply);

        let reply = self.command(&format!("MAIL FROM:<{}>", from)).await;
        if !reply.starts_with("250") {
            return reply;
        }
        let reply = self.command(&format!("RCPT TO:<{}>", to)).await;
        if !reply.starts_with("250") {
            return reply;
        }
        self.data(message).await
    }
}

/// A well-formed message from `from` with the given Message-ID
pub fn message(from: &str, message_id: &str) -> String {
    format!(
        "From: Alice <{}>\r\n\
         To: {}\r\n\
         Subject: Launch day\r\n\
         Message-ID: <{}>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Hello list\r\n\
         ..signature line\r\n",
        from, LIST_ADDRESS, message_id
    )
}
