//! ingest-rs: inbound SMTP ingress for mailing lists
//!
//! Accepts mail addressed to `<owner><sep><list>@<namespace domain>`,
//! authenticates the sender (SPF at `MAIL FROM`, then header-From
//! alignment, DKIM and DMARC over the message), applies the list's sender
//! policy and hands the message to storage and the delivery event bus
//! exactly once per (list, Message-ID).
//!
//! # Example
//!
//! ```no_run
//! use ingest_rs::authentication::{system_resolver, DkimValidator, SpfValidator};
//! use ingest_rs::bus::MemoryBus;
//! use ingest_rs::config::Config;
//! use ingest_rs::engine::{Collaborators, Engine};
//! use ingest_rs::repository::MemoryRepository;
//! use ingest_rs::smtp::SmtpServer;
//! use ingest_rs::storage::MemoryBlobStore;
//! use ingest_rs::utils::DnsTxtResolver;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = Arc::new(MemoryRepository::new());
//!     let resolver = system_resolver()?;
//!     let engine = Engine::new(
//!         Config::default(),
//!         Collaborators {
//!             directory: repository.clone(),
//!             lists: repository,
//!             blobs: Arc::new(MemoryBlobStore::new()),
//!             bus: Arc::new(MemoryBus::new()),
//!             spf: Arc::new(SpfValidator::new(resolver.clone())),
//!             dkim: Arc::new(DkimValidator::new(resolver)),
//!             txt: Arc::new(DnsTxtResolver::new()),
//!         },
//!     );
//!
//!     SmtpServer::new(Arc::new(engine)).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Internal errors and the protocol-facing rejection set
//! - [`utils`]: Address parsing and DNS TXT lookups
//! - [`repository`]: Identity, authorization and list repositories
//! - [`storage`]: Message blob storage
//! - [`bus`]: Delivery event bus
//! - [`lists`]: Recipient resolution and sender policy
//! - [`authentication`]: SPF, DKIM and DMARC
//! - [`ingest`]: Idempotent ingestion pipeline
//! - [`engine`]: Component wiring
//! - [`smtp`]: SMTP protocol implementation

pub mod authentication;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod lists;
pub mod repository;
pub mod smtp;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{IngestError, Rejection, Result};
