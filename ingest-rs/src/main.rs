use anyhow::Context;
use clap::Parser;
use ingest_rs::authentication::{system_resolver, DkimValidator, SpfValidator};
use ingest_rs::bus::{EventBus, MemoryBus, WebhookBus};
use ingest_rs::config::Config;
use ingest_rs::engine::{Collaborators, Engine};
use ingest_rs::repository::SqliteRepository;
use ingest_rs::smtp::SmtpServer;
use ingest_rs::storage::FilesystemBlobStore;
use ingest_rs::utils::DnsTxtResolver;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ingest-rs")]
#[command(about = "Inbound SMTP ingress for mailing lists", long_about = None)]
struct Cli {
    /// Configuration file (TOML); INGEST__SECTION__KEY variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let layer = fmt::layer();
    let layer = match config.logging.format.as_str() {
        "json" => layer.json().boxed(),
        _ => layer.pretty().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config);

    info!("Starting ingest-rs");
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  User lists: *@{}", config.namespaces.user_domain);
    info!("  Organization lists: *@{}", config.namespaces.org_domain);
    info!("  Blob path: {}", config.storage.blob_path);

    let repository = Arc::new(
        SqliteRepository::new(&config.storage.database_url)
            .await
            .context("Failed to open database")?,
    );

    let bus: Arc<dyn EventBus> = match &config.bus.webhook_url {
        Some(url) => {
            info!("  Delivery events: POST {}/{}", url, config.bus.channel);
            Arc::new(WebhookBus::new(url.clone())?)
        }
        None => {
            warn!("No bus.webhook_url configured, delivery events stay in process");
            Arc::new(MemoryBus::new())
        }
    };

    let resolver = system_resolver()?;
    let collaborators = Collaborators {
        directory: repository.clone(),
        lists: repository,
        blobs: Arc::new(FilesystemBlobStore::new(&config.storage.blob_path)),
        bus,
        spf: Arc::new(SpfValidator::new(resolver.clone())),
        dkim: Arc::new(DkimValidator::new(resolver)),
        txt: Arc::new(DnsTxtResolver::new()),
    };

    let engine = Arc::new(Engine::new(config, collaborators));

    let reconciler = engine.reconciler();
    let reconcile_handle = tokio::spawn(reconciler.run());

    let server = SmtpServer::new(engine);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("SMTP server error: {}", e);
                return Err(e.into());
            }
        }
        result = reconcile_handle => {
            error!("Reconciliation task exited: {:?}", result);
        }
    }

    Ok(())
}
