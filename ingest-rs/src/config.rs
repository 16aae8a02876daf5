use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub namespaces: NamespaceConfig,
    pub authentication: AuthenticationConfig,
    pub storage: StorageConfig,
    pub bus: BusConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name used as authserv-id and in the `by` clause of Received headers
    pub hostname: String,
    /// Identifies this process in Received headers
    pub instance_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub listen_addr: String,
    pub max_message_size: usize,
    pub command_timeout_secs: u64,
    pub data_timeout_secs: u64,
    /// Errors tolerated before the connection is dropped
    pub max_errors: usize,
}

/// The two recipient domains this ingress accepts mail for.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// `<user><sep><list>@user_domain` addresses lists owned by a user
    pub user_domain: String,
    /// `<org><sep><list>@org_domain` addresses lists owned by an organization
    pub org_domain: String,
    pub separator: char,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// Upper bound for each DNS or repository round trip
    pub lookup_timeout_secs: u64,
    /// Reject messages carrying no passing DKIM signature
    pub dkim_require_pass: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blob_path: String,
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub channel: String,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Budget for bookkeeping that must finish even if the client goes away
    pub bookkeeping_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Unprocessed records younger than this are left to their own transaction
    pub reconcile_grace_secs: u64,
    pub reconcile_batch: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Layer an optional TOML file and `INGEST__SECTION__KEY` environment
    /// variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix("INGEST")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| IngestError::Config(e.to_string()))
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.authentication.lookup_timeout_secs)
    }

    pub fn bookkeeping_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.bookkeeping_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "mx.localhost".to_string(),
            instance_id: gethostname::gethostname().to_string_lossy().to_string(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2525".to_string(),
            max_message_size: 25 * 1024 * 1024, // 25MB
            command_timeout_secs: 300,
            data_timeout_secs: 600,
            max_errors: 10,
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            user_domain: "lists.localhost".to_string(),
            org_domain: "orgs.localhost".to_string(),
            separator: '.',
        }
    }
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_secs: 30,
            dkim_require_pass: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_path: "/tmp/ingest-blobs".to_string(),
            database_url: "sqlite://ingest.db?mode=rwc".to_string(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: "list-delivery".to_string(),
            webhook_url: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bookkeeping_timeout_secs: 30,
            reconcile_interval_secs: 300,
            reconcile_grace_secs: 600,
            reconcile_batch: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
