//! Event bus carrying delivery events to the fan-out workers
//!
//! - [`webhook`]: HTTP POST per event
//! - [`memory`]: in-process recorder with a broadcast feed

pub mod memory;
pub mod webhook;

pub use memory::MemoryBus;
pub use webhook::WebhookBus;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published once a message is durably stored for a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub list_id: Uuid,
    pub message_id: String,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;
}
