use super::EventBus;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Records every published event and rebroadcasts it to subscribers
#[derive(Clone)]
pub struct MemoryBus {
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    tx: broadcast::Sender<(String, Vec<u8>)>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, Vec<u8>)> {
        self.tx.subscribe()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let event = (channel.to_string(), payload.to_vec());
        if let Ok(mut events) = self.published.lock() {
            events.push(event.clone());
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
        Ok(())
    }
}
