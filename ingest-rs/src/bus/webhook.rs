use super::EventBus;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes by POSTing the payload to `<base_url>/<channel>`
pub struct WebhookBus {
    base_url: String,
    client: reqwest::Client,
}

impl WebhookBus {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| IngestError::Bus(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn channel_url(&self, channel: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), channel)
    }
}

#[async_trait]
impl EventBus for WebhookBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let url = self.channel_url(channel);
        debug!("Publishing {} bytes to {}", payload.len(), url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| IngestError::Bus(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Bus(format!(
                "POST {} returned {}",
                url,
                status.as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url() {
        let bus = WebhookBus::new("http://bus.internal:8080/events/").unwrap();
        assert_eq!(
            bus.channel_url("list-delivery"),
            "http://bus.internal:8080/events/list-delivery"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_bus_error() {
        let bus = WebhookBus::new("http://127.0.0.1:1").unwrap();
        let result = bus.publish("list-delivery", b"{}").await;
        assert!(matches!(result, Err(IngestError::Bus(_))));
    }
}
