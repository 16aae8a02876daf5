//! Idempotent ingestion of authenticated messages
//!
//! Per (list id, message id):
//!
//! - no record: store blob, insert record, publish, mark processed
//! - unprocessed record: publish, mark processed
//! - processed record: nothing
//!
//! A unique violation on insert means a concurrent delivery of the same
//! message won the race; this transaction still publishes and marks.
//! The processed flag is only set after the event is out, so a record left
//! unprocessed by a crash is picked up by the next duplicate delivery or by
//! the [`reconcile`] sweep.

pub mod reconcile;

pub use reconcile::Reconciler;

use crate::authentication::VerifiedMessage;
use crate::bus::{DeliveryEvent, EventBus};
use crate::error::{IngestError, Rejection, Result};
use crate::lists::ListTarget;
use crate::repository::{ListRepository, MessageRecord};
use crate::storage::BlobStore;
use crate::utils::bounded;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What happened to a message handed to [`IngestPipeline::ingest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting: stored, recorded and published
    Stored,
    /// A previous attempt left the record unprocessed; republished
    Resumed,
    /// Already processed; nothing done
    Duplicate,
}

/// Blob key for a message id: URL-safe base64 without padding
pub fn blob_key(message_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(message_id.as_bytes())
}

pub struct IngestPipeline {
    lists: Arc<dyn ListRepository>,
    blobs: Arc<dyn BlobStore>,
    bus: Arc<dyn EventBus>,
    channel: String,
    lookup_timeout: Duration,
    bookkeeping_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(
        lists: Arc<dyn ListRepository>,
        blobs: Arc<dyn BlobStore>,
        bus: Arc<dyn EventBus>,
        channel: impl Into<String>,
        lookup_timeout: Duration,
        bookkeeping_timeout: Duration,
    ) -> Self {
        Self {
            lists,
            blobs,
            bus,
            channel: channel.into(),
            lookup_timeout,
            bookkeeping_timeout,
        }
    }

    pub async fn ingest(
        &self,
        target: &ListTarget,
        msg: &VerifiedMessage,
    ) -> std::result::Result<IngestOutcome, Rejection> {
        let list_id = target.list_id;
        let message_id = msg.message_id.as_str();

        let outcome = match bounded(
            self.lookup_timeout,
            "message lookup",
            self.lists.get_msg(list_id, message_id),
        )
        .await
        {
            Ok(record) if record.processed => {
                info!(%list_id, "Message {} already processed", message_id);
                return Ok(IngestOutcome::Duplicate);
            }
            Ok(_) => {
                info!(%list_id, "Resuming unprocessed message {}", message_id);
                IngestOutcome::Resumed
            }
            Err(IngestError::NotFound(_)) => {
                self.store(target, msg).await?;
                IngestOutcome::Stored
            }
            Err(e) => {
                error!(%list_id, "Message lookup for {} failed: {}", message_id, e);
                return Err(e.into());
            }
        };

        publish_event(
            self.bus.as_ref(),
            &self.channel,
            list_id,
            message_id,
            self.lookup_timeout,
        )
        .await?;

        self.mark_processed(list_id, message_id).await;
        Ok(outcome)
    }

    /// Blob first, then the record. The blob store keeps the first blob
    /// for a key, so a late racer cannot replace a processed message. A
    /// unique violation on the record is a lost race, not a failure.
    async fn store(&self, target: &ListTarget, msg: &VerifiedMessage) -> Result<()> {
        let list_id = target.list_id;
        let namespace = list_id.to_string();
        let key = blob_key(&msg.message_id);

        let headers = HashMap::from([
            ("message-id".to_string(), msg.message_id.clone()),
            ("list-id".to_string(), namespace.clone()),
            ("sender-id".to_string(), msg.sender_id.to_string()),
        ]);

        bounded(
            self.lookup_timeout,
            "blob store",
            self.blobs.put(
                &namespace,
                &key,
                &msg.content_type,
                msg.data.len(),
                &headers,
                &msg.data,
            ),
        )
        .await?;
        debug!(%list_id, "Stored blob {} for {}", key, msg.message_id);

        let record = MessageRecord {
            list_id,
            message_id: msg.message_id.clone(),
            sender_id: msg.sender_id,
            subject: msg.subject.clone(),
            spf_domain: msg.spf_domain.clone(),
            dkim_domain: msg.dkim_domain.clone(),
            in_reply_to: msg.in_reply_to.clone(),
            processed: false,
            created_at: chrono::Utc::now(),
        };

        match bounded(self.lookup_timeout, "message insert", self.lists.insert_msg(&record)).await {
            Ok(()) => Ok(()),
            Err(IngestError::UniqueViolation(_)) => {
                info!(
                    %list_id,
                    "Concurrent delivery already recorded {}, continuing",
                    msg.message_id
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort, detached from the session so a dropped connection does
    /// not cancel it. Failures are logged only.
    async fn mark_processed(&self, list_id: Uuid, message_id: &str) {
        let lists = self.lists.clone();
        let message_id = message_id.to_string();
        let timeout = self.bookkeeping_timeout;

        let task = tokio::spawn(async move {
            match bounded(timeout, "mark processed", lists.mark_msg_processed(list_id, &message_id)).await {
                Ok(()) => debug!(%list_id, "Marked {} processed", message_id),
                Err(e) => warn!(%list_id, "Failed to mark {} processed: {}", message_id, e),
            }
        });

        if let Err(e) = task.await {
            warn!(%list_id, "Mark-processed task failed: {}", e);
        }
    }
}

/// Publish the delivery event for one message
pub async fn publish_event(
    bus: &dyn EventBus,
    channel: &str,
    list_id: Uuid,
    message_id: &str,
    timeout: Duration,
) -> Result<()> {
    let payload = serde_json::to_vec(&DeliveryEvent {
        list_id,
        message_id: message_id.to_string(),
    })?;

    bounded(timeout, "event publish", bus.publish(channel, &payload)).await?;
    info!(%list_id, "Published delivery event for {}", message_id);
    Ok(())
}
