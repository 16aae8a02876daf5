use super::publish_event;
use crate::bus::EventBus;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::repository::ListRepository;
use crate::utils::bounded;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodically republishes records that were inserted but never marked
/// processed, e.g. after a crash between insert and publish.
pub struct Reconciler {
    lists: Arc<dyn ListRepository>,
    bus: Arc<dyn EventBus>,
    channel: String,
    interval: Duration,
    grace: chrono::Duration,
    batch: usize,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        lists: Arc<dyn ListRepository>,
        bus: Arc<dyn EventBus>,
        channel: impl Into<String>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            lists,
            bus,
            channel: channel.into(),
            interval: Duration::from_secs(config.reconcile_interval_secs.max(1)),
            grace: chrono::Duration::seconds(config.reconcile_grace_secs as i64),
            batch: config.reconcile_batch.max(1),
            call_timeout: Duration::from_secs(config.bookkeeping_timeout_secs),
        }
    }

    /// One sweep; returns how many records were completed
    pub async fn run_once(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now() - self.grace;
        let pending = bounded(
            self.call_timeout,
            "unprocessed scan",
            self.lists.unprocessed_msgs(cutoff, self.batch),
        )
        .await?;

        if pending.is_empty() {
            debug!("Reconciliation found nothing to do");
            return Ok(0);
        }

        let mut completed = 0;
        for record in pending {
            if let Err(e) = publish_event(
                self.bus.as_ref(),
                &self.channel,
                record.list_id,
                &record.message_id,
                self.call_timeout,
            )
            .await
            {
                warn!(list_id = %record.list_id, "Republish of {} failed: {}", record.message_id, e);
                continue;
            }

            match bounded(
                self.call_timeout,
                "mark processed",
                self.lists.mark_msg_processed(record.list_id, &record.message_id),
            )
            .await
            {
                Ok(()) => completed += 1,
                Err(e) => warn!(
                    list_id = %record.list_id,
                    "Failed to mark {} processed: {}",
                    record.message_id,
                    e
                ),
            }
        }

        info!("Reconciliation completed {} records", completed);
        Ok(completed)
    }

    /// Sweep forever at the configured interval
    pub async fn run(self) {
        info!("Reconciliation sweep every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("Reconciliation sweep failed: {}", e);
            }
        }
    }
}
