//! Per-message deletion with classified retry policy.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use crate::api::Message;
use crate::constants::{COOLDOWN_MULT, DEFAULT_BACKOFF_MS};
use crate::transport::retry_ms_from;

use super::Purger;

/// Classified outcome of one delete attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deleted, or already gone (404): the desired end state holds.
    Ok,
    /// Transient failure; worth another attempt.
    Retry,
    /// Counted as a failure; the run may or may not continue (401 also stops
    /// the run).
    Failed,
    /// Counted as a failure but skippable; the run continues past it.
    FailSkip,
}

impl Purger {
    /// Delete the current page's to-delete set in page order, waiting the
    /// configured delay between attempts regardless of outcome.
    pub(crate) async fn delete_pending(&mut self) {
        let messages = self.state.to_delete.clone();
        let max_attempts = self.options.max_attempts.max(1);
        let total = messages.len();
        for (i, message) in messages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Stopped by you!");
                self.state.running = false;
                return;
            }
            if !self.state.running {
                return;
            }
            debug!(
                position = %format!("{}/{total}", i + 1),
                timestamp = %message.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
                author = message.author_label(),
                content = %preview(message),
                id = %message.id,
                "Deleting message"
            );

            let mut attempt = 0u32;
            let mut deleted = false;
            loop {
                match self.delete_message(message).await {
                    DeleteOutcome::Retry => {
                        attempt += 1;
                        if attempt >= max_attempts {
                            break;
                        }
                        debug!(
                            wait_ms = self.options.delete_delay.as_millis(),
                            attempt,
                            max_attempts,
                            "Retrying delete"
                        );
                        sleep(self.options.delete_delay).await;
                    }
                    DeleteOutcome::Ok => {
                        deleted = true;
                        break;
                    }
                    DeleteOutcome::Failed | DeleteOutcome::FailSkip => {
                        break;
                    }
                }
            }
            if !deleted {
                warn!(id = %message.id, "Message not deleted");
            }

            self.stats.update_eta(
                self.state.grand_total,
                self.options.search_delay,
                self.options.delete_delay,
            );
            self.hooks.progress(&self.state, &self.stats);
            sleep(self.options.delete_delay).await;
        }
    }

    /// One scoped DELETE, classified per status.
    ///
    /// 404 counts as success (the message is gone either way). 429 ratchets
    /// the delete delay upward for the rest of the run and sleeps the extra
    /// cooldown margin before reporting `Retry`.
    pub(crate) async fn delete_message(&mut self, message: &Message) -> DeleteOutcome {
        let batch = self.options.batch_label();
        let url = self
            .endpoints
            .delete_message(&message.channel_id, &message.id);
        let sent_at = Instant::now();
        let resp = self.client.delete(url).await;
        self.stats.record_ping(sent_at.elapsed());

        let Some(resp) = resp else {
            warn!("{batch}Delete failed (network)");
            return DeleteOutcome::Retry;
        };

        if resp.status.is_success() {
            self.state.deleted += 1;
            return DeleteOutcome::Ok;
        }

        match resp.status.as_u16() {
            429 => {
                let wait = Duration::from_millis(retry_ms_from(&resp).unwrap_or_else(|| {
                    let delay = self.options.delete_delay.as_millis() as u64;
                    if delay > 0 {
                        delay
                    } else {
                        DEFAULT_BACKOFF_MS
                    }
                }));
                self.stats.record_throttle(wait);
                self.options.delete_delay = self.options.delete_delay.max(wait);
                warn!(
                    wait_ms = wait.as_millis(),
                    delete_delay_ms = self.options.delete_delay.as_millis(),
                    "{batch}429 Rate limited on delete"
                );
                self.log_stats();
                let cooldown = wait.mul_f64(COOLDOWN_MULT);
                debug!(cooldown_ms = cooldown.as_millis(), "Cooling down");
                sleep(cooldown).await;
                DeleteOutcome::Retry
            }
            401 => {
                let message = resp.api_message().unwrap_or_else(|| "Unauthorized".to_string());
                error!("{batch}401 {message}");
                self.state.running = false;
                self.state.failed += 1;
                DeleteOutcome::Failed
            }
            403 => {
                let message =
                    resp.api_message().unwrap_or_else(|| "Missing Permissions".to_string());
                error!("{batch}403 {message}");
                self.state.offset += 1;
                self.state.failed += 1;
                DeleteOutcome::FailSkip
            }
            404 => {
                let message =
                    resp.api_message().unwrap_or_else(|| "Unknown Message".to_string());
                warn!("{batch}404 {message}");
                self.state.deleted += 1;
                DeleteOutcome::Ok
            }
            400 => {
                // Includes the "thread is archived" case; skippable either way.
                let message = resp.api_message().unwrap_or_else(|| "Bad Request".to_string());
                warn!("{batch}400 {message}");
                self.state.offset += 1;
                self.state.failed += 1;
                DeleteOutcome::FailSkip
            }
            status if (400..500).contains(&status) => {
                let message = resp.api_message().unwrap_or_else(|| "Client error".to_string());
                warn!(status, "{batch}{message}");
                self.state.offset += 1;
                self.state.failed += 1;
                DeleteOutcome::FailSkip
            }
            status => {
                let message = resp.api_message().unwrap_or_else(|| "Server error".to_string());
                error!(status, "{batch}{message}");
                self.state.failed += 1;
                DeleteOutcome::Failed
            }
        }
    }
}

fn preview(message: &Message) -> String {
    let content = message.content.replace('\n', " ");
    if message.attachments.is_empty() {
        content
    } else {
        format!("{content} [ATTACHMENTS]")
    }
}
