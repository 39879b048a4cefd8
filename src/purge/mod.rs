//! The search-filter-delete pipeline and its batch orchestrator.
//!
//! One [`Purger`] drives one target container at a time through repeated
//! pages of search results: search, filter, (confirm,) delete, advance the
//! cursor. Everything is strictly sequential; suspension happens only at
//! explicit wait points and cancellation is honored at loop boundaries.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod delete;
pub mod filter;
pub mod hooks;
pub mod stats;

pub use delete::DeleteOutcome;
pub use hooks::{ConfirmFn, ConfirmPrompt, HookFn, RunHooks};
pub use stats::{format_hms, RunStats};

use crate::api::{Endpoints, Message, SearchQuery, SearchResponse};
use crate::config::Config;
use crate::constants::{BATCH_SETTLE_MS, COOLDOWN_MULT, DEFAULT_BACKOFF_MS};
use crate::transport::{retry_ms_from, RestClient};

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("a run is already active")]
    AlreadyRunning,
}

/// The unit of work for one pipeline run. Optional fields override the
/// shared options when the orchestrator merges the target in.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub channel_id: String,
    pub author_id: Option<String>,
    pub content: Option<String>,
    pub has_link: Option<bool>,
    pub has_file: Option<bool>,
    pub include_pinned: Option<bool>,
    pub pattern: Option<String>,
}

impl Target {
    /// A target that only names a channel, inheriting all shared filters.
    #[must_use]
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Self::default()
        }
    }
}

/// Options for the current run. Delays ratchet upward when the server
/// rate-limits us and never come back down within a run.
#[derive(Debug, Clone)]
pub struct PurgeOptions {
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: Option<String>,
    pub content: Option<String>,
    pub has_link: bool,
    pub has_file: bool,
    pub include_pinned: bool,
    pub pattern: Option<String>,
    pub search_delay: Duration,
    pub delete_delay: Duration,
    pub max_attempts: u32,
    pub confirm: bool,
    batch_index: usize,
    batch_total: usize,
}

impl PurgeOptions {
    /// Derive run options from the loaded configuration and one channel id.
    #[must_use]
    pub fn from_config(config: &Config, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: config.guild_id.clone(),
            channel_id: channel_id.into(),
            author_id: config.author_id.clone(),
            content: config.content.clone(),
            has_link: config.has_link,
            has_file: config.has_file,
            include_pinned: config.include_pinned,
            pattern: config.pattern.clone(),
            search_delay: config.search_delay,
            delete_delay: config.delete_delay,
            max_attempts: config.max_attempts,
            confirm: config.confirm,
            batch_index: 0,
            batch_total: 0,
        }
    }

    fn apply_target(&mut self, target: Target, index: usize, total: usize) {
        self.channel_id = target.channel_id;
        if target.author_id.is_some() {
            self.author_id = target.author_id;
        }
        if target.content.is_some() {
            self.content = target.content;
        }
        if let Some(has_link) = target.has_link {
            self.has_link = has_link;
        }
        if let Some(has_file) = target.has_file {
            self.has_file = has_file;
        }
        if let Some(include_pinned) = target.include_pinned {
            self.include_pinned = include_pinned;
        }
        if target.pattern.is_some() {
            self.pattern = target.pattern;
        }
        self.batch_index = index;
        self.batch_total = total;
    }

    /// `[i/N]`-style label on batch runs, empty otherwise.
    fn batch_label(&self) -> String {
        if self.batch_total > 0 {
            format!("[{}/{}] ", self.batch_index, self.batch_total)
        } else {
            String::new()
        }
    }
}

/// Mutable, single-owner record of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub running: bool,
    pub deleted: u64,
    pub failed: u64,
    /// Largest total-results estimate observed; informational only.
    pub grand_total: u64,
    /// Count of messages skipped over after non-retryable delete failures.
    pub offset: u64,
    pub iterations: u64,
    pub to_delete: Vec<Message>,
    pub skipped: Vec<Message>,
}

impl RunState {
    /// Fraction of the grand total processed so far, for progress displays.
    #[must_use]
    pub fn progress_ratio(&self) -> f64 {
        if self.grand_total == 0 {
            0.0
        } else {
            ((self.deleted + self.failed) as f64 / self.grand_total as f64).min(1.0)
        }
    }

    /// Reset everything except `running` between batch targets.
    fn reset_for_next_target(&mut self) {
        let running = self.running;
        *self = Self::default();
        self.running = running;
    }
}

/// Summary of one single-container run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub deleted: u64,
    pub failed: u64,
}

/// Summary of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub targets: usize,
    pub targets_with_deletions: usize,
}

enum SearchOutcome {
    /// A usable page of results.
    Page(SearchResponse),
    /// This container is done (empty page, no access, or exhausted retries).
    EndContainer,
    /// The whole run must stop (401 or total transport failure).
    Fatal,
}

/// The rate-limited search-filter-delete engine.
pub struct Purger {
    client: RestClient,
    endpoints: Endpoints,
    pub options: PurgeOptions,
    pub state: RunState,
    pub stats: RunStats,
    pub hooks: RunHooks,
    pub confirm_fn: Option<ConfirmFn>,
    cancel: CancellationToken,
    pattern_warned: bool,
}

impl Purger {
    #[must_use]
    pub fn new(client: RestClient, endpoints: Endpoints, options: PurgeOptions) -> Self {
        Self {
            client,
            endpoints,
            options,
            state: RunState::default(),
            stats: RunStats::default(),
            hooks: RunHooks::default(),
            confirm_fn: None,
            cancel: CancellationToken::new(),
            pattern_warned: false,
        }
    }

    /// Token for cooperative cancellation. Cancelling stops the run at the
    /// next loop boundary; an in-flight request is not aborted but its result
    /// is discarded with respect to further work.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline against the single configured container.
    ///
    /// Honors interactive confirmation when `options.confirm` is set and a
    /// confirm callback is installed.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError::AlreadyRunning`] if a run is already active.
    pub async fn run(&mut self) -> Result<RunReport, PurgeError> {
        if self.state.running {
            error!("Already running!");
            return Err(PurgeError::AlreadyRunning);
        }
        self.state.running = true;
        self.stats.started_at = Utc::now();
        let started = Instant::now();
        info!(channel_id = %self.options.channel_id, "Run started");
        self.hooks.start(&self.state, &self.stats);

        self.run_target().await;

        info!(
            total_time = %format_hms(started.elapsed()),
            deleted = self.state.deleted,
            failed = self.state.failed,
            "Run ended"
        );
        self.log_stats();
        let report = RunReport {
            deleted: self.state.deleted,
            failed: self.state.failed,
        };
        self.state.running = false;
        self.hooks.stop(&self.state, &self.stats);
        Ok(report)
    }

    /// Run the pipeline across multiple containers in order.
    ///
    /// Interactive confirmation is disabled for the whole batch. Stops early
    /// only on cancellation or a fatal error, not on containers with zero
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns [`PurgeError::AlreadyRunning`] if a run is already active.
    pub async fn run_batch(&mut self, targets: Vec<Target>) -> Result<BatchReport, PurgeError> {
        if self.state.running {
            error!("Already running!");
            return Err(PurgeError::AlreadyRunning);
        }
        let total = targets.len();
        info!(channels = total, "Scanning channels");
        self.state.running = true;
        self.stats.started_at = Utc::now();
        self.hooks.start(&self.state, &self.stats);
        self.options.confirm = false;

        let mut with_deletions = 0usize;
        for (i, target) in targets.into_iter().enumerate() {
            if !self.state.running || self.cancel.is_cancelled() {
                break;
            }
            self.options.apply_target(target, i + 1, total);
            self.run_target().await;
            if !self.state.running {
                break;
            }
            if self.state.deleted > 0 {
                with_deletions += 1;
                info!(
                    batch = %self.options.batch_label(),
                    deleted = self.state.deleted,
                    processed = with_deletions,
                    "Channel done"
                );
            } else {
                info!(batch = %self.options.batch_label(), "No messages found");
            }
            self.state.reset_for_next_target();
            self.options.confirm = false;
            sleep(Duration::from_millis(BATCH_SETTLE_MS)).await;
        }

        info!(
            processed = with_deletions,
            total, "Batch finished"
        );
        let report = BatchReport {
            targets: total,
            targets_with_deletions: with_deletions,
        };
        self.state.running = false;
        self.hooks.stop(&self.state, &self.stats);
        Ok(report)
    }

    /// Drive one container to completion: the per-page loop of §search →
    /// filter → confirm → delete → advance.
    async fn run_target(&mut self) {
        let mut before: Option<String> = None;
        loop {
            if self.cancel.is_cancelled() {
                warn!("Stopped by you!");
                self.state.running = false;
                return;
            }
            self.state.iterations += 1;
            debug!("Fetching messages...");
            let page = match self.search(before.as_deref()).await {
                SearchOutcome::Page(page) => page,
                SearchOutcome::EndContainer => return,
                SearchOutcome::Fatal => {
                    self.state.running = false;
                    return;
                }
            };

            self.filter_page(page);
            debug!(
                grand_total = self.state.grand_total,
                to_delete = self.state.to_delete.len(),
                skipped = self.state.skipped.len(),
                "Page filtered"
            );
            self.log_stats();
            self.stats.update_eta(
                self.state.grand_total,
                self.options.search_delay,
                self.options.delete_delay,
            );
            debug!(eta = %format_hms(self.stats.eta), "Estimated time remaining");

            if !self.state.to_delete.is_empty() {
                if !self.confirm_pending() {
                    self.state.running = false;
                    return;
                }
                self.delete_pending().await;
                before = self.state.to_delete.last().map(|m| m.id.clone());
            } else if !self.state.skipped.is_empty() {
                before = self.state.skipped.last().map(|m| m.id.clone());
                debug!("Nothing to delete on this page, checking next...");
            } else {
                debug!("Ended because API returned empty page");
                return;
            }

            if before.is_none() {
                debug!("No more messages to paginate");
                return;
            }
            if !self.state.running || self.cancel.is_cancelled() {
                return;
            }
            debug!(
                wait_ms = self.options.search_delay.as_millis(),
                "Waiting before next page"
            );
            sleep(self.options.search_delay).await;
        }
    }

    /// Issue one search request, retrying throttled and indexing responses in
    /// place. The cursor is unchanged across retries.
    async fn search(&mut self, before: Option<&str>) -> SearchOutcome {
        let batch = self.options.batch_label();
        let mut decode_attempts = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                warn!("Stopped by you!");
                return SearchOutcome::Fatal;
            }
            let url = self.endpoints.search(&SearchQuery {
                guild_id: &self.options.guild_id,
                channel_id: &self.options.channel_id,
                author_id: self.options.author_id.as_deref(),
                content: self.options.content.as_deref(),
                has_link: self.options.has_link,
                has_file: self.options.has_file,
                before,
            });
            let sent_at = Instant::now();
            let resp = self.client.get(url).await;
            self.stats.record_ping(sent_at.elapsed());

            let Some(resp) = resp else {
                error!("{batch}Search failed (network)");
                return SearchOutcome::Fatal;
            };

            match resp.status.as_u16() {
                // Still indexing. The server speaks seconds here; this is a
                // deliberately separate policy from the 429 unit heuristic.
                202 => {
                    let body: Option<serde_json::Value> = resp.json();
                    // A zero interval means the server gave no usable hint;
                    // use the default rather than hot-looping on the index.
                    let wait = body
                        .as_ref()
                        .and_then(|v| v.get("retry_after"))
                        .and_then(serde_json::Value::as_f64)
                        .filter(|secs| *secs > 0.0)
                        .map_or(Duration::from_millis(DEFAULT_BACKOFF_MS), |secs| {
                            Duration::from_millis((secs * 1000.0).ceil() as u64)
                        });
                    let message = resp.api_message().unwrap_or_else(|| "Indexing".to_string());
                    self.stats.record_throttle(wait);
                    warn!(wait_ms = wait.as_millis(), "{batch}202 {message}, waiting");
                    sleep(wait).await;
                }
                429 => {
                    let wait = Duration::from_millis(
                        retry_ms_from(&resp)
                            .unwrap_or_else(|| self.options.search_delay.as_millis() as u64),
                    );
                    self.stats.record_throttle(wait);
                    self.options.search_delay = self.options.search_delay.max(wait);
                    warn!(
                        wait_ms = wait.as_millis(),
                        search_delay_ms = self.options.search_delay.as_millis(),
                        "{batch}429 Rate limited on search"
                    );
                    self.log_stats();
                    let cooldown = wait.mul_f64(COOLDOWN_MULT);
                    debug!(cooldown_ms = cooldown.as_millis(), "Cooling down");
                    sleep(cooldown).await;
                }
                401 => {
                    let message = resp.api_message().unwrap_or_else(|| "Unauthorized".to_string());
                    error!("{batch}401 {message}");
                    return SearchOutcome::Fatal;
                }
                403 => {
                    let message =
                        resp.api_message().unwrap_or_else(|| "Missing Access".to_string());
                    error!("{batch}403 {message}");
                    return SearchOutcome::EndContainer;
                }
                404 => {
                    let message =
                        resp.api_message().unwrap_or_else(|| "Unknown Channel".to_string());
                    error!("{batch}404 {message}");
                    return SearchOutcome::EndContainer;
                }
                400..=499 => {
                    let message =
                        resp.api_message().unwrap_or_else(|| "Client error".to_string());
                    warn!(status = resp.status.as_u16(), "{batch}{message}, skipping");
                    return SearchOutcome::EndContainer;
                }
                200 => match resp.json::<SearchResponse>() {
                    Some(page) => return SearchOutcome::Page(page),
                    None => {
                        decode_attempts += 1;
                        if decode_attempts >= 3 {
                            error!("{batch}Search failed after 3 attempts");
                            return SearchOutcome::EndContainer;
                        }
                        warn!(attempt = decode_attempts, "{batch}Malformed search response, retrying");
                        sleep(Duration::from_millis(
                            DEFAULT_BACKOFF_MS << (decode_attempts - 1),
                        ))
                        .await;
                    }
                },
                status => {
                    let message =
                        resp.api_message().unwrap_or_else(|| "Unexpected response".to_string());
                    warn!(status, "{batch}{message}");
                    return SearchOutcome::EndContainer;
                }
            }
        }
    }

    /// Fold a page into state: track the grand total and split the flattened
    /// entries into to-delete and skipped.
    fn filter_page(&mut self, page: SearchResponse) {
        if page.total_results > self.state.grand_total {
            self.state.grand_total = page.total_results;
        }
        let discovered: Vec<Message> = page.messages.into_iter().flatten().collect();
        let regex =
            filter::compile_pattern(self.options.pattern.as_deref(), &mut self.pattern_warned);
        let (to_delete, skipped) =
            filter::partition_page(discovered, self.options.include_pinned, regex.as_ref());
        self.state.to_delete = to_delete;
        self.state.skipped = skipped;
    }

    /// Ask the operator before the first deletion of an interactive run.
    ///
    /// Acceptance applies to the remainder of the run; batch runs never get
    /// here with `confirm` set.
    fn confirm_pending(&mut self) -> bool {
        if !self.options.confirm {
            return true;
        }
        let Some(confirm) = &self.confirm_fn else {
            return true;
        };
        let preview = self
            .state
            .to_delete
            .iter()
            .map(|m| {
                let content = if m.attachments.is_empty() {
                    m.content.as_str()
                } else {
                    "[ATTACHMENTS]"
                };
                format!("{}: {content}", m.author_label())
            })
            .collect();
        let prompt = ConfirmPrompt {
            grand_total: self.state.grand_total,
            eta: self.stats.eta,
            preview,
        };
        if confirm(&prompt) {
            self.options.confirm = false;
            true
        } else {
            error!("Aborted by you!");
            false
        }
    }

    pub(crate) fn log_stats(&self) {
        debug!(
            delete_delay_ms = self.options.delete_delay.as_millis(),
            search_delay_ms = self.options.search_delay.as_millis(),
            last_ping_ms = self.stats.last_ping.unwrap_or_default().as_millis(),
            avg_ping_ms = self.stats.avg_ping.unwrap_or_default().as_millis(),
            throttled_count = self.stats.throttled_count,
            throttled_total = %format_hms(self.stats.throttled_total),
            "Stats"
        );
    }
}
