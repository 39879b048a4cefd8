//! Shared constants used across the application.

/// Base URL for the Discord REST API.
pub const API_BASE: &str = "https://discord.com/api/v10";

/// Guild id used by Discord for direct-message scopes.
pub const DM_GUILD: &str = "@me";

/// Default wait between search pages, in milliseconds.
pub const DEFAULT_SEARCH_DELAY_MS: u64 = 50;

/// Default wait between delete attempts, in milliseconds.
pub const DEFAULT_DELETE_DELAY_MS: u64 = 50;

/// First step of the exponential backoff ladder, in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Ceiling for exponential backoff, in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Settle delay between batch targets, in milliseconds.
pub const BATCH_SETTLE_MS: u64 = 200;

/// Extra cooldown margin applied on top of a server-suggested 429 wait.
pub const COOLDOWN_MULT: f64 = 1.2;

/// Approximate number of results per search page, used by the ETA model.
pub const SEARCH_PAGE_SIZE: u64 = 25;
