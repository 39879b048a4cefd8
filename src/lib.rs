//! Discord message purge engine.
//!
//! A client-side engine that bulk-deletes your own messages through Discord's
//! REST API while respecting its per-route and global rate limits. The engine
//! walks search results page by page, filters matches, deletes them one at a
//! time with classified retry handling, and keeps live progress statistics.

pub mod api;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod purge;
pub mod transport;
