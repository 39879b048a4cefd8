//! Wire types and endpoint construction for the Discord REST API.
//!
//! Only the handful of endpoints the engine needs are modelled here: message
//! search, message deletion, and channel/thread enumeration. This is not a
//! general API wrapper.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::constants::DM_GUILD;

/// Channel type: forum channel.
pub const CHANNEL_FORUM: u8 = 15;
/// Channel type: media channel.
pub const CHANNEL_MEDIA: u8 = 16;
/// Channel type: voice channel.
pub const CHANNEL_VOICE: u8 = 2;
/// Channel type: stage channel.
pub const CHANNEL_STAGE: u8 = 13;

/// A message as returned by the search endpoint.
///
/// All fields default so a partially-formed entry never poisons a whole page;
/// entries without an id or author are filtered out downstream.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Display label for the message author.
    #[must_use]
    pub fn author_label(&self) -> &str {
        self.author.as_ref().map_or("Unknown", Author::label)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Author {
    /// Display name when set, otherwise the username.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub filename: String,
}

/// Response of the message search endpoint.
///
/// `total_results` is the server's estimate of total matches; it can
/// fluctuate between pages. `messages` arrives as a nested sequence of
/// result groups and is flattened by the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub messages: Vec<Vec<Message>>,
}

/// Channel metadata, used only to detect forum/media containers.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

/// A thread listing as returned by the various thread enumeration endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadListing {
    #[serde(default)]
    pub threads: Vec<Thread>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Parameters for one search request.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery<'a> {
    pub guild_id: &'a str,
    pub channel_id: &'a str,
    pub author_id: Option<&'a str>,
    pub content: Option<&'a str>,
    pub has_link: bool,
    pub has_file: bool,
    pub before: Option<&'a str>,
}

/// Builds URLs for the API endpoints the engine touches.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Create an endpoint builder rooted at `base` (e.g. the production API
    /// base or a mock server during tests).
    ///
    /// # Errors
    ///
    /// Returns an error if `base` is not a valid absolute URL.
    pub fn new(base: &str) -> Result<Self> {
        let url = Url::parse(base)?;
        if url.cannot_be_a_base() {
            bail!("API base URL cannot be a base: {base}");
        }
        Ok(Self { base: url })
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        {
            // Infallible: `new` rejects cannot-be-a-base URLs.
            let mut path = url
                .path_segments_mut()
                .expect("API base URL is a valid base");
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    /// `GET /channels/{id}`: channel metadata.
    #[must_use]
    pub fn channel(&self, channel_id: &str) -> Url {
        self.join(&["channels", channel_id])
    }

    /// Message search, scoped to the guild or, for DMs, to the channel.
    #[must_use]
    pub fn search(&self, query: &SearchQuery<'_>) -> Url {
        let mut url = if query.guild_id == DM_GUILD {
            self.join(&["channels", query.channel_id, "messages", "search"])
        } else {
            self.join(&["guilds", query.guild_id, "messages", "search"])
        };
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(author_id) = query.author_id {
                pairs.append_pair("author_id", author_id);
            }
            if query.guild_id != DM_GUILD {
                pairs.append_pair("channel_id", query.channel_id);
            }
            pairs.append_pair("sort_by", "timestamp");
            pairs.append_pair("sort_order", "desc");
            if let Some(before) = query.before {
                pairs.append_pair("before", before);
            }
            if query.has_link {
                pairs.append_pair("has", "link");
            }
            if query.has_file {
                pairs.append_pair("has", "file");
            }
            if let Some(content) = query.content {
                pairs.append_pair("content", content);
            }
            pairs.append_pair("include_nsfw", "true");
        }
        url
    }

    /// `DELETE /channels/{channel}/messages/{message}`.
    #[must_use]
    pub fn delete_message(&self, channel_id: &str, message_id: &str) -> Url {
        self.join(&["channels", channel_id, "messages", message_id])
    }

    /// Forum/media post listing, active or archived.
    #[must_use]
    pub fn forum_posts(&self, channel_id: &str, archived: bool) -> Url {
        let mut url = self.join(&["channels", channel_id, "threads", "search"]);
        url.query_pairs_mut()
            .append_pair("archived", if archived { "true" } else { "false" })
            .append_pair("sort_by", "last_message_time")
            .append_pair("sort_order", "desc")
            .append_pair("limit", "100");
        url
    }

    /// `GET /channels/{id}/threads/active`.
    #[must_use]
    pub fn active_threads(&self, channel_id: &str) -> Url {
        self.join(&["channels", channel_id, "threads", "active"])
    }

    /// Publicly- or privately-archived threads of a channel.
    #[must_use]
    pub fn archived_threads(&self, channel_id: &str, visibility: &str) -> Url {
        let mut url = self.join(&["channels", channel_id, "threads", "archived", visibility]);
        url.query_pairs_mut().append_pair("limit", "100");
        url
    }

    /// `GET /guilds/{id}/threads/active`: guild-wide active threads.
    #[must_use]
    pub fn guild_active_threads(&self, guild_id: &str) -> Url {
        self.join(&["guilds", guild_id, "threads", "active"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("https://discord.com/api/v10").unwrap()
    }

    #[test]
    fn test_search_url_guild_scope() {
        let url = endpoints().search(&SearchQuery {
            guild_id: "123",
            channel_id: "456",
            author_id: Some("789"),
            content: Some("hello world"),
            has_link: true,
            has_file: false,
            before: Some("999"),
        });
        assert_eq!(url.path(), "/api/v10/guilds/123/messages/search");
        let query = url.query().unwrap();
        assert!(query.contains("author_id=789"));
        assert!(query.contains("channel_id=456"));
        assert!(query.contains("sort_by=timestamp"));
        assert!(query.contains("sort_order=desc"));
        assert!(query.contains("before=999"));
        assert!(query.contains("has=link"));
        assert!(!query.contains("has=file"));
        assert!(query.contains("content=hello+world"));
        assert!(query.contains("include_nsfw=true"));
    }

    #[test]
    fn test_search_url_dm_scope() {
        let url = endpoints().search(&SearchQuery {
            guild_id: DM_GUILD,
            channel_id: "456",
            ..SearchQuery::default()
        });
        assert_eq!(url.path(), "/api/v10/channels/456/messages/search");
        assert!(!url.query().unwrap().contains("channel_id"));
    }

    #[test]
    fn test_delete_url() {
        let url = endpoints().delete_message("456", "999");
        assert_eq!(url.path(), "/api/v10/channels/456/messages/999");
    }

    #[test]
    fn test_base_without_path() {
        let e = Endpoints::new("http://127.0.0.1:8080").unwrap();
        assert_eq!(e.channel("1").path(), "/channels/1");
    }

    #[test]
    fn test_search_response_tolerates_sparse_messages() {
        let json = r#"{"total_results": 2, "messages": [[{"id": "1"}], [{}]]}"#;
        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.total_results, 2);
        assert_eq!(resp.messages.len(), 2);
        assert_eq!(resp.messages[0][0].id, "1");
        assert!(resp.messages[1][0].id.is_empty());
    }
}
