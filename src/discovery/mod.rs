//! Container discovery: expand a channel into the threads and forum posts
//! that must also be scanned.
//!
//! Discovery is advisory. Every sub-query degrades to "no additional
//! results" on failure, and the returned set always contains the input
//! channel, so a fully failed discovery still leaves one unit of work.

use std::collections::HashSet;

use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ChannelInfo, Endpoints, ThreadListing, CHANNEL_FORUM, CHANNEL_MEDIA, CHANNEL_STAGE, CHANNEL_VOICE};
use crate::constants::DM_GUILD;
use crate::transport::RestClient;

/// Resolve the set of channels and threads to purge for one input channel.
///
/// Direct-message scopes return only the input. Guild channels union in
/// forum/media posts (active and archived), the channel's active threads,
/// its publicly- and privately-archived threads, and guild-wide active
/// threads parented to it. The result is de-duplicated and order-preserving.
pub async fn discover_channels(
    client: &RestClient,
    endpoints: &Endpoints,
    guild_id: &str,
    channel_id: &str,
) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut collected = Vec::new();
    push_unique(&mut collected, &mut seen, channel_id.to_string());

    if guild_id == DM_GUILD {
        return collected;
    }

    if let Some(info) = fetch_channel_info(client, endpoints, channel_id).await {
        match info.kind {
            CHANNEL_FORUM | CHANNEL_MEDIA => {
                info!(channel_id, kind = info.kind, "Forum/media channel, fetching posts");
                for archived in [false, true] {
                    let url = endpoints.forum_posts(channel_id, archived);
                    for thread in fetch_threads(client, url, "forum posts").await {
                        push_unique(&mut collected, &mut seen, thread.id);
                    }
                }
            }
            CHANNEL_VOICE | CHANNEL_STAGE => {
                debug!(channel_id, kind = info.kind, "Voice/stage channel, will search directly");
            }
            _ => {}
        }
    }

    let listings = [
        (endpoints.active_threads(channel_id), "active threads"),
        (endpoints.archived_threads(channel_id, "public"), "public archived threads"),
        (endpoints.archived_threads(channel_id, "private"), "private archived threads"),
    ];
    for (url, label) in listings {
        for thread in fetch_threads(client, url, label).await {
            push_unique(&mut collected, &mut seen, thread.id);
        }
    }

    let guild_threads =
        fetch_threads(client, endpoints.guild_active_threads(guild_id), "guild active threads")
            .await;
    for thread in guild_threads {
        if thread.parent_id.as_deref() == Some(channel_id) {
            push_unique(&mut collected, &mut seen, thread.id);
        }
    }

    info!(channel_id, count = collected.len(), "Discovery finished");
    collected
}

fn push_unique(collected: &mut Vec<String>, seen: &mut HashSet<String>, id: String) {
    if !id.is_empty() && seen.insert(id.clone()) {
        collected.push(id);
    }
}

async fn fetch_channel_info(
    client: &RestClient,
    endpoints: &Endpoints,
    channel_id: &str,
) -> Option<ChannelInfo> {
    let resp = client.get(endpoints.channel(channel_id)).await?;
    if !resp.status.is_success() {
        warn!(
            channel_id,
            status = resp.status.as_u16(),
            message = resp.api_message().as_deref().unwrap_or_default(),
            "Failed to fetch channel info"
        );
        return None;
    }
    resp.json()
}

/// One fault-tolerant thread sub-query. 403/404 mean no access or no such
/// sub-resource and are only worth a debug line.
async fn fetch_threads(client: &RestClient, url: Url, label: &str) -> Vec<crate::api::Thread> {
    let Some(resp) = client.get(url).await else {
        warn!(label, "Thread listing failed (network)");
        return Vec::new();
    };
    if resp.status.is_success() {
        return resp.json::<ThreadListing>().map(|l| l.threads).unwrap_or_default();
    }
    let status = resp.status.as_u16();
    if status == 403 || status == 404 {
        debug!(label, status, "Thread listing unavailable");
    } else {
        warn!(
            label,
            status,
            message = resp.api_message().as_deref().unwrap_or_default(),
            "Failed to fetch thread listing"
        );
    }
    Vec::new()
}
