//! Fan-out of arrival notices to interested watchers.
//!
//! A failed delivery only affects its own watcher: every eligible watcher is
//! attempted and the outcome is summarised in a [`DispatchReport`].

use crate::services::subscriptions::WatcherEntry;
use crate::voice::platform::VoicePlatform;
use crate::voice::transition::VoiceChannelRef;
use futures_util::future::join_all;
use serenity::all::{GuildId, UserId};
use tracing::{debug, info, warn};

/// A member who just joined a monitored channel and is not in cooldown.
#[derive(Debug, Clone, Copy)]
pub struct Arrival<'a> {
    pub guild_id: GuildId,
    pub guild_name: &'a str,
    pub member_id: UserId,
    pub member_name: &'a str,
    pub channel: &'a VoiceChannelRef,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped_colocated: usize,
}

pub fn format_notification(guild_name: &str, member_name: &str, channel_name: &str) -> String {
    format!("[{guild_name}] {member_name} joined voice channel {channel_name}.")
}

pub async fn dispatch(
    platform: &dyn VoicePlatform,
    watchers: &[WatcherEntry],
    arrival: &Arrival<'_>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    let mut recipients = Vec::new();
    for entry in watchers
        .iter()
        .filter(|entry| entry.targets.contains(&arrival.member_id))
    {
        let colocated = entry.watcher_id == arrival.member_id
            || platform.voice_channel_of(arrival.guild_id, entry.watcher_id)
                == Some(arrival.channel.id);
        if colocated {
            debug!(
                "Dispatch: watcher {} already in channel {}, skipping",
                entry.watcher_id, arrival.channel.id
            );
            report.skipped_colocated += 1;
            continue;
        }
        recipients.push(entry.watcher_id);
    }

    if recipients.is_empty() {
        return report;
    }

    let content = format_notification(
        arrival.guild_name,
        arrival.member_name,
        &arrival.channel.name,
    );

    let attempts = recipients.iter().map(|watcher_id| {
        let content = content.as_str();
        async move {
            (
                *watcher_id,
                platform.send_direct_message(*watcher_id, content).await,
            )
        }
    });

    for (watcher_id, result) in join_all(attempts).await {
        report.attempted += 1;
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    watcher_id = %watcher_id,
                    member_id = %arrival.member_id,
                    channel_id = %arrival.channel.id,
                    reason = e.reason_code(),
                    "Dispatch: failed to notify watcher: {}",
                    e
                );
            }
        }
    }

    info!(
        "Dispatch: {} joined {}: notified {}/{} watcher(s), {} failed, {} co-located",
        arrival.member_id,
        arrival.channel.id,
        report.delivered,
        report.attempted,
        report.failed,
        report.skipped_colocated
    );
    report
}
