use crate::error::{DeliveryError, LookupError};
use crate::voice::transition::{VoiceChannelRef, VoiceTransition};
use async_trait::async_trait;
use serenity::all::{ChannelId, CreateMessage, GuildId, UserId, VoiceState};
use serenity::cache::Cache;
use serenity::http::Http;
use std::sync::Arc;
use tracing::debug;

/// What the notification engine needs from the chat platform.
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Voice channel `user_id` currently occupies in `guild_id`, if known.
    fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;

    async fn send_direct_message(&self, user_id: UserId, content: &str)
        -> Result<(), DeliveryError>;
}

/// Gateway-backed platform using the serenity cache and HTTP client.
#[derive(Clone)]
pub struct SerenityPlatform {
    cache: Arc<Cache>,
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(cache: Arc<Cache>, http: Arc<Http>) -> Self {
        Self { cache, http }
    }

    /// Builds a transition from a raw voice state update. Updates outside a guild
    /// are dropped. Names that can't be resolved fall back to placeholders.
    pub fn transition_from_update(
        &self,
        old: Option<&VoiceState>,
        new: &VoiceState,
    ) -> Option<VoiceTransition> {
        let guild_id = new.guild_id?;
        let member_id = new.user_id;

        let member_name = match new.member.as_ref() {
            Some(member) => member.display_name().to_string(),
            None => or_placeholder(self.member_name(guild_id, member_id)),
        };

        Some(VoiceTransition {
            guild_id,
            guild_name: or_placeholder(self.guild_name(guild_id)),
            member_id,
            member_name,
            previous: old
                .and_then(|state| state.channel_id)
                .map(|id| self.channel_ref(guild_id, id)),
            current: new.channel_id.map(|id| self.channel_ref(guild_id, id)),
        })
    }

    fn channel_ref(&self, guild_id: GuildId, channel_id: ChannelId) -> VoiceChannelRef {
        VoiceChannelRef::new(
            channel_id,
            or_placeholder(self.channel_name(guild_id, channel_id)),
        )
    }

    fn guild_name(&self, guild_id: GuildId) -> Result<String, LookupError> {
        self.cache
            .guild(guild_id)
            .map(|guild| guild.name.clone())
            .ok_or(LookupError::Guild(guild_id.get()))
    }

    fn channel_name(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<String, LookupError> {
        self.cache
            .guild(guild_id)
            .and_then(|guild| guild.channels.get(&channel_id).map(|c| c.name.clone()))
            .ok_or(LookupError::Channel(channel_id.get()))
    }

    fn member_name(&self, guild_id: GuildId, user_id: UserId) -> Result<String, LookupError> {
        if let Some(name) = self.cache.guild(guild_id).and_then(|guild| {
            guild
                .members
                .get(&user_id)
                .map(|m| m.display_name().to_string())
        }) {
            return Ok(name);
        }
        self.cache
            .user(user_id)
            .map(|user| user.name.clone())
            .ok_or(LookupError::Member(user_id.get()))
    }
}

#[async_trait]
impl VoicePlatform for SerenityPlatform {
    fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let guild = self.cache.guild(guild_id)?;
        let channel = guild.voice_states.get(&user_id).and_then(|vs| vs.channel_id);
        channel
    }

    async fn send_direct_message(
        &self,
        user_id: UserId,
        content: &str,
    ) -> Result<(), DeliveryError> {
        user_id
            .direct_message(&*self.http, CreateMessage::new().content(content))
            .await
            .map(|_| ())
            .map_err(delivery_error)
    }
}

fn or_placeholder(result: Result<String, LookupError>) -> String {
    result.unwrap_or_else(|e| {
        debug!("Lookup failed, using placeholder: {}", e);
        e.placeholder().to_string()
    })
}

fn delivery_error(err: serenity::Error) -> DeliveryError {
    if let serenity::Error::Http(http_err) = &err {
        match http_err.status_code().map(|status| status.as_u16()) {
            Some(403) => return DeliveryError::Unreachable(err.to_string()),
            Some(404) => return DeliveryError::NotFound,
            _ => {}
        }
    }
    DeliveryError::Transport(err.to_string())
}
