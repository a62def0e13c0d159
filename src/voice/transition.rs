use serenity::all::{ChannelId, GuildId, UserId};
use std::collections::HashSet;

/// A voice channel as seen in a state update, with the name needed to render a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelRef {
    pub id: ChannelId,
    pub name: String,
}

impl VoiceChannelRef {
    pub fn new(id: ChannelId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// One member's move between voice channels, as delivered by the gateway.
#[derive(Debug, Clone)]
pub struct VoiceTransition {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub member_id: UserId,
    pub member_name: String,
    pub previous: Option<VoiceChannelRef>,
    pub current: Option<VoiceChannelRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ignore,
    Departure,
    ArrivalMonitored,
    ArrivalUnmonitored,
}

/// Classifies a channel change. Moves between two monitored channels count as a
/// fresh arrival; a state update that doesn't change the channel (mute, deafen,
/// stream) is ignored.
pub fn classify(
    previous: Option<&VoiceChannelRef>,
    current: Option<&VoiceChannelRef>,
    monitored: &HashSet<ChannelId>,
) -> Transition {
    match (previous, current) {
        (None, None) => Transition::Ignore,
        (Some(prev), Some(next)) if prev.id == next.id => Transition::Ignore,
        (Some(_), None) => Transition::Departure,
        (_, Some(next)) if monitored.contains(&next.id) => Transition::ArrivalMonitored,
        (_, Some(_)) => Transition::ArrivalUnmonitored,
    }
}

impl VoiceTransition {
    pub fn classify(&self, monitored: &HashSet<ChannelId>) -> Transition {
        classify(self.previous.as_ref(), self.current.as_ref(), monitored)
    }
}
