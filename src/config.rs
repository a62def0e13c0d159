use dotenvy::dotenv;
use serenity::all::ChannelId;
use std::collections::HashSet;
use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    /// Voice channels whose arrivals trigger notifications
    pub monitored_channel_ids: HashSet<ChannelId>,
    pub cooldown_window: Duration,
    pub cooldown_prune_interval_secs: u64,
    pub subscriptions_path: String,
    /// When set, `/notify` only answers in this text channel
    pub command_channel_id: Option<u64>,
    pub select_timeout_secs: u64,
    pub dev_guild_id: Option<u64>,
    pub status_message: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let monitored_raw = env::var("MONITORED_CHANNEL_IDS")
            .map_err(|_| anyhow::anyhow!("MONITORED_CHANNEL_IDS must be set"))?;

        let cooldown_raw = env::var("COOLDOWN_WINDOW").unwrap_or_else(|_| "30m".to_string());
        let cooldown_window = humantime::parse_duration(cooldown_raw.trim()).map_err(|e| {
            anyhow::anyhow!("COOLDOWN_WINDOW '{}' is not a valid duration: {}", cooldown_raw, e)
        })?;

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            monitored_channel_ids: parse_channel_ids(&monitored_raw)?,
            cooldown_window,
            cooldown_prune_interval_secs: env::var("COOLDOWN_PRUNE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            subscriptions_path: env::var("SUBSCRIPTIONS_PATH")
                .unwrap_or_else(|_| "data/user_config.json".to_string()),
            command_channel_id: env::var("COMMAND_CHANNEL_ID")
                .ok()
                .and_then(|id| id.parse().ok()),
            select_timeout_secs: env::var("SELECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Watching voice channels".to_string()),
        })
    }
}

/// Parses a comma and/or whitespace separated list of channel ids.
pub fn parse_channel_ids(raw: &str) -> anyhow::Result<HashSet<ChannelId>> {
    let mut ids = HashSet::new();
    for part in raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        let id: u64 = part
            .parse()
            .map_err(|_| anyhow::anyhow!("'{}' is not a valid channel id", part))?;
        if id == 0 {
            anyhow::bail!("channel id must be non-zero");
        }
        ids.insert(ChannelId::new(id));
    }
    if ids.is_empty() {
        anyhow::bail!("at least one monitored channel id is required");
    }
    Ok(ids)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("monitored_channel_ids", &self.monitored_channel_ids)
            .field(
                "cooldown_window",
                &humantime::format_duration(self.cooldown_window).to_string(),
            )
            .field(
                "cooldown_prune_interval_secs",
                &self.cooldown_prune_interval_secs,
            )
            .field("subscriptions_path", &self.subscriptions_path)
            .field("command_channel_id", &self.command_channel_id)
            .field("select_timeout_secs", &self.select_timeout_secs)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("status_message", &self.status_message)
            .finish()
    }
}
