pub mod commands;
pub mod config;
pub mod error;
pub mod services;
pub mod voice;

use std::sync::Arc;

/// Custom data passed to all commands and the gateway event handler
pub struct Data {
    pub config: config::Config,
    pub registry: services::subscriptions::SubscriptionRegistry,
    pub engine: Arc<voice::engine::PresenceEngine>,
    pub platform: voice::platform::SerenityPlatform,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
