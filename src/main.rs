use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vcwatch::commands::notify;
use vcwatch::services::subscriptions::SubscriptionRegistry;
use vcwatch::voice::cooldown::{start_prune_task, CooldownTracker};
use vcwatch::voice::engine::PresenceEngine;
use vcwatch::voice::platform::SerenityPlatform;
use vcwatch::{config::Config, Data};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);
    let discord_token = config.discord_token.clone();

    let registry = SubscriptionRegistry::open(&config.subscriptions_path)?;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![notify::notify()],
            event_handler: |_ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::VoiceStateUpdate { old, new } = event {
                        if let Some(transition) =
                            data.platform.transition_from_update(old.as_ref(), new)
                        {
                            data.engine.handle_transition(&transition, Utc::now()).await;
                        }
                    }
                    Ok(())
                })
            },
            on_error: |err| {
                Box::pin(async move {
                    if let poise::FrameworkError::Command { error, ctx, .. } = &err {
                        error!("Command /{} failed: {}", ctx.command().qualified_name, error);
                    }
                    if let Err(e) = poise::builtins::on_error(err).await {
                        error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot is ready as {}", ready.user.name);
                match config.dev_guild_id {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            serenity::GuildId::new(guild_id),
                        )
                        .await?
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?
                    }
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let platform = SerenityPlatform::new(ctx.cache.clone(), ctx.http.clone());
                let cooldowns = CooldownTracker::new();
                let engine = Arc::new(PresenceEngine::new(
                    registry.clone(),
                    cooldowns.clone(),
                    Arc::new(platform.clone()),
                    config.monitored_channel_ids.clone(),
                    config.cooldown_window,
                ));

                tokio::spawn(start_prune_task(
                    cooldowns,
                    Duration::from_secs(config.cooldown_prune_interval_secs.max(1)),
                    config.cooldown_window * 4,
                ));

                info!(
                    "Watching {} voice channel(s) with a {} cooldown",
                    config.monitored_channel_ids.len(),
                    humantime::format_duration(config.cooldown_window)
                );

                Ok(Data {
                    config,
                    registry,
                    engine,
                    platform,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
