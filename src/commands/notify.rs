use crate::error::StorageError;
use crate::services::subscriptions::{CommandOutcome, SubscriptionCommand, SubscriptionCommandKind};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info};

/// Discord caps select menus at 25 values.
const MAX_SELECT_VALUES: usize = 25;

/// Choose whose voice channel joins you get a DM about
#[poise::command(
    slash_command,
    subcommands("add", "remove", "list", "clear", "select"),
    guild_only
)]
pub async fn notify(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Get notified when these members join a watched voice channel
#[poise::command(slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Member to watch"] member: serenity::User,
    #[description = "Another member"] member2: Option<serenity::User>,
    #[description = "Another member"] member3: Option<serenity::User>,
    #[description = "Another member"] member4: Option<serenity::User>,
    #[description = "Another member"] member5: Option<serenity::User>,
) -> Result<(), Error> {
    if !ensure_command_channel(ctx).await? {
        return Ok(());
    }

    let (members, bots) = collect_members([Some(member), member2, member3, member4, member5]);
    if members.is_empty() {
        reply(ctx, "❌ Bots can't be watched.").await?;
        return Ok(());
    }

    let text = match run_command(ctx, SubscriptionCommandKind::Add, members).await {
        Ok(outcome) => with_bot_note(describe_outcome(outcome), bots),
        Err(e) => storage_failure(ctx, e),
    };
    reply(ctx, text).await
}

/// Stop notifications for these members
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Member to stop watching"] member: serenity::User,
    #[description = "Another member"] member2: Option<serenity::User>,
    #[description = "Another member"] member3: Option<serenity::User>,
    #[description = "Another member"] member4: Option<serenity::User>,
    #[description = "Another member"] member5: Option<serenity::User>,
) -> Result<(), Error> {
    if !ensure_command_channel(ctx).await? {
        return Ok(());
    }

    let members = [Some(member), member2, member3, member4, member5]
        .into_iter()
        .flatten()
        .map(|user| user.id)
        .collect::<HashSet<_>>();

    let text = match run_command(ctx, SubscriptionCommandKind::Remove, members).await {
        Ok(outcome) => describe_outcome(outcome),
        Err(e) => storage_failure(ctx, e),
    };
    reply(ctx, text).await
}

/// Show the members you are watching
#[poise::command(slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    if !ensure_command_channel(ctx).await? {
        return Ok(());
    }

    let watcher_id = ctx.author().id;
    let text = match ctx
        .data()
        .registry
        .run_blocking(move |r| r.get_or_create(watcher_id))
        .await
    {
        Ok(entry) => format_target_list(&entry.targets),
        Err(e) => storage_failure(ctx, e),
    };
    reply(ctx, text).await
}

/// Stop all notifications
#[poise::command(slash_command, guild_only)]
pub async fn clear(ctx: Context<'_>) -> Result<(), Error> {
    if !ensure_command_channel(ctx).await? {
        return Ok(());
    }

    let text = match run_command(ctx, SubscriptionCommandKind::Clear, HashSet::new()).await {
        Ok(outcome) => describe_outcome(outcome),
        Err(e) => storage_failure(ctx, e),
    };
    reply(ctx, text).await
}

/// Pick watched members from a searchable menu
#[poise::command(slash_command, guild_only)]
pub async fn select(ctx: Context<'_>) -> Result<(), Error> {
    if !ensure_command_channel(ctx).await? {
        return Ok(());
    }

    let watcher_id = ctx.author().id;
    let current = match ctx
        .data()
        .registry
        .run_blocking(move |r| r.get_or_create(watcher_id))
        .await
    {
        Ok(entry) => entry.targets,
        Err(e) => {
            let text = storage_failure(ctx, e);
            return reply(ctx, text).await;
        }
    };

    if !fits_picker(&current) {
        return reply(
            ctx,
            format!(
                "❌ You are watching {}, more than the picker can show ({}). Use `/notify list` and `/notify remove` instead.",
                plural(current.len()),
                MAX_SELECT_VALUES
            ),
        )
        .await;
    }

    let mut preselected: Vec<serenity::UserId> = current.iter().copied().collect();
    preselected.sort();

    let ids = PickerIds::new(ctx.id());
    let handle = ctx
        .send(
            poise::CreateReply::default()
                .content("Choose the members you want to hear about, then press **Confirm** or **Delete**.")
                .components(picker_rows(&ids, &preselected, false))
                .ephemeral(true),
        )
        .await?;

    let timeout = Duration::from_secs(ctx.data().config.select_timeout_secs);
    let mut pending: Option<HashSet<serenity::UserId>> = None;

    while let Some(interaction) =
        serenity::ComponentInteractionCollector::new(ctx.serenity_context())
            .author_id(watcher_id)
            .filter({
                let prefix = ids.prefix.clone();
                move |i: &serenity::ComponentInteraction| i.data.custom_id.starts_with(&prefix)
            })
            .timeout(timeout)
            .await
    {
        let custom_id = interaction.data.custom_id.as_str();

        let decision = match &interaction.data.kind {
            serenity::ComponentInteractionDataKind::UserSelect { values } => {
                let cache = &ctx.serenity_context().cache;
                let (members, bots) = humans_only(values, |id| {
                    cache.user(id).map(|user| user.bot).unwrap_or(false)
                });
                if bots > 0 {
                    info!("Watcher {} picked {} bot account(s), ignoring them", watcher_id, bots);
                }
                pending = Some(members);
                None
            }
            serenity::ComponentInteractionDataKind::Button if custom_id == ids.confirm => Some((
                SubscriptionCommandKind::Replace,
                pending.take().unwrap_or_else(|| current.clone()),
            )),
            serenity::ComponentInteractionDataKind::Button if custom_id == ids.delete => {
                Some((SubscriptionCommandKind::Clear, HashSet::new()))
            }
            _ => None,
        };

        let Some((kind, payload)) = decision else {
            interaction
                .create_response(
                    ctx.serenity_context(),
                    serenity::CreateInteractionResponse::Acknowledge,
                )
                .await?;
            continue;
        };

        let text = match run_command(ctx, kind, payload).await {
            Ok(outcome) => describe_outcome(outcome),
            Err(e) => storage_failure(ctx, e),
        };

        interaction
            .create_response(
                ctx.serenity_context(),
                serenity::CreateInteractionResponse::UpdateMessage(
                    serenity::CreateInteractionResponseMessage::new()
                        .content(text)
                        .components(picker_rows(&ids, &preselected, true)),
                ),
            )
            .await?;
        return Ok(());
    }

    // Timed out without a decision.
    handle
        .edit(
            ctx,
            poise::CreateReply::default()
                .content("⌛ Selection expired. Run `/notify select` again.")
                .components(picker_rows(&ids, &preselected, true)),
        )
        .await?;
    Ok(())
}

struct PickerIds {
    prefix: String,
    select: String,
    confirm: String,
    delete: String,
}

impl PickerIds {
    fn new(ctx_id: u64) -> Self {
        let prefix = format!("{ctx_id}_notify_");
        Self {
            select: format!("{prefix}select"),
            confirm: format!("{prefix}confirm"),
            delete: format!("{prefix}delete"),
            prefix,
        }
    }
}

fn picker_rows(
    ids: &PickerIds,
    preselected: &[serenity::UserId],
    disabled: bool,
) -> Vec<serenity::CreateActionRow> {
    let default_users = (!preselected.is_empty()).then(|| preselected.to_vec());
    let menu = serenity::CreateSelectMenu::new(
        ids.select.as_str(),
        serenity::CreateSelectMenuKind::User { default_users },
    )
    .placeholder("Search members to be notified about")
    .min_values(0)
    .max_values(MAX_SELECT_VALUES as u8)
    .disabled(disabled);

    let confirm = serenity::CreateButton::new(ids.confirm.as_str())
        .label("Confirm")
        .style(serenity::ButtonStyle::Success)
        .disabled(disabled);
    let delete = serenity::CreateButton::new(ids.delete.as_str())
        .label("Delete")
        .style(serenity::ButtonStyle::Danger)
        .disabled(disabled);

    vec![
        serenity::CreateActionRow::SelectMenu(menu),
        serenity::CreateActionRow::Buttons(vec![confirm, delete]),
    ]
}

async fn ensure_command_channel(ctx: Context<'_>) -> Result<bool, Error> {
    if let Some(required) = ctx.data().config.command_channel_id {
        if ctx.channel_id().get() != required {
            reply(ctx, format!("❌ This command can only be used in <#{}>.", required)).await?;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Registers the caller if needed, then applies the command off the async runtime.
async fn run_command(
    ctx: Context<'_>,
    kind: SubscriptionCommandKind,
    payload: HashSet<serenity::UserId>,
) -> Result<CommandOutcome, StorageError> {
    let watcher_id = ctx.author().id;
    let command = SubscriptionCommand::new(kind, watcher_id, payload);
    let outcome = ctx
        .data()
        .registry
        .run_blocking(move |r| {
            r.get_or_create(watcher_id)?;
            r.apply(command)
        })
        .await?;
    info!("Watcher {} ran {:?}: {:?}", watcher_id, kind, outcome);
    Ok(outcome)
}

async fn reply(ctx: Context<'_>, text: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(text)
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

fn storage_failure(ctx: Context<'_>, e: StorageError) -> String {
    error!(
        "Failed to update subscriptions for watcher {}: {}",
        ctx.author().id,
        e
    );
    "❌ Could not save your notification list. Please try again later.".to_string()
}

fn collect_members<I>(users: I) -> (HashSet<serenity::UserId>, usize)
where
    I: IntoIterator<Item = Option<serenity::User>>,
{
    let mut bots = 0;
    let mut members = HashSet::new();
    for user in users.into_iter().flatten() {
        if user.bot {
            bots += 1;
        } else {
            members.insert(user.id);
        }
    }
    (members, bots)
}

/// The picker preselects every current target, so it can only edit lists it can fully show.
fn fits_picker(targets: &HashSet<serenity::UserId>) -> bool {
    targets.len() <= MAX_SELECT_VALUES
}

fn humans_only(
    values: &[serenity::UserId],
    is_bot: impl Fn(serenity::UserId) -> bool,
) -> (HashSet<serenity::UserId>, usize) {
    let mut bots = 0;
    let mut members = HashSet::new();
    for &id in values {
        if is_bot(id) {
            bots += 1;
        } else {
            members.insert(id);
        }
    }
    (members, bots)
}

fn describe_outcome(outcome: CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Registered { targets } => {
            format!("✅ You are registered and watching {}.", plural(targets))
        }
        CommandOutcome::Added(0) => "📭 Those members were already on your list.".to_string(),
        CommandOutcome::Added(n) => format!("✅ Added {}.", plural(n)),
        CommandOutcome::Removed(0) => "📭 None of those members were on your list.".to_string(),
        CommandOutcome::Removed(n) => format!("✅ Removed {}.", plural(n)),
        CommandOutcome::Replaced { added, removed } => format!(
            "✅ Saved your selection ({} added, {} removed).",
            added, removed
        ),
        CommandOutcome::Cleared(0) => "📭 Your list was already empty.".to_string(),
        CommandOutcome::Cleared(n) => format!("✅ Cleared {} from your list.", plural(n)),
    }
}

fn format_target_list(targets: &HashSet<serenity::UserId>) -> String {
    if targets.is_empty() {
        return "📭 You are not watching anyone. Use `/notify add` or `/notify select`."
            .to_string();
    }
    let mut ids: Vec<_> = targets.iter().collect();
    ids.sort();
    let lines: Vec<String> = ids.iter().map(|id| format!("• <@{}>", id)).collect();
    format!("**You are watching:**\n{}", lines.join("\n"))
}

fn with_bot_note(text: String, bots: usize) -> String {
    if bots == 0 {
        text
    } else {
        format!("{} (skipped {} bot account(s))", text, bots)
    }
}

fn plural(n: usize) -> String {
    if n == 1 {
        "1 member".to_string()
    } else {
        format!("{} members", n)
    }
}
