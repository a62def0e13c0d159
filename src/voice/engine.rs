use crate::services::subscriptions::SubscriptionRegistry;
use crate::voice::cooldown::CooldownTracker;
use crate::voice::dispatch::{dispatch, Arrival, DispatchReport};
use crate::voice::platform::VoicePlatform;
use crate::voice::transition::{Transition, VoiceTransition};
use chrono::{DateTime, Utc};
use serenity::all::ChannelId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Ignored,
    DepartureRecorded,
    Unmonitored,
    Suppressed,
    /// Subscriptions could not be read; nobody was notified.
    RegistryUnavailable,
    Dispatched(DispatchReport),
}

/// Routes voice transitions: departures feed the cooldown table, fresh arrivals
/// in monitored channels are fanned out to watchers. Reads the registry, never
/// writes it.
pub struct PresenceEngine {
    registry: SubscriptionRegistry,
    cooldowns: CooldownTracker,
    platform: Arc<dyn VoicePlatform>,
    monitored: HashSet<ChannelId>,
    window: Duration,
}

impl PresenceEngine {
    pub fn new(
        registry: SubscriptionRegistry,
        cooldowns: CooldownTracker,
        platform: Arc<dyn VoicePlatform>,
        monitored: HashSet<ChannelId>,
        window: Duration,
    ) -> Self {
        Self {
            registry,
            cooldowns,
            platform,
            monitored,
            window,
        }
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub async fn handle_transition(
        &self,
        event: &VoiceTransition,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        match event.classify(&self.monitored) {
            Transition::Ignore => TransitionOutcome::Ignored,
            Transition::ArrivalUnmonitored => TransitionOutcome::Unmonitored,
            Transition::Departure => {
                debug!("Engine: {} left voice at {}", event.member_id, now);
                self.cooldowns.record_departure(event.member_id, now);
                TransitionOutcome::DepartureRecorded
            }
            Transition::ArrivalMonitored => {
                let Some(channel) = event.current.as_ref() else {
                    return TransitionOutcome::Ignored;
                };

                if self
                    .cooldowns
                    .is_within_cooldown(event.member_id, now, self.window)
                {
                    debug!(
                        "Engine: {} rejoined {} within cooldown, suppressed",
                        event.member_id, channel.id
                    );
                    return TransitionOutcome::Suppressed;
                }

                let watchers = match self.registry.snapshot() {
                    Ok(watchers) => watchers,
                    Err(e) => {
                        error!("Engine: could not read subscriptions: {}", e);
                        return TransitionOutcome::RegistryUnavailable;
                    }
                };

                let arrival = Arrival {
                    guild_id: event.guild_id,
                    guild_name: &event.guild_name,
                    member_id: event.member_id,
                    member_name: &event.member_name,
                    channel,
                };
                TransitionOutcome::Dispatched(
                    dispatch(self.platform.as_ref(), &watchers, &arrival).await,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::dispatch::tests::FakePlatform;
    use crate::voice::transition::VoiceChannelRef;
    use chrono::TimeZone;
    use serenity::all::{GuildId, UserId};
    use tempfile::tempdir;

    const WINDOW: Duration = Duration::from_secs(30 * 60);
    const MEMBER: u64 = 50;
    const WATCHER: u64 = 10;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn channel(id: u64, name: &str) -> VoiceChannelRef {
        VoiceChannelRef::new(ChannelId::new(id), name)
    }

    fn event(previous: Option<VoiceChannelRef>, current: Option<VoiceChannelRef>) -> VoiceTransition {
        VoiceTransition {
            guild_id: GuildId::new(1),
            guild_name: "Town".to_string(),
            member_id: UserId::new(MEMBER),
            member_name: "M".to_string(),
            previous,
            current,
        }
    }

    struct Harness {
        engine: PresenceEngine,
        platform: Arc<FakePlatform>,
        _dir: tempfile::TempDir,
    }

    fn harness(platform: FakePlatform) -> Harness {
        let dir = tempdir().unwrap();
        let registry = SubscriptionRegistry::open(dir.path().join("users.json")).unwrap();
        registry
            .add_targets(UserId::new(WATCHER), &HashSet::from([UserId::new(MEMBER)]))
            .unwrap();

        let platform = Arc::new(platform);
        let engine = PresenceEngine::new(
            registry,
            CooldownTracker::new(),
            platform.clone(),
            HashSet::from([ChannelId::new(100)]),
            WINDOW,
        );
        Harness {
            engine,
            platform,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn first_join_notifies_watcher() {
        let h = harness(FakePlatform::default());

        let outcome = h
            .engine
            .handle_transition(&event(None, Some(channel(100, "Lounge"))), t(0))
            .await;

        assert!(matches!(
            outcome,
            TransitionOutcome::Dispatched(DispatchReport { delivered: 1, .. })
        ));
        assert_eq!(
            h.platform.sent(),
            vec![(
                UserId::new(WATCHER),
                "[Town] M joined voice channel Lounge.".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn rejoin_within_window_is_suppressed() {
        let h = harness(FakePlatform::default());
        let lounge = channel(100, "Lounge");

        let outcome = h
            .engine
            .handle_transition(&event(Some(lounge.clone()), None), t(0))
            .await;
        assert_eq!(outcome, TransitionOutcome::DepartureRecorded);

        let outcome = h
            .engine
            .handle_transition(&event(None, Some(lounge.clone())), t(600))
            .await;
        assert_eq!(outcome, TransitionOutcome::Suppressed);
        assert!(h.platform.sent().is_empty());

        let outcome = h
            .engine
            .handle_transition(&event(None, Some(lounge)), t(2000))
            .await;
        assert!(matches!(outcome, TransitionOutcome::Dispatched(_)));
        assert_eq!(h.platform.sent().len(), 1);
    }

    #[tokio::test]
    async fn unmonitored_arrival_does_not_dispatch() {
        let h = harness(FakePlatform::default());

        let outcome = h
            .engine
            .handle_transition(&event(None, Some(channel(200, "Side"))), t(0))
            .await;

        assert_eq!(outcome, TransitionOutcome::Unmonitored);
        assert!(h.platform.sent().is_empty());
    }

    #[tokio::test]
    async fn departure_from_unmonitored_channel_starts_cooldown() {
        let h = harness(FakePlatform::default());

        h.engine
            .handle_transition(&event(Some(channel(200, "Side")), None), t(0))
            .await;
        let outcome = h
            .engine
            .handle_transition(&event(None, Some(channel(100, "Lounge"))), t(60))
            .await;

        assert_eq!(outcome, TransitionOutcome::Suppressed);
    }

    #[tokio::test]
    async fn mute_toggle_is_ignored() {
        let h = harness(FakePlatform::default());
        let lounge = channel(100, "Lounge");

        let outcome = h
            .engine
            .handle_transition(&event(Some(lounge.clone()), Some(lounge)), t(0))
            .await;

        assert_eq!(outcome, TransitionOutcome::Ignored);
        assert!(h.engine.cooldowns().is_empty());
    }

    #[tokio::test]
    async fn poisoned_registry_is_reported_not_dispatched() {
        let h = harness(FakePlatform::default());
        let registry = h.engine.registry.clone();
        let _ = std::thread::spawn(move || {
            registry.poison_for_test();
        })
        .join();

        let outcome = h
            .engine
            .handle_transition(&event(None, Some(channel(100, "Lounge"))), t(0))
            .await;

        assert_eq!(outcome, TransitionOutcome::RegistryUnavailable);
        assert!(h.platform.sent().is_empty());
    }

    #[tokio::test]
    async fn colocated_watcher_gets_nothing() {
        let mut platform = FakePlatform::default();
        platform
            .locations
            .insert(UserId::new(WATCHER), ChannelId::new(100));
        let h = harness(platform);

        let outcome = h
            .engine
            .handle_transition(&event(None, Some(channel(100, "Lounge"))), t(0))
            .await;

        assert!(matches!(
            outcome,
            TransitionOutcome::Dispatched(DispatchReport {
                attempted: 0,
                skipped_colocated: 1,
                ..
            })
        ));
        assert!(h.platform.sent().is_empty());
    }
}
