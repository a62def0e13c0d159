use chrono::{DateTime, Duration, Utc};
use serenity::all::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::interval;
use tracing::debug;

/// Last observed voice departure per member. Process lifetime only.
#[derive(Clone, Default)]
pub struct CooldownTracker {
    departures: Arc<Mutex<HashMap<UserId, DateTime<Utc>>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_departure(&self, member_id: UserId, at: DateTime<Utc>) {
        let mut departures = self.departures.lock().unwrap_or_else(|e| e.into_inner());
        departures.insert(member_id, at);
    }

    /// True iff a departure is on record and happened less than `window` before `now`.
    pub fn is_within_cooldown(
        &self,
        member_id: UserId,
        now: DateTime<Utc>,
        window: std::time::Duration,
    ) -> bool {
        let departures = self.departures.lock().unwrap_or_else(|e| e.into_inner());
        let Some(last) = departures.get(&member_id) else {
            return false;
        };
        let window = Duration::from_std(window).unwrap_or(Duration::MAX);
        now.signed_duration_since(*last) < window
    }

    /// Drops departures older than `max_age`. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> usize {
        let max_age = Duration::from_std(max_age).unwrap_or(Duration::MAX);
        let mut departures = self.departures.lock().unwrap_or_else(|e| e.into_inner());
        let before = departures.len();
        departures.retain(|_, at| now.signed_duration_since(*at) < max_age);
        before - departures.len()
    }

    pub fn len(&self) -> usize {
        self.departures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub async fn start_prune_task(
    tracker: CooldownTracker,
    every: std::time::Duration,
    max_age: std::time::Duration,
) {
    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        let removed = tracker.prune(Utc::now(), max_age);
        if removed > 0 {
            debug!(
                "Cooldown: pruned {} stale departure(s), {} remaining",
                removed,
                tracker.len()
            );
        }
    }
}
