//! Per-subscription `lastActivityAt` tracking.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::context::Context;

/// KV key holding the `lastUpdateAt` of the most recent change applied.
pub const LAST_RECEIVED_CHANGE_KEY: &str = "last_received_change";

/// Highest `lastUpdateAt` seen per subscription. Writes keep the maximum.
#[derive(Debug, Default)]
pub(crate) struct LastActivity {
    map: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LastActivity {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, subscription_id: &str, at: DateTime<Utc>) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(subscription_id.to_string())
            .and_modify(|current| {
                if at > *current {
                    *current = at;
                }
            })
            .or_insert(at);
    }

    pub(crate) fn get(&self, subscription_id: &str) -> Option<DateTime<Utc>> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.get(subscription_id).copied()
    }

    /// Entries at or after `since`, or all of them.
    pub(crate) fn entries(&self, since: Option<DateTime<Utc>>) -> Vec<(String, DateTime<Utc>)> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .filter(|(_, at)| since.map_or(true, |since| **at >= since))
            .map(|(id, at)| (id.clone(), *at))
            .collect()
    }
}

impl Context {
    /// Remember that `subscription_id` delivered a change made at `at`.
    pub(crate) fn touch_subscription(&self, subscription_id: &str, at: DateTime<Utc>) {
        if !subscription_id.is_empty() {
            self.last_activity.record(subscription_id, at);
        }
    }

    /// Write tracked activity back to the store. With a window, only
    /// entries newer than `now - window` are written.
    pub(crate) async fn flush_last_activity(&self, window: Option<Duration>) -> usize {
        let since = window.map(|w| Utc::now() - w);
        let entries = self.last_activity.entries(since);
        let mut flushed = 0;
        for (subscription_id, at) in entries {
            match self
                .store
                .update_subscription_last_activity_at(&subscription_id, at)
                .await
            {
                Ok(()) => flushed += 1,
                Err(err) => warn!(
                    subscription_id = %subscription_id,
                    error = %err,
                    "Unable to store subscription last activity"
                ),
            }
        }
        debug!(flushed, "Flushed subscription last activity");
        flushed
    }

    /// Record the change time of the latest applied message in the KV store.
    pub(crate) async fn update_last_received_change(&self, at: DateTime<Utc>) {
        let value = at.timestamp_micros().to_string().into_bytes();
        if let Err(err) = self.sdk.kv_set(LAST_RECEIVED_CHANGE_KEY, value).await {
            warn!(error = %err, "Unable to store last received change date");
        }
    }
}
