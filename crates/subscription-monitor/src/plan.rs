//! Pure reconciliation planning: what to do with one subscription target
//! given its local rows and what Graph reports.

use std::collections::HashMap;

use bridge_core::{GraphSubscription, SubscriptionTarget};
use chrono::{DateTime, Utc};
use link_store::Subscription;
use tracing::debug;

/// Everything known about one target at check time.
#[derive(Debug, Clone)]
pub(crate) struct TargetState {
    pub(crate) target: SubscriptionTarget,
    /// Whether the bridge needs a subscription for this target.
    pub(crate) desired: bool,
    /// Local rows, newest `expires_on` first.
    pub(crate) local: Vec<Subscription>,
    /// Graph subscriptions, newest `expires_on` first.
    pub(crate) remote: Vec<GraphSubscription>,
}

/// Group local rows and Graph subscriptions per target.
///
/// Targets come out in a stable order: desired ones first, then those only
/// known locally, then those only known to Graph. Graph subscriptions for
/// resources the bridge does not manage are left out.
pub(crate) fn group(
    desired: &[SubscriptionTarget],
    local: Vec<Subscription>,
    remote: Vec<GraphSubscription>,
) -> Vec<TargetState> {
    let mut states: Vec<TargetState> = Vec::new();
    let mut index: HashMap<SubscriptionTarget, usize> = HashMap::new();

    let mut slot = |target: SubscriptionTarget, states: &mut Vec<TargetState>| -> usize {
        *index.entry(target.clone()).or_insert_with(|| {
            states.push(TargetState {
                target,
                desired: false,
                local: Vec::new(),
                remote: Vec::new(),
            });
            states.len() - 1
        })
    };

    for target in desired {
        let i = slot(target.clone(), &mut states);
        states[i].desired = true;
    }
    for sub in local {
        let i = slot(sub.target(), &mut states);
        states[i].local.push(sub);
    }
    for sub in remote {
        let Some(target) = SubscriptionTarget::from_resource(&sub.resource) else {
            debug!(subscription_id = %sub.id, resource = %sub.resource, "Ignoring subscription to an unmanaged resource");
            continue;
        };
        let i = slot(target, &mut states);
        states[i].remote.push(sub);
    }

    for state in &mut states {
        state.local.sort_by(|a, b| b.expires_on.cmp(&a.expires_on));
        state.remote.sort_by(|a, b| b.expires_on.cmp(&a.expires_on));
    }
    states
}

/// Why a subscription is being recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drift {
    /// Graph no longer knows the subscription.
    Missing,
    /// Too close to expiry to refresh.
    Expiring,
    /// Created under another webhook secret.
    Secret,
    /// Created with another encryption certificate.
    Certificate,
}

impl Drift {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Drift::Missing => "missing",
            Drift::Expiring => "expiring",
            Drift::Secret => "secret",
            Drift::Certificate => "certificate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// Healthy: extend it in place.
    Refresh(Subscription),
    /// Delete it on both sides and subscribe again.
    Recreate(Subscription, Drift),
    /// Nothing exists yet: subscribe.
    Connect,
    /// No longer needed: delete it on both sides.
    Remove(Subscription),
}

/// Decisions for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Plan {
    pub(crate) action: Option<Action>,
    /// Duplicate local rows.
    pub(crate) delete_local: Vec<String>,
    /// Duplicate or orphaned Graph subscriptions.
    pub(crate) delete_remote: Vec<String>,
    /// Local row to save in place of the current one, pointing at the Graph
    /// subscription that is kept.
    pub(crate) repoint: Option<Subscription>,
}

/// Settings the decision depends on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expectations<'a> {
    pub(crate) secret: &'a str,
    pub(crate) certificate: &'a str,
    pub(crate) expiry_buffer: chrono::Duration,
}

/// Decide what to do with one target.
///
/// The local row expiring last is kept. Of several Graph subscriptions for a
/// needed target, the one expiring last is kept, and the local row is
/// re-pointed at it when it tracked another.
pub(crate) fn decide(state: &TargetState, now: DateTime<Utc>, expect: Expectations<'_>) -> Plan {
    let mut plan = Plan::default();

    let newest = state.local.first();
    plan.delete_local = state
        .local
        .iter()
        .skip(1)
        .map(|sub| sub.subscription_id.clone())
        .collect();

    let kept = match (state.desired, newest) {
        (true, Some(_)) => state.remote.first(),
        // Removing it deletes the matching Graph subscription too.
        (false, Some(local)) => state.remote.iter().find(|r| r.id == local.subscription_id),
        (_, None) => None,
    };
    plan.delete_remote = state
        .remote
        .iter()
        .filter(|r| kept.map_or(true, |k| k.id != r.id))
        .map(|r| r.id.clone())
        .collect();

    plan.action = match (state.desired, newest, kept) {
        (false, Some(local), _) => Some(Action::Remove(local.clone())),
        (false, None, _) => None,
        (true, None, _) => Some(Action::Connect),
        (true, Some(local), None) => Some(Action::Recreate(local.clone(), Drift::Missing)),
        (true, Some(local), Some(remote)) => {
            let local = if remote.id == local.subscription_id {
                local.clone()
            } else {
                let repointed = Subscription {
                    subscription_id: remote.id.clone(),
                    expires_on: remote.expires_on,
                    ..local.clone()
                };
                plan.repoint = Some(repointed.clone());
                repointed
            };

            let drift = if local.secret != expect.secret {
                Some(Drift::Secret)
            } else if local.certificate != expect.certificate
                || remote.certificate.as_deref().unwrap_or_default() != expect.certificate
            {
                Some(Drift::Certificate)
            } else if local.expires_on - now < expect.expiry_buffer {
                Some(Drift::Expiring)
            } else {
                None
            };
            Some(match drift {
                Some(drift) => Action::Recreate(local, drift),
                None => Action::Refresh(local),
            })
        }
    };
    plan
}
