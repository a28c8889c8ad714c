//! Change notifications delivered by the Graph webhook.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope posted to the notification and lifecycle endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activities {
    #[serde(default)]
    pub value: Vec<Activity>,
}

/// A single change notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub subscription_id: String,
    #[serde(default)]
    pub client_state: String,
    #[serde(default)]
    pub change_type: String,
    #[serde(default)]
    pub resource: String,
    /// Rich-notification payload, present when the subscription asked for
    /// resource data to be included.
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<EncryptedContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_expiration_date_time: Option<DateTime<Utc>>,
}

/// Encrypted resource data attached to a rich notification.
///
/// `data_key` is the symmetric key wrapped for the subscription's
/// certificate; `data_signature` is an HMAC-SHA256 of `data` under that key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedContent {
    pub data: String,
    pub data_key: String,
    pub data_signature: String,
    #[serde(default)]
    pub encryption_certificate_id: String,
}

/// The kind of change a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeType::Created),
            "updated" => Ok(ChangeType::Updated),
            "deleted" => Ok(ChangeType::Deleted),
            other => Err(format!("unsupported change type: {other}")),
        }
    }
}

/// Lifecycle events Graph sends about a subscription itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    ReauthorizationRequired,
    SubscriptionRemoved,
    Missed,
    Unknown(String),
}

impl LifecycleEvent {
    pub fn parse(s: &str) -> Self {
        match s {
            "reauthorizationRequired" => LifecycleEvent::ReauthorizationRequired,
            "subscriptionRemoved" => LifecycleEvent::SubscriptionRemoved,
            "missed" => LifecycleEvent::Missed,
            other => LifecycleEvent::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LifecycleEvent::ReauthorizationRequired => "reauthorizationRequired",
            LifecycleEvent::SubscriptionRemoved => "subscriptionRemoved",
            LifecycleEvent::Missed => "missed",
            LifecycleEvent::Unknown(s) => s,
        }
    }
}
