use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::warn;

pub const DEFAULT_TITLE: &str = "Push Notification";
pub const DEFAULT_BODY: &str = "You have a new notification!";
pub const DEFAULT_ICON: &str = "/icon-192x192.png";

/// Closed set of recipient groups a subscription can belong to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum UserType {
    #[serde(rename = "user-type-1")]
    #[strum(serialize = "user-type-1")]
    UserType1,
    #[serde(rename = "user-type-2")]
    #[strum(serialize = "user-type-2")]
    UserType2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Subscription as produced by the browser's `PushSubscription.toJSON()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<f64>, // nullable in JSON
    pub keys: PushSubscriptionKeys,
}

/// Stored subscription row, keyed by `endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default, deserialize_with = "lenient_user_type")]
    pub user_type: Option<UserType>,
}

/// Stored rows may carry labels outside the closed set. Those read as no group
/// so that one stray row cannot fail a whole listing.
fn lenient_user_type<'de, D>(deserializer: D) -> Result<Option<UserType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|label| match UserType::from_str(&label) {
        Ok(user_type) => Some(user_type),
        Err(_) => {
            warn!(user_type = %label, "ignoring unknown stored user type");
            None
        }
    }))
}

impl Subscription {
    pub fn from_browser(sub: PushSubscription, user_type: Option<UserType>) -> Self {
        Self {
            endpoint: sub.endpoint,
            p256dh: sub.keys.p256dh,
            auth: sub.keys.auth,
            user_type,
        }
    }
}

/// Body of a subscribe request. Browsers may post the bare subscription or
/// wrap it together with the user type.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubscribeRequest {
    Wrapped {
        subscription: PushSubscription,
        #[serde(rename = "userType", default)]
        user_type: Option<String>,
    },
    Bare {
        #[serde(flatten)]
        subscription: PushSubscription,
        #[serde(rename = "userType", default)]
        user_type: Option<String>,
    },
}

impl SubscribeRequest {
    pub fn into_parts(self) -> (PushSubscription, Option<String>) {
        match self {
            SubscribeRequest::Wrapped {
                subscription,
                user_type,
            }
            | SubscribeRequest::Bare {
                subscription,
                user_type,
            } => (subscription, user_type),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

/// Display fields of one notification. Missing, `null` and empty values fall
/// back to the defaults when the message is built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, deserialize_with = "non_empty")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub icon: Option<String>,
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub icon: String,
}

impl NotificationPayload {
    pub fn into_message(self) -> PushMessage {
        PushMessage {
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: self.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: self.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
        }
    }
}

/// Body of a send request: the payload plus an optional target group.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(flatten)]
    pub payload: NotificationPayload,
    #[serde(rename = "targetUserType", default)]
    pub target_user_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub endpoint: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifySummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<DeliveryResult>,
}

impl NotifySummary {
    pub fn from_results(results: Vec<DeliveryResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            attempted: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}
