use serde_json::json;
use tracing::{error, info, warn};

use super::{
    model::{SendRequest, SubscribeRequest, Subscription, UnsubscribeRequest},
    svc::parse_user_type,
};
use crate::{
    error::NotifyError,
    server::{AppState, BAD_REQUEST, INTERNAL_SERVER_ERROR, OK_RESPONSE},
};

/// `(status line, json body)` handed back to the router.
pub type Reply = (&'static str, String);

fn error_reply(status: &'static str, message: &str) -> Reply {
    (status, json!({ "error": message }).to_string())
}

pub async fn register_subs(body: Option<&str>, state: &AppState) -> Reply {
    let Some(body) = body else {
        return error_reply(BAD_REQUEST, "Missing request body");
    };
    let request = match serde_json::from_str::<SubscribeRequest>(body) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "invalid subscribe body");
            return error_reply(BAD_REQUEST, "Invalid subscription");
        }
    };
    let (push_subscription, user_type) = request.into_parts();

    let user_type = match user_type.as_deref().map(parse_user_type).transpose() {
        Ok(user_type) => user_type,
        Err(_) => return error_reply(BAD_REQUEST, "Invalid or missing user type"),
    };
    if url::Url::parse(&push_subscription.endpoint).is_err() {
        return error_reply(BAD_REQUEST, "Invalid subscription endpoint");
    }

    let subscription = Subscription::from_browser(push_subscription, user_type);
    match state.repository.upsert(subscription).await {
        Ok(stored) => {
            info!(endpoint = %stored.endpoint, user_type = ?stored.user_type, "subscription stored");
            (OK_RESPONSE, json!({ "success": true, "data": stored }).to_string())
        }
        Err(err) => {
            error!(error = %err, "failed to store subscription");
            error_reply(INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

pub async fn unregister_subs(body: Option<&str>, state: &AppState) -> Reply {
    let request = match body.map(serde_json::from_str::<UnsubscribeRequest>) {
        Some(Ok(request)) => request,
        _ => return error_reply(BAD_REQUEST, "Missing endpoint"),
    };

    match state.repository.delete(&request.endpoint).await {
        Ok(()) => {
            info!(endpoint = %request.endpoint, "subscription removed");
            (OK_RESPONSE, json!({ "success": true }).to_string())
        }
        Err(err) => {
            error!(error = %err, "failed to remove subscription");
            error_reply(INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

pub async fn push_notification(body: Option<&str>, state: &AppState) -> Reply {
    // an empty body means "send the defaults to everyone"
    let body = body.filter(|b| !b.trim().is_empty()).unwrap_or("{}");
    let request = match serde_json::from_str::<SendRequest>(body) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "invalid send body");
            return error_reply(BAD_REQUEST, "Invalid notification payload");
        }
    };

    match state
        .notifier
        .notify(request.payload, request.target_user_type.as_deref())
        .await
    {
        Ok(summary) => (
            OK_RESPONSE,
            json!({
                "success": true,
                "attempted": summary.attempted,
                "succeeded": summary.succeeded,
                "failed": summary.failed,
                "results": summary.results,
            })
            .to_string(),
        ),
        Err(NotifyError::Validation(group)) => {
            warn!(user_type = %group, "rejected unknown user type");
            error_reply(BAD_REQUEST, "Invalid or missing user type")
        }
        Err(NotifyError::Store(err)) => {
            error!(error = %err, "failed to fetch subscriptions");
            error_reply(INTERNAL_SERVER_ERROR, "Failed to fetch subscriptions")
        }
    }
}

pub fn vapid_public_key(state: &AppState) -> Reply {
    (
        OK_RESPONSE,
        json!({ "publicKey": state.vapid_public_key }).to_string(),
    )
}
