//! Web push delivery (RFC 8030) with VAPID authentication (RFC 8292).
//!
//! Payload encryption and JWT signing come from the `web-push` crate; the HTTP
//! request itself goes through a shared `reqwest::Client` so that connections
//! to the push services are pooled across attempts.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage,
    WebPushMessageBuilder,
};

use crate::{cfg::VapidConfig, notification::model::Subscription};

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The push service accepted the message.
    Accepted,
    /// The push service reported the subscription as permanently gone (410).
    Gone,
    /// Anything else. The subscription may still be valid.
    Failed {
        status: Option<u16>,
        message: String,
    },
}

impl DeliveryOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        DeliveryOutcome::Failed {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Accepted)
    }

    /// Human readable error, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Accepted => None,
            DeliveryOutcome::Gone => Some("Received unexpected response code: 410 Gone".to_string()),
            DeliveryOutcome::Failed { message, .. } => Some(message.clone()),
        }
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> DeliveryOutcome;
}

pub struct WebPushTransport {
    client: Client,
    vapid_private_key: String,
    vapid_subject: String,
    ttl: u32,
}

impl WebPushTransport {
    pub fn new(client: Client, vapid: &VapidConfig, ttl: u32) -> Self {
        Self {
            client,
            vapid_private_key: vapid.private_key.clone(),
            vapid_subject: vapid.subject.clone(),
            ttl,
        }
    }

    fn build_message(
        &self,
        subscription: &Subscription,
        payload: &[u8],
    ) -> Result<WebPushMessage, web_push::WebPushError> {
        let info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.p256dh,
            &subscription.auth,
        );

        let mut sig_builder = VapidSignatureBuilder::from_base64(&self.vapid_private_key, &info)?;
        sig_builder.add_claim("sub", self.vapid_subject.as_str());
        let signature = sig_builder.build()?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(self.ttl);
        builder.build()
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> DeliveryOutcome {
        let message = match self.build_message(subscription, payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(endpoint = %subscription.endpoint, error = %err, "failed to build push message");
                return DeliveryOutcome::failed(format!("Failed to build push message: {err}"));
            }
        };

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(urgency) = message.urgency {
            request = request.header("Urgency", urgency.to_string());
        }
        if let Some(topic) = message.topic {
            request = request.header("Topic", topic);
        }
        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");
            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }
            request = request.body(push_payload.content);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(endpoint = %subscription.endpoint, error = %err, "push request failed");
                return DeliveryOutcome::failed(format!("Push request failed: {err}"));
            }
        };

        let status = response.status().as_u16();
        let body = if (200..300).contains(&status) {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        let outcome = classify(status, &body);
        match &outcome {
            DeliveryOutcome::Accepted => debug!(endpoint = %subscription.endpoint, "push accepted"),
            DeliveryOutcome::Gone => {
                info!(endpoint = %subscription.endpoint, "subscription expired (410 Gone)")
            }
            DeliveryOutcome::Failed { .. } => {
                warn!(endpoint = %subscription.endpoint, status, "push rejected")
            }
        }
        outcome
    }
}

/// Maps a push service response status onto a [`DeliveryOutcome`].
pub fn classify(status: u16, body: &str) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Accepted,
        410 => DeliveryOutcome::Gone,
        _ => {
            let message = if body.trim().is_empty() {
                format!("Received unexpected response code: {status}")
            } else {
                format!("Received unexpected response code: {status} ({})", body.trim())
            };
            DeliveryOutcome::Failed {
                status: Some(status),
                message,
            }
        }
    }
}
