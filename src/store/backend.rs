use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{SubscriptionRepository, ensure_success, join_url};
use crate::{
    error::StoreError,
    notification::model::{Subscription, UserType},
};

/// Delegates persistence to a separate backend service that owns the table.
#[derive(Debug, Clone)]
pub struct BackendRepository {
    client: Client,
    base_url: String,
}

impl BackendRepository {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for BackendRepository {
    async fn list(&self, user_type: Option<UserType>) -> Result<Vec<Subscription>, StoreError> {
        let mut req = self.client.get(join_url(&self.base_url, "subscriptions"));
        if let Some(user_type) = user_type {
            req = req.query(&[("user_type", user_type.as_ref())]);
        }

        let resp = ensure_success(req.send().await?).await?;
        resp.json::<Vec<Subscription>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn upsert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
        let resp = self
            .client
            .post(join_url(&self.base_url, "subscribe"))
            .json(&subscription)
            .send()
            .await?;
        let body = ensure_success(resp).await?.text().await?;

        // The backend may echo the row or reply with an acknowledgement only.
        match serde_json::from_str::<Subscription>(&body) {
            Ok(stored) => Ok(stored),
            Err(_) => {
                debug!(endpoint = %subscription.endpoint, "backend did not echo subscription");
                Ok(subscription)
            }
        }
    }

    async fn delete(&self, endpoint: &str) -> Result<(), StoreError> {
        let resp = self
            .client
            .delete(join_url(&self.base_url, "subscribe"))
            .json(&json!({ "endpoint": endpoint }))
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }
}
