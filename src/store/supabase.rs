use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{SubscriptionRepository, ensure_success, join_url};
use crate::{
    error::StoreError,
    notification::model::{Subscription, UserType},
};

const TABLE_PATH: &str = "rest/v1/push_subscriptions";

/// `push_subscriptions` table reached through Supabase's PostgREST API.
#[derive(Debug, Clone)]
pub struct SupabaseRepository {
    client: Client,
    table_url: String,
    anon_key: String,
}

impl SupabaseRepository {
    pub fn new(client: Client, base_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            table_url: join_url(base_url, TABLE_PATH),
            anon_key: anon_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }
}

#[async_trait]
impl SubscriptionRepository for SupabaseRepository {
    async fn list(&self, user_type: Option<UserType>) -> Result<Vec<Subscription>, StoreError> {
        let mut req = self.request(reqwest::Method::GET).query(&[("select", "*")]);
        if let Some(user_type) = user_type {
            req = req.query(&[("user_type", format!("eq.{user_type}"))]);
        }

        let resp = ensure_success(req.send().await?).await?;
        let rows = resp
            .json::<Vec<Subscription>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        debug!(count = rows.len(), user_type = ?user_type, "fetched subscriptions");
        Ok(rows)
    }

    async fn upsert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
        let req = self
            .request(reqwest::Method::POST)
            .query(&[("on_conflict", "endpoint")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&subscription);

        let resp = ensure_success(req.send().await?).await?;
        let mut rows = resp
            .json::<Vec<Subscription>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if rows.is_empty() {
            warn!(endpoint = %subscription.endpoint, "upsert returned no representation");
            return Ok(subscription);
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete(&self, endpoint: &str) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::DELETE)
            .query(&[("endpoint", format!("eq.{endpoint}"))]);
        ensure_success(req.send().await?).await?;
        Ok(())
    }
}
