use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SubscriptionRepository;
use crate::{
    error::StoreError,
    notification::model::{Subscription, UserType},
};

/// In-process store keyed by endpoint. Used for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl MemoryRepository {
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    pub async fn get(&self, endpoint: &str) -> Option<Subscription> {
        self.subscriptions.read().await.get(endpoint).cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryRepository {
    async fn list(&self, user_type: Option<UserType>) -> Result<Vec<Subscription>, StoreError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| user_type.is_none() || s.user_type == user_type)
            .cloned()
            .collect())
    }

    async fn upsert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
        self.subscriptions
            .write()
            .await
            .insert(subscription.endpoint.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn delete(&self, endpoint: &str) -> Result<(), StoreError> {
        self.subscriptions.write().await.remove(endpoint);
        Ok(())
    }
}
