//! Subscription persistence.
//!
//! The fan-out engine only sees [`SubscriptionRepository`]. Which variant backs
//! it is decided once at startup from [`StoreConfig`].

pub mod backend;
pub mod memory;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Response;

use crate::{
    cfg::StoreConfig,
    error::StoreError,
    notification::model::{Subscription, UserType},
};

pub use backend::BackendRepository;
pub use memory::MemoryRepository;
pub use supabase::SupabaseRepository;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// All subscriptions, or only those of `user_type` when given.
    async fn list(&self, user_type: Option<UserType>) -> Result<Vec<Subscription>, StoreError>;

    /// Inserts or replaces the subscription with the same endpoint.
    async fn upsert(&self, subscription: Subscription) -> Result<Subscription, StoreError>;

    /// Removes the subscription with `endpoint`. Unknown endpoints are not an error.
    async fn delete(&self, endpoint: &str) -> Result<(), StoreError>;
}

pub fn from_config(cfg: &StoreConfig, client: reqwest::Client) -> Arc<dyn SubscriptionRepository> {
    match cfg {
        StoreConfig::Memory => Arc::new(MemoryRepository::default()),
        StoreConfig::Supabase { url, anon_key } => {
            Arc::new(SupabaseRepository::new(client, url.as_str(), anon_key))
        }
        StoreConfig::Backend { url } => Arc::new(BackendRepository::new(client, url.as_str())),
    }
}

/// Turns a non-2xx response into [`StoreError::Status`].
pub(crate) async fn ensure_success(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
