use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::json;
use tracing::{info, warn};

use super::model::{DeliveryResult, NotificationPayload, NotifySummary, Subscription, UserType};
use crate::{
    error::NotifyError,
    store::SubscriptionRepository,
    transport::{DeliveryOutcome, PushTransport},
};

/// Runs after every delivery attempt with its outcome.
#[async_trait]
pub trait DeliveryHook: Send + Sync {
    async fn after_delivery(&self, subscription: &Subscription, outcome: &DeliveryOutcome);
}

/// Drops subscriptions the push service reported as gone.
pub struct PruneGone {
    repository: Arc<dyn SubscriptionRepository>,
}

impl PruneGone {
    pub fn new(repository: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl DeliveryHook for PruneGone {
    async fn after_delivery(&self, subscription: &Subscription, outcome: &DeliveryOutcome) {
        if *outcome != DeliveryOutcome::Gone {
            return;
        }
        match self.repository.delete(&subscription.endpoint).await {
            Ok(()) => info!(endpoint = %subscription.endpoint, "removed expired subscription"),
            Err(err) => {
                warn!(endpoint = %subscription.endpoint, error = %err, "failed to remove expired subscription")
            }
        }
    }
}

/// Fans one notification out to every matching subscription.
pub struct Notifier {
    repository: Arc<dyn SubscriptionRepository>,
    transport: Arc<dyn PushTransport>,
    hooks: Vec<Arc<dyn DeliveryHook>>,
    max_concurrency: usize,
}

impl Notifier {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        transport: Arc<dyn PushTransport>,
        max_concurrency: usize,
    ) -> Self {
        let hook: Arc<dyn DeliveryHook> = Arc::new(PruneGone::new(repository.clone()));
        Self {
            repository,
            transport,
            hooks: vec![hook],
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Adds a hook that runs after pruning.
    pub fn with_hook(mut self, hook: Arc<dyn DeliveryHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Delivers `payload` to every subscription of `target` (all of them when
    /// `None`) and reports per-subscription outcomes.
    ///
    /// Only an unknown target or an unreadable store fail the call. Individual
    /// delivery failures are part of the returned summary.
    pub async fn notify(
        &self,
        payload: NotificationPayload,
        target: Option<&str>,
    ) -> Result<NotifySummary, NotifyError> {
        let user_type = target.map(parse_user_type).transpose()?;

        let subscriptions = self.repository.list(user_type).await?;
        if subscriptions.is_empty() {
            info!(user_type = ?user_type, "no subscriptions found");
            return Ok(NotifySummary::default());
        }

        let message = payload.into_message();
        let payload = json!({
            "title": message.title,
            "body": message.body,
            "icon": message.icon,
        })
        .to_string();

        let results: Vec<DeliveryResult> = stream::iter(subscriptions)
            .map(|sub| self.attempt(sub, payload.as_bytes()))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let summary = NotifySummary::from_results(results);
        info!(
            user_type = ?user_type,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "notification fan-out finished"
        );
        Ok(summary)
    }

    async fn attempt(&self, subscription: Subscription, payload: &[u8]) -> DeliveryResult {
        let outcome = self.transport.deliver(&subscription, payload).await;
        for hook in &self.hooks {
            hook.after_delivery(&subscription, &outcome).await;
        }
        DeliveryResult {
            success: outcome.is_success(),
            error: outcome.error_message(),
            endpoint: subscription.endpoint,
        }
    }
}

pub fn parse_user_type(raw: &str) -> Result<UserType, NotifyError> {
    UserType::from_str(raw).map_err(|_| NotifyError::Validation(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StoreError, store::MemoryRepository};
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[derive(Default)]
    struct FakeTransport {
        outcomes: HashMap<String, DeliveryOutcome>,
        calls: AtomicUsize,
        payloads: Mutex<Vec<Vec<u8>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeTransport {
        fn with(outcomes: &[(&str, DeliveryOutcome)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(e, o)| (e.to_string(), o.clone()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PushTransport for FakeTransport {
        async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> DeliveryOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(payload.to_vec());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcomes
                .get(&subscription.endpoint)
                .cloned()
                .unwrap_or(DeliveryOutcome::Accepted)
        }
    }

    /// Store that can be told to fail reads or deletes.
    #[derive(Default)]
    struct FlakyRepository {
        inner: MemoryRepository,
        fail_list: bool,
        fail_delete: bool,
        list_calls: AtomicUsize,
        delete_calls: AtomicUsize,
    }

    fn unavailable() -> StoreError {
        StoreError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    #[async_trait]
    impl SubscriptionRepository for FlakyRepository {
        async fn list(&self, user_type: Option<UserType>) -> Result<Vec<Subscription>, StoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list {
                return Err(unavailable());
            }
            self.inner.list(user_type).await
        }

        async fn upsert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
            self.inner.upsert(subscription).await
        }

        async fn delete(&self, endpoint: &str) -> Result<(), StoreError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete {
                return Err(unavailable());
            }
            self.inner.delete(endpoint).await
        }
    }

    fn sub(endpoint: &str, user_type: Option<UserType>) -> Subscription {
        Subscription {
            endpoint: endpoint.to_string(),
            p256dh: "p256dh".to_string(),
            auth: "auth".to_string(),
            user_type,
        }
    }

    async fn seeded(subs: &[Subscription]) -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::default());
        for s in subs {
            repo.upsert(s.clone()).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_empty_group_skips_transport() {
        let repo = seeded(&[sub("a", Some(UserType::UserType1))]).await;
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(repo, transport.clone(), 4);

        let summary = notifier
            .notify(NotificationPayload::default(), Some("user-type-2"))
            .await
            .unwrap();

        assert_eq!(summary, NotifySummary::default());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_group_touches_nothing() {
        let repo = Arc::new(FlakyRepository::default());
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(repo.clone(), transport.clone(), 4);

        let err = notifier
            .notify(NotificationPayload::default(), Some("admins"))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::Validation(ref g) if g == "admins"));
        assert_eq!(repo.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_aborts() {
        let repo = Arc::new(FlakyRepository {
            fail_list: true,
            ..Default::default()
        });
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(repo, transport.clone(), 4);

        let err = notifier
            .notify(NotificationPayload::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::Store(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gone_is_pruned_other_failures_kept() {
        let repo = seeded(&[sub("ok", None), sub("gone", None), sub("flaky", None)]).await;
        let transport = Arc::new(FakeTransport::with(&[
            ("gone", DeliveryOutcome::Gone),
            (
                "flaky",
                DeliveryOutcome::Failed {
                    status: Some(500),
                    message: "Received unexpected response code: 500".to_string(),
                },
            ),
        ]));
        let notifier = Notifier::new(repo.clone(), transport, 4);

        let summary = notifier
            .notify(NotificationPayload::default(), None)
            .await
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);

        let by_endpoint: HashMap<_, _> = summary
            .results
            .iter()
            .map(|r| (r.endpoint.as_str(), r))
            .collect();
        assert!(by_endpoint["ok"].success);
        assert!(!by_endpoint["gone"].success);
        assert!(!by_endpoint["flaky"].success);
        assert!(!by_endpoint["flaky"].error.as_deref().unwrap().is_empty());

        let remaining: Vec<String> = repo
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert!(!remaining.contains(&"gone".to_string()));
        assert!(remaining.contains(&"flaky".to_string()));
        assert!(remaining.contains(&"ok".to_string()));
    }

    #[tokio::test]
    async fn test_all_success() {
        let endpoints: Vec<String> = (0..5).map(|i| format!("https://push.example.com/{i}")).collect();
        let subs: Vec<Subscription> = endpoints
            .iter()
            .map(|e| sub(e, Some(UserType::UserType1)))
            .collect();
        let repo = seeded(&subs).await;
        let notifier = Notifier::new(repo, Arc::new(FakeTransport::default()), 2);

        let summary = notifier
            .notify(NotificationPayload::default(), Some("user-type-1"))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert!(summary.results.iter().all(|r| r.success && r.error.is_none()));
        let mut got: Vec<String> = summary.results.into_iter().map(|r| r.endpoint).collect();
        got.sort();
        let mut want = endpoints.clone();
        want.sort();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn test_defaults_are_delivered() {
        let repo = seeded(&[sub("a", None)]).await;
        let transport = Arc::new(FakeTransport::default());
        let notifier = Notifier::new(repo, transport.clone(), 1);

        notifier
            .notify(NotificationPayload::default(), None)
            .await
            .unwrap();

        let payloads = transport.payloads.lock().unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(sent["title"], "Push Notification");
        assert_eq!(sent["body"], "You have a new notification!");
        assert_eq!(sent["icon"], "/icon-192x192.png");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let subs: Vec<Subscription> = (0..20).map(|i| sub(&format!("e{i}"), None)).collect();
        let repo = seeded(&subs).await;
        let transport = Arc::new(FakeTransport {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let notifier = Notifier::new(repo, transport.clone(), 3);

        let summary = notifier
            .notify(NotificationPayload::default(), None)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 20);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_prune_hook_ignores_delete_failure() {
        let repo = Arc::new(FlakyRepository {
            fail_delete: true,
            ..Default::default()
        });
        repo.upsert(sub("gone-1", None)).await.unwrap();
        repo.upsert(sub("gone-2", None)).await.unwrap();
        let transport = Arc::new(FakeTransport::with(&[
            ("gone-1", DeliveryOutcome::Gone),
            ("gone-2", DeliveryOutcome::Gone),
        ]));
        let notifier = Notifier::new(repo.clone(), transport, 4);

        let summary = notifier
            .notify(NotificationPayload::default(), None)
            .await
            .unwrap();

        assert_eq!(summary.failed, 2);
        assert_eq!(repo.delete_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prune_hook_only_acts_on_gone() {
        let repo = seeded(&[sub("a", None)]).await;
        let hook = PruneGone::new(repo.clone());

        hook.after_delivery(&sub("a", None), &DeliveryOutcome::Accepted)
            .await;
        hook.after_delivery(&sub("a", None), &DeliveryOutcome::failed("timeout"))
            .await;
        assert_eq!(repo.len().await, 1);

        hook.after_delivery(&sub("a", None), &DeliveryOutcome::Gone)
            .await;
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_custom_hook_runs_alongside_pruning() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(String, bool)>>);

        #[async_trait]
        impl DeliveryHook for Recorder {
            async fn after_delivery(&self, subscription: &Subscription, outcome: &DeliveryOutcome) {
                self.0
                    .lock()
                    .unwrap()
                    .push((subscription.endpoint.clone(), outcome.is_success()));
            }
        }

        let repo = seeded(&[sub("a", None), sub("b", None)]).await;
        let transport = Arc::new(FakeTransport::with(&[("b", DeliveryOutcome::Gone)]));
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(repo.clone(), transport, 2).with_hook(recorder.clone());

        notifier
            .notify(NotificationPayload::default(), None)
            .await
            .unwrap();

        let mut seen = recorder.0.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![("a".to_string(), true), ("b".to_string(), false)]);
        // extra hooks run alongside pruning
        assert_eq!(repo.len().await, 1);
        assert!(repo.get("b").await.is_none());
    }
}
