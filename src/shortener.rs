//! Short-key allocation, resolution and record maintenance.
//!
//! [`Shortener`] owns no state of its own; every operation is a single store
//! round trip (plus bounded retries), so handlers can share one instance
//! behind an `Arc` without locking.

use std::{future::Future, sync::Arc};

use chrono::{SubsecRound, Utc};

use crate::{
    config::{ExpiryMode, ShortenerConfig},
    error::{ShortenerError, StoreError},
    keygen,
    models::{Created, Outcome, Page, UrlPatch, UrlRecord},
    store::{StoreResult, UrlStore},
};

pub type Result<T> = std::result::Result<T, ShortenerError>;

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 1000;

pub struct Shortener {
    store: Arc<dyn UrlStore>,
    config: ShortenerConfig,
}

impl Shortener {
    pub fn new(store: Arc<dyn UrlStore>, config: ShortenerConfig) -> Self {
        Self { store, config }
    }

    /// Public redirect URL for a key.
    pub fn short_url(&self, short_id: &str) -> String {
        format!("{}/{}", self.config.base_url, short_id)
    }

    /// Shorten `original_url`, expiring `expire_in_seconds` from now.
    ///
    /// Zero or negative expiries are accepted and yield an `expire_at` at or
    /// before the creation time. Keys are inserted with insert-if-absent; a
    /// taken key is regenerated up to `collision_retries` times, then once
    /// more per attempt at one character longer before giving up. When a
    /// retried insert reports `KeyExists`, the stored record is compared with
    /// ours so an earlier attempt that landed is not mistaken for a collision.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, original_url: &str, expire_in_seconds: i64) -> Result<Created> {
        let original_url = original_url.trim();
        if original_url.is_empty() {
            return Err(ShortenerError::ValidationFailure(
                "original_url must not be empty".into(),
            ));
        }

        let created_at = Utc::now().trunc_subsecs(0);
        let expire_at = created_at.timestamp().saturating_add(expire_in_seconds);

        let base_len = self.config.key_length;
        let mut attempts = 0;

        for len in [base_len, base_len + 1] {
            for _ in 0..self.config.collision_retries {
                attempts += 1;
                let record = UrlRecord {
                    short_id: keygen::generate(len),
                    original_url: original_url.to_owned(),
                    created_at,
                    expire_at,
                    clicks: 0,
                };

                let mut tries = 0u32;
                let outcome = self
                    .with_retry("put_if_absent", || {
                        tries += 1;
                        self.store.put_if_absent(&record)
                    })
                    .await;

                let outcome = match outcome {
                    Err(StoreError::KeyExists(_)) if tries > 1 => {
                        match self.with_retry("get", || self.store.get(&record.short_id)).await? {
                            Some(stored) if stored.same_link(&record) => Ok(()),
                            _ => outcome,
                        }
                    }
                    other => other,
                };

                match outcome {
                    Ok(()) => {
                        tracing::info!(short_id = %record.short_id, expire_at, "Created short link");
                        return Ok(Created {
                            short_url: self.short_url(&record.short_id),
                            short_id: record.short_id,
                            created_at,
                            expire_at,
                        });
                    }
                    Err(StoreError::KeyExists(key)) => {
                        tracing::debug!(short_id = %key, attempt = attempts, "Short key collision");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            tracing::warn!(len, attempts, "Key space crowded at this length");
        }

        Err(ShortenerError::CollisionExhausted { attempts })
    }

    /// Look up the target of `short_id`.
    ///
    /// In strict mode an expired record resolves to `Expired`; in lenient
    /// mode `expire_at` is ignored.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, short_id: &str) -> Result<String> {
        let record = self.stats(short_id).await?;

        if self.config.expiry_mode == ExpiryMode::Strict && record.is_expired_at(Utc::now()) {
            return Err(ShortenerError::Expired(short_id.to_owned()));
        }

        Ok(record.original_url)
    }

    /// Atomically bump the click counter and return the new value.
    ///
    /// Not retried: a failure after the store applied the increment would
    /// count the click twice.
    pub async fn increment_clicks(&self, short_id: &str) -> Result<i64> {
        Ok(self.store.increment(short_id, 1).await?)
    }

    /// Change the target and/or expiry of an existing key.
    ///
    /// Blank URLs and non-positive expiries count as not provided. With
    /// nothing to change the call succeeds with `success = false`. A new
    /// expiry is measured from now.
    #[tracing::instrument(skip(self))]
    pub async fn update(
        &self,
        short_id: &str,
        new_original_url: Option<&str>,
        new_expire_in_seconds: Option<i64>,
    ) -> Result<Outcome> {
        let patch = UrlPatch {
            original_url: new_original_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned),
            expire_at: new_expire_in_seconds
                .filter(|secs| *secs > 0)
                .map(|secs| Utc::now().timestamp().saturating_add(secs)),
        };

        if patch.is_empty() {
            return Ok(Outcome::rejected("No update fields provided"));
        }

        self.with_retry("update_fields", || self.store.update_fields(short_id, &patch))
            .await?;

        tracing::info!(short_id, "Updated short link");
        Ok(Outcome::ok("URL updated successfully"))
    }

    /// Remove a key. Succeeds whether or not it existed.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, short_id: &str) -> Result<Outcome> {
        self.with_retry("delete", || self.store.delete(short_id))
            .await?;

        tracing::info!(short_id, "Deleted short link");
        Ok(Outcome::ok("URL deleted successfully"))
    }

    /// Full record snapshot, regardless of expiry.
    pub async fn stats(&self, short_id: &str) -> Result<UrlRecord> {
        self.with_retry("get", || self.store.get(short_id))
            .await?
            .ok_or_else(|| ShortenerError::NotFound(short_id.to_owned()))
    }

    /// One page of records after `cursor`.
    ///
    /// Non-positive limits use the default page size; large ones are capped.
    /// The cursor is the last key of the previous page, which is only exact
    /// while the store's scan order holds still between calls.
    pub async fn list(&self, limit: i64, cursor: Option<&str>) -> Result<Page> {
        let limit = match usize::try_from(limit) {
            Ok(0) | Err(_) => DEFAULT_PAGE_SIZE,
            Ok(n) => n.min(MAX_PAGE_SIZE),
        };
        let cursor = cursor.filter(|c| !c.is_empty());

        let page = self
            .with_retry("scan", || self.store.scan(limit, cursor))
            .await?;

        Ok(Page {
            records: page.records,
            next_cursor: page.last_key,
        })
    }

    /// `true` if the store answers a ping.
    pub async fn is_healthy(&self) -> bool {
        match self.with_retry("ping", || self.store.ping()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Store health check failed");
                false
            }
        }
    }

    /// Run an idempotent store call, retrying backend failures with
    /// exponential backoff. Outcomes like `KeyExists` or `NotFound` are
    /// returned straight away.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut backoff = self.config.store_retry_backoff;
        let mut attempt = 0;

        loop {
            match call().await {
                Err(StoreError::Backend(msg)) if attempt < self.config.store_retries => {
                    attempt += 1;
                    tracing::warn!(op, attempt, error = %msg, "Store call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{MemoryStore, ScanPage};
    use async_trait::async_trait;
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    pub(crate) fn test_config() -> ShortenerConfig {
        ShortenerConfig {
            base_url: "http://sn.test".into(),
            store_retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    pub(crate) fn memory_shortener() -> Shortener {
        Shortener::new(Arc::new(MemoryStore::new()), test_config())
    }

    /// Wraps a MemoryStore, failing the first `collisions` inserts with
    /// `KeyExists` and the first `failures` reads with a backend error.
    /// `put_failures` inserts fail with a backend error before anything is
    /// written; `lost_acks` inserts are applied but still report one.
    struct Unlucky {
        inner: MemoryStore,
        collisions: AtomicUsize,
        failures: AtomicUsize,
        put_failures: AtomicUsize,
        lost_acks: AtomicUsize,
        increments: AtomicUsize,
    }

    impl Unlucky {
        fn new(collisions: usize, failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                collisions: AtomicUsize::new(collisions),
                failures: AtomicUsize::new(failures),
                put_failures: AtomicUsize::new(0),
                lost_acks: AtomicUsize::new(0),
                increments: AtomicUsize::new(0),
            }
        }

        fn take(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl UrlStore for Unlucky {
        async fn put_if_absent(&self, record: &UrlRecord) -> StoreResult<()> {
            if Self::take(&self.put_failures) {
                return Err(StoreError::Backend("timed out".into()));
            }
            if Self::take(&self.collisions) {
                return Err(StoreError::KeyExists(record.short_id.clone()));
            }
            self.inner.put_if_absent(record).await?;
            if Self::take(&self.lost_acks) {
                return Err(StoreError::Backend("timed out".into()));
            }
            Ok(())
        }

        async fn put(&self, record: &UrlRecord) -> StoreResult<()> {
            self.inner.put(record).await
        }

        async fn get(&self, short_id: &str) -> StoreResult<Option<UrlRecord>> {
            if Self::take(&self.failures) {
                return Err(StoreError::Backend("throttled".into()));
            }
            self.inner.get(short_id).await
        }

        async fn increment(&self, short_id: &str, delta: i64) -> StoreResult<i64> {
            self.increments.fetch_add(1, Ordering::SeqCst);
            if Self::take(&self.failures) {
                return Err(StoreError::Backend("throttled".into()));
            }
            self.inner.increment(short_id, delta).await
        }

        async fn update_fields(&self, short_id: &str, patch: &UrlPatch) -> StoreResult<()> {
            self.inner.update_fields(short_id, patch).await
        }

        async fn delete(&self, short_id: &str) -> StoreResult<()> {
            self.inner.delete(short_id).await
        }

        async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage> {
            self.inner.scan(limit, start_after).await
        }

        async fn ping(&self) -> StoreResult<()> {
            if Self::take(&self.failures) {
                return Err(StoreError::Backend("unreachable".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_then_resolve_returns_the_url() {
        let shortener = memory_shortener();
        let created = shortener.create("https://example.com", 3600).await.unwrap();

        assert_eq!(created.short_id.len(), 6);
        assert!(created.short_id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(
            created.short_url,
            format!("http://sn.test/{}", created.short_id)
        );
        assert_eq!(created.expire_at, created.created_at.timestamp() + 3600);

        let url = shortener.resolve(&created.short_id).await.unwrap();
        assert_eq!(url, "https://example.com");

        let stats = shortener.stats(&created.short_id).await.unwrap();
        assert_eq!(stats.clicks, 0);
        assert_eq!(stats.created_at, created.created_at);
    }

    #[tokio::test]
    async fn create_rejects_blank_url() {
        let shortener = memory_shortener();
        let err = shortener.create("   ", 60).await.unwrap_err();
        assert!(matches!(err, ShortenerError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn negative_expiry_is_allowed_and_lands_in_the_past() {
        let shortener = memory_shortener();
        let created = shortener.create("https://example.com", -5).await.unwrap();
        assert!(created.expire_at < Utc::now().timestamp());

        let err = shortener.resolve(&created.short_id).await.unwrap_err();
        assert!(matches!(err, ShortenerError::Expired(_)));
    }

    #[tokio::test]
    async fn lenient_mode_ignores_expiry() {
        let config = ShortenerConfig {
            expiry_mode: ExpiryMode::Lenient,
            ..test_config()
        };
        let shortener = Shortener::new(Arc::new(MemoryStore::new()), config);
        let created = shortener.create("https://example.com", -5).await.unwrap();

        let url = shortener.resolve(&created.short_id).await.unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[tokio::test]
    async fn resolve_unknown_key_is_not_found() {
        let shortener = memory_shortener();
        let err = shortener.resolve("doesnotexist").await.unwrap_err();
        assert!(matches!(err, ShortenerError::NotFound(_)));
    }

    #[tokio::test]
    async fn collisions_are_regenerated() {
        let store = Arc::new(Unlucky::new(3, 0));
        let shortener = Shortener::new(store.clone(), test_config());

        let created = shortener.create("https://example.com", 60).await.unwrap();
        assert_eq!(created.short_id.len(), 6);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn crowded_key_space_widens_the_key() {
        // Every attempt at the base length collides.
        let store = Arc::new(Unlucky::new(5, 0));
        let shortener = Shortener::new(store, test_config());

        let created = shortener.create("https://example.com", 60).await.unwrap();
        assert_eq!(created.short_id.len(), 7);
    }

    #[tokio::test]
    async fn permanent_collisions_exhaust() {
        let store = Arc::new(Unlucky::new(usize::MAX, 0));
        let shortener = Shortener::new(store, test_config());

        let err = shortener.create("https://example.com", 60).await.unwrap_err();
        assert!(matches!(
            err,
            ShortenerError::CollisionExhausted { attempts: 10 }
        ));
    }

    #[tokio::test]
    async fn retried_insert_that_landed_is_not_duplicated() {
        let store = Arc::new(Unlucky::new(0, 0));
        store.lost_acks.store(1, Ordering::SeqCst);
        let shortener = Shortener::new(store.clone(), test_config());

        let created = shortener.create("https://example.com", 60).await.unwrap();
        assert_eq!(store.inner.len(), 1);
        assert_eq!(
            shortener.resolve(&created.short_id).await.unwrap(),
            "https://example.com"
        );
    }

    #[tokio::test]
    async fn retried_insert_still_sees_real_collisions() {
        // The first insert fails before writing; its retry hits a taken key.
        let store = Arc::new(Unlucky::new(1, 0));
        store.put_failures.store(1, Ordering::SeqCst);
        let shortener = Shortener::new(store.clone(), test_config());

        let created = shortener.create("https://example.com", 60).await.unwrap();
        assert_eq!(store.inner.len(), 1);
        assert_eq!(store.collisions.load(Ordering::SeqCst), 0);
        assert_eq!(
            shortener.resolve(&created.short_id).await.unwrap(),
            "https://example.com"
        );
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried() {
        let store = Arc::new(Unlucky::new(0, 2));
        let shortener = Shortener::new(store, test_config());
        let created = {
            // Creating does not touch `get`, so the failures are still pending.
            shortener.create("https://example.com", 60).await.unwrap()
        };

        let url = shortener.resolve(&created.short_id).await.unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let store = Arc::new(Unlucky::new(0, 10));
        let shortener = Shortener::new(store, test_config());

        let err = shortener.stats("anything").await.unwrap_err();
        assert!(matches!(err, ShortenerError::PersistenceFailure(_)));
    }

    #[tokio::test]
    async fn increments_are_not_retried() {
        let store = Arc::new(Unlucky::new(0, 0));
        let shortener = Shortener::new(store.clone(), test_config());
        let created = shortener.create("https://example.com", 60).await.unwrap();

        store.failures.store(1, Ordering::SeqCst);
        let err = shortener.increment_clicks(&created.short_id).await.unwrap_err();
        assert!(matches!(err, ShortenerError::PersistenceFailure(_)));
        assert_eq!(store.increments.load(Ordering::SeqCst), 1);
        assert_eq!(shortener.stats(&created.short_id).await.unwrap().clicks, 0);
    }

    #[tokio::test]
    async fn increment_unknown_key_is_not_found() {
        let shortener = memory_shortener();
        let err = shortener.increment_clicks("nope").await.unwrap_err();
        assert!(matches!(err, ShortenerError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let shortener = Arc::new(memory_shortener());
        let created = shortener.create("https://example.com", 60).await.unwrap();

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let shortener = shortener.clone();
                let key = created.short_id.clone();
                tokio::spawn(async move { shortener.increment_clicks(&key).await.unwrap() })
            })
            .collect();

        let mut returned = HashSet::new();
        for task in tasks {
            returned.insert(task.await.unwrap());
        }

        // Every increment observed a distinct post-increment value.
        assert_eq!(returned.len(), 200);
        assert_eq!(shortener.stats(&created.short_id).await.unwrap().clicks, 200);
    }

    #[tokio::test]
    async fn update_without_fields_is_a_soft_failure() {
        let shortener = memory_shortener();
        let created = shortener.create("https://example.com", 60).await.unwrap();

        let outcome = shortener
            .update(&created.short_id, None, None)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "No update fields provided");

        let outcome = shortener
            .update(&created.short_id, Some("  "), Some(0))
            .await
            .unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn update_measures_expiry_from_now() {
        let shortener = memory_shortener();
        let created = shortener.create("https://example.com", -1000).await.unwrap();

        let before = Utc::now().timestamp();
        let outcome = shortener
            .update(&created.short_id, Some("https://new.example"), Some(600))
            .await
            .unwrap();
        assert!(outcome.success);

        let record = shortener.stats(&created.short_id).await.unwrap();
        assert_eq!(record.original_url, "https://new.example");
        assert!(record.expire_at >= before + 600);
        assert_eq!(record.created_at, created.created_at);
        assert_eq!(
            shortener.resolve(&created.short_id).await.unwrap(),
            "https://new.example"
        );
    }

    #[tokio::test]
    async fn update_unknown_key_is_not_found() {
        let shortener = memory_shortener();
        let err = shortener
            .update("nope", Some("https://x.example"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShortenerError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let shortener = memory_shortener();
        let created = shortener.create("https://example.com", 60).await.unwrap();

        assert!(shortener.delete(&created.short_id).await.unwrap().success);
        assert!(shortener.delete(&created.short_id).await.unwrap().success);
        assert!(shortener.delete("neverexisted").await.unwrap().success);

        let err = shortener.resolve(&created.short_id).await.unwrap_err();
        assert!(matches!(err, ShortenerError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_pages_through_everything_once() {
        let shortener = memory_shortener();
        let mut expected = HashSet::new();
        for i in 0..11 {
            let created = shortener
                .create(&format!("https://example.com/{i}"), 60)
                .await
                .unwrap();
            expected.insert(created.short_id);
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = shortener.list(4, cursor.as_deref()).await.unwrap();
            assert!(page.records.len() <= 4);
            seen.extend(page.records.into_iter().map(|r| r.short_id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 11);
        assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[tokio::test]
    async fn list_normalises_limit_and_empty_cursor() {
        let shortener = memory_shortener();
        for i in 0..30 {
            shortener
                .create(&format!("https://example.com/{i}"), 60)
                .await
                .unwrap();
        }

        let page = shortener.list(0, Some("")).await.unwrap();
        assert_eq!(page.records.len(), DEFAULT_PAGE_SIZE);
        assert!(page.next_cursor.is_some());

        let page = shortener.list(-3, None).await.unwrap();
        assert_eq!(page.records.len(), DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn health_reflects_store_ping() {
        assert!(memory_shortener().is_healthy().await);

        let down = Shortener::new(Arc::new(Unlucky::new(0, usize::MAX)), test_config());
        assert!(!down.is_healthy().await);
    }
}
