use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use broker::{EventHandler, HandlerError};
use chrono::{DateTime, Duration, Utc};
use common::EventEnvelope;
use tokio::sync::RwLock;

use crate::error::InboxError;

/// A cached processing outcome for one idempotency key.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub processed_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
}

/// Keyed result cache backing [`IdempotentHandler`].
///
/// Implementations are best-effort: entries may expire or be evicted, which
/// at worst causes a redundant (but idempotent) handler invocation.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, InboxError>;

    async fn put(
        &self,
        key: &str,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> Result<(), InboxError>;
}

/// In-memory idempotency store with per-entry expiry.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<RwLock<HashMap<String, (IdempotencyRecord, DateTime<Utc>)>>>,
    fail: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent store calls fail, for exercising the fail-open path.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, InboxError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(InboxError::Store("store unavailable".to_string()));
        }
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((record, expires_at)) if *expires_at > Utc::now() => Ok(Some(record.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> Result<(), InboxError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(InboxError::Store("store unavailable".to_string()));
        }
        let expires_at = Utc::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (record, expires_at));
        Ok(())
    }
}

const DEFAULT_TTL_HOURS: i64 = 24;

/// Wraps an [`EventHandler`] with a keyed result cache.
///
/// The key is `{handler_name}:{event_id}`. A cache hit answers with the
/// stored result without re-invoking the handler. The cache is advisory:
/// store failures are logged and the event is processed normally, trading
/// a possible duplicate invocation for availability.
pub struct IdempotentHandler<H, S> {
    inner: H,
    store: S,
    ttl: Duration,
}

impl<H, S> IdempotentHandler<H, S>
where
    H: EventHandler,
    S: IdempotencyStore,
{
    pub fn new(inner: H, store: S) -> Self {
        Self {
            inner,
            store,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key_for(&self, envelope: &EventEnvelope) -> String {
        format!("{}:{}", self.inner.name(), envelope.event_id)
    }
}

#[async_trait]
impl<H, S> EventHandler for IdempotentHandler<H, S>
where
    H: EventHandler,
    S: IdempotencyStore,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        let key = self.key_for(envelope);

        match self.store.get(&key).await {
            Ok(Some(record)) => {
                tracing::debug!(key, "idempotency cache hit, skipping handler");
                metrics::counter!("idempotency_cache_hits_total").increment(1);
                return Ok(record.result);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key, error = %e, "idempotency lookup failed, processing anyway");
            }
        }

        let result = self.inner.handle(envelope).await?;

        let record = IdempotencyRecord {
            processed_at: Utc::now(),
            result: result.clone(),
        };
        if let Err(e) = self.store.put(&key, record, self.ttl).await {
            tracing::warn!(key, error = %e, "failed to record idempotency key");
        }

        Ok(result)
    }
}
