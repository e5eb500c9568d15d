use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;

use super::{ScanPage, StoreResult, UrlStore};
use crate::{
    error::StoreError,
    models::{UrlPatch, UrlRecord},
};

/// Thread-safe in-memory store mapping short_id -> record.
///
/// Backed by a DashMap; writes to one key hold that key's shard lock, which
/// is what makes `increment` atomic. Scans walk keys in sorted order so the
/// last-key cursor is stable.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, UrlRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlStore for MemoryStore {
    async fn put_if_absent(&self, record: &UrlRecord) -> StoreResult<()> {
        match self.inner.entry(record.short_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::KeyExists(record.short_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn put(&self, record: &UrlRecord) -> StoreResult<()> {
        self.inner.insert(record.short_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, short_id: &str) -> StoreResult<Option<UrlRecord>> {
        Ok(self.inner.get(short_id).map(|r| r.clone()))
    }

    async fn increment(&self, short_id: &str, delta: i64) -> StoreResult<i64> {
        let mut record = self
            .inner
            .get_mut(short_id)
            .ok_or_else(|| StoreError::NotFound(short_id.to_owned()))?;
        record.clicks += delta;
        Ok(record.clicks)
    }

    async fn update_fields(&self, short_id: &str, patch: &UrlPatch) -> StoreResult<()> {
        let mut record = self
            .inner
            .get_mut(short_id)
            .ok_or_else(|| StoreError::NotFound(short_id.to_owned()))?;
        if let Some(url) = &patch.original_url {
            record.original_url = url.clone();
        }
        if let Some(expire_at) = patch.expire_at {
            record.expire_at = expire_at;
        }
        Ok(())
    }

    async fn delete(&self, short_id: &str) -> StoreResult<()> {
        self.inner.remove(short_id);
        Ok(())
    }

    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage> {
        let mut keys: Vec<String> = self
            .inner
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| start_after.map_or(true, |after| key.as_str() > after))
            .collect();
        keys.sort_unstable();

        let has_more = keys.len() > limit;
        keys.truncate(limit);

        // A key deleted between the listing and this lookup is simply skipped.
        let records: Vec<UrlRecord> = keys
            .iter()
            .filter_map(|key| self.inner.get(key).map(|r| r.clone()))
            .collect();

        let last_key = if has_more {
            records.last().map(|r| r.short_id.clone())
        } else {
            None
        };

        Ok(ScanPage { records, last_key })
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
