//! In-memory queue backend for tests and embedding.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::{NewQueueItem, PipelineResult, QueueBackend, QueueItem, QueueStatus};

struct Inner {
    next_id: i64,
    items: BTreeMap<i64, QueueItem>,
}

/// Ordered in-memory queue. Ids start at 1 and are never reused.
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                items: BTreeMap::new(),
            }),
        }
    }

    /// Snapshot of every stored item, ascending by id.
    pub fn items(&self) -> Vec<QueueItem> {
        self.inner.lock().items.values().cloned().collect()
    }
}

impl QueueBackend for InMemoryQueue {
    fn insert(&self, item: &NewQueueItem) -> PipelineResult<i64> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.items.insert(
            id,
            QueueItem {
                id,
                category: item.category.clone(),
                subcategory: item.subcategory.clone(),
                payload: item.payload.clone(),
                created_at_ms: item.created_at_ms,
                status: QueueStatus::Pending,
            },
        );
        Ok(id)
    }

    fn fetch_after(
        &self,
        cursor: i64,
        limit: usize,
        status: QueueStatus,
    ) -> PipelineResult<Vec<QueueItem>> {
        let inner = self.inner.lock();
        Ok(inner
            .items
            .range(cursor.saturating_add(1)..)
            .map(|(_, item)| item)
            .filter(|item| item.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    fn update_status_batch(
        &self,
        ids: &[i64],
        status: QueueStatus,
        now_ms: i64,
    ) -> PipelineResult<usize> {
        let mut updated = 0;
        for &id in ids {
            if self.update_status(id, status, now_ms)? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn update_status(&self, id: i64, status: QueueStatus, _now_ms: i64) -> PipelineResult<bool> {
        let mut inner = self.inner.lock();
        match inner.items.get_mut(&id) {
            Some(item) if item.status == QueueStatus::Pending => {
                item.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_older_than(&self, status: QueueStatus, cutoff_ms: i64) -> PipelineResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        inner
            .items
            .retain(|_, item| !(item.status == status && item.created_at_ms < cutoff_ms));
        Ok(before - inner.items.len())
    }

    fn count(&self, status: QueueStatus) -> PipelineResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.items.values().filter(|i| i.status == status).count() as u64)
    }
}
