use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;
use lru::LruCache;

use super::fingerprint::Fingerprint;

/// 默认软上限
pub const DEFAULT_SOFT_LIMIT: usize = 50;

/// 处理结果缓存：指纹 → PNG 字节。
///
/// 按插入顺序淘汰（最早插入的先走），查询不刷新顺序，所以这不是 LRU；
/// 这里只借用 `LruCache` 的有序链表，读用 `peek`、覆盖用 `peek_mut` 保持原有位置。
///
/// 淘汰在插入之前检查且只淘汰一条，条目数最多为 `soft_limit + 1`。
/// 检查、淘汰、插入在同一把锁内完成。
pub struct ResultCache {
    soft_limit: usize,
    entries: Mutex<LruCache<Fingerprint, Bytes>>,
}

impl ResultCache {
    pub fn new(soft_limit: usize) -> Self {
        Self {
            soft_limit,
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<Fingerprint, Bytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &Fingerprint) -> Option<Bytes> {
        self.lock().peek(key).cloned()
    }

    pub fn put(&self, key: Fingerprint, value: Bytes) {
        let mut entries = self.lock();

        if let Some(slot) = entries.peek_mut(&key) {
            *slot = value;
            return;
        }

        if entries.len() > self.soft_limit
            && let Some((evicted, _)) = entries.pop_lru()
        {
            tracing::debug!(fingerprint = %evicted, "结果缓存淘汰最早条目");
        }
        entries.push(key, value);
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn soft_limit(&self) -> usize {
        self.soft_limit
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_LIMIT)
    }
}
