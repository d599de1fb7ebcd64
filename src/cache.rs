//! 翻译缓存
//!
//! 以 `(text, source_lang, target_lang)` 的哈希为键，带 TTL 的进程内缓存。
//! 超出容量时淘汰创建时间最早的条目。缓存不会持久化。

use std::collections::HashMap;
use std::time::Duration;

use blake3::Hasher;
use tokio::time::Instant;
use tracing::debug;

use crate::types::TranslationResult;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: TranslationResult,
    pub created_at: Instant,
}

impl CacheEntry {
    /// 检查是否过期
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }

    /// 生成缓存键
    pub fn generate_key(text: &str, source_lang: &str, target_lang: &str) -> String {
        let mut hasher = Hasher::new();
        hasher.update(text.as_bytes());
        hasher.update(&[0]);
        hasher.update(source_lang.as_bytes());
        hasher.update(&[0]);
        hasher.update(target_lang.as_bytes());
        format!("trans:{}", hasher.finalize().to_hex())
    }
}

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired_items: u64,
    pub evictions: u64,
}

/// 翻译缓存
#[derive(Debug)]
pub struct TranslationCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    capacity: usize,
    stats: CacheStats,
}

impl TranslationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
            stats: CacheStats::default(),
        }
    }

    /// 查询未过期的缓存项，过期项会被顺带删除
    pub fn get(&mut self, text: &str, source_lang: &str, target_lang: &str) -> Option<TranslationResult> {
        let key = CacheEntry::generate_key(text, source_lang, target_lang);
        let expired = match self.entries.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(&key);
            self.stats.expired_items += 1;
        }
        self.stats.misses += 1;
        None
    }

    /// 写入缓存
    ///
    /// 新键写入前若已满，先清理过期项，仍然满时淘汰创建时间最早的条目，
    /// 因此刚写入的条目不会被淘汰。
    pub fn insert(&mut self, text: &str, source_lang: &str, target_lang: &str, value: TranslationResult) {
        let key = CacheEntry::generate_key(text, source_lang, target_lang);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.cleanup_expired();
            while self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .values()
                    .min_by_key(|entry| entry.created_at)
                    .map(|entry| entry.key.clone());
                match oldest {
                    Some(oldest) => {
                        debug!(key = %oldest, "缓存已满，淘汰最早的条目");
                        self.entries.remove(&oldest);
                        self.stats.evictions += 1;
                    }
                    None => break,
                }
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// 清理过期项
    fn cleanup_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "清理过期缓存项");
        }
        self.stats.expired_items += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TranslationOrigin;

    fn result(text: &str) -> TranslationResult {
        TranslationResult::new(text, "en", "tr", TranslationOrigin::Primary)
    }

    #[test]
    fn keys_separate_language_pairs() {
        let a = CacheEntry::generate_key("hello", "en", "tr");
        let b = CacheEntry::generate_key("hello", "en", "de");
        let c = CacheEntry::generate_key("helloen", "", "tr");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("trans:"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let mut cache = TranslationCache::new(Duration::from_secs(60), 10);
        cache.insert("hello", "en", "tr", result("merhaba"));
        assert_eq!(cache.get("hello", "en", "tr").unwrap().translated_text, "merhaba");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("hello", "en", "tr").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expired_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_entry_is_evicted_at_capacity() {
        let mut cache = TranslationCache::new(Duration::from_secs(3600), 2);
        cache.insert("one", "en", "tr", result("bir"));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("two", "en", "tr", result("iki"));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("three", "en", "tr", result("üç"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("one", "en", "tr").is_none());
        assert!(cache.get("two", "en", "tr").is_some());
        assert!(cache.get("three", "en", "tr").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newest_entry_survives_when_timestamps_tie() {
        let mut cache = TranslationCache::new(Duration::from_secs(3600), 2);
        cache.insert("one", "en", "tr", result("bir"));
        cache.insert("two", "en", "tr", result("iki"));
        cache.insert("three", "en", "tr", result("üç"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("three", "en", "tr").unwrap().translated_text, "üç");
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_make_room_before_eviction() {
        let mut cache = TranslationCache::new(Duration::from_secs(60), 2);
        cache.insert("old", "en", "tr", result("eski"));
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.insert("fresh", "en", "tr", result("taze"));
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.insert("new", "en", "tr", result("yeni"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().expired_items, 1);
        assert_eq!(cache.stats().evictions, 0);
        assert!(cache.get("fresh", "en", "tr").is_some());
        assert!(cache.get("new", "en", "tr").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rewriting_a_key_does_not_evict() {
        let mut cache = TranslationCache::new(Duration::from_secs(60), 1);
        cache.insert("one", "en", "tr", result("bir"));
        cache.insert("one", "en", "tr", result("BIR"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("one", "en", "tr").unwrap().translated_text, "BIR");
    }
}
