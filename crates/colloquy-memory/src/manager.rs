//! Per-session tiered memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use colloquy_core::config::MemoryConfig;
use colloquy_core::types::{ContextChunk, MemoryItem, MemoryTier, Timestamp};

use crate::error::MemoryError;
use crate::scoring::{eviction_score, keyword_overlap, normalize_query};

/// Metadata key holding the normalized query of a ToolCache entry.
pub const QUERY_KEY: &str = "query";
/// Metadata key holding the serialized chunk of a ToolCache entry.
pub const CHUNK_KEY: &str = "chunk";

type SessionTiers = BTreeMap<MemoryTier, Vec<MemoryItem>>;

/// Bounded, session-scoped memory with recency-weighted eviction.
pub struct MemoryManager {
    config: MemoryConfig,
    sessions: Mutex<HashMap<String, SessionTiers>>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Configured capacity of a tier.
    pub fn capacity(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::ShortTerm => self.config.short_term_capacity,
            MemoryTier::Working => self.config.working_capacity,
            MemoryTier::LongTerm => self.config.long_term_capacity,
            MemoryTier::ToolCache => self.config.tool_cache_capacity,
        }
    }

    /// Number of Working items recalled into a generation prompt.
    pub fn recall_limit(&self) -> usize {
        self.config.recall_limit
    }

    /// Insert an item, evicting the lowest-scoring items of its tier while
    /// the tier is over capacity. Returns the evicted items.
    ///
    /// A ToolCache item replaces any live entry for the same query and
    /// source.
    pub fn store(&self, session_id: &str, item: MemoryItem) -> Result<Vec<MemoryItem>, MemoryError> {
        self.store_all(session_id, vec![item])
    }

    /// Insert a batch of items under one lock. Every tier the batch touches
    /// is checked before anything is stored, so a rejected batch leaves the
    /// session's memory untouched.
    pub fn store_all(&self, session_id: &str, items: Vec<MemoryItem>) -> Result<Vec<MemoryItem>, MemoryError> {
        if let Some(tier) = items
            .iter()
            .map(|item| item.tier)
            .find(|tier| self.capacity(*tier) == 0)
        {
            return Err(MemoryError::Capacity {
                tier,
                capacity: 0,
                len: items.iter().filter(|item| item.tier == tier).count(),
            });
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let now = Timestamp::now();
        let mut sessions = self.lock()?;
        let tiers = sessions.entry(session_id.to_string()).or_default();
        let mut evicted = Vec::new();
        for item in items {
            evicted.extend(self.insert(session_id, tiers, item, now));
        }
        Ok(evicted)
    }

    fn insert(&self, session_id: &str, tiers: &mut SessionTiers, item: MemoryItem, now: Timestamp) -> Vec<MemoryItem> {
        let tier = item.tier;
        let capacity = self.capacity(tier);
        let items = tiers.entry(tier).or_default();

        let mut evicted = Vec::new();
        if tier == MemoryTier::ToolCache {
            evicted.extend(self.drain_expired(items, now));
            let key = cache_key(&item);
            if key.is_some() {
                let (dupes, keep): (Vec<_>, Vec<_>) =
                    items.drain(..).partition(|existing| cache_key(existing) == key);
                *items = keep;
                evicted.extend(dupes);
            }
        }

        items.push(item);
        while items.len() > capacity {
            match self.lowest_index(items, now) {
                Some(idx) => evicted.push(items.remove(idx)),
                None => break,
            }
        }

        if !evicted.is_empty() {
            debug!(
                session_id = %session_id,
                tier = %tier,
                evicted = evicted.len(),
                "Evicted memory items"
            );
        }
        evicted
    }

    /// Items of a tier ranked by keyword overlap with `query` times eviction
    /// score. Items sharing no terms with a non-empty query are skipped.
    pub fn retrieve(
        &self,
        session_id: &str,
        tier: MemoryTier,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let now = Timestamp::now();
        let mut sessions = self.lock()?;
        let Some(items) = sessions.get_mut(session_id).and_then(|t| t.get_mut(&tier)) else {
            return Ok(Vec::new());
        };
        if tier == MemoryTier::ToolCache {
            self.drain_expired(items, now);
        }

        let mut ranked: Vec<(f32, &MemoryItem)> = items
            .iter()
            .filter_map(|item| {
                let overlap = keyword_overlap(query, &item.content);
                (overlap > 0.0).then(|| {
                    let score = overlap * eviction_score(item, now, self.config.recency_half_life_secs);
                    (score, item)
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    /// Relieve pressure on a tier: drop expired ToolCache entries, then the
    /// single lowest-scoring remaining item. Returns everything removed.
    pub fn evict(&self, session_id: &str, tier: MemoryTier) -> Result<Vec<MemoryItem>, MemoryError> {
        let now = Timestamp::now();
        let mut sessions = self.lock()?;
        let Some(items) = sessions.get_mut(session_id).and_then(|t| t.get_mut(&tier)) else {
            return Ok(Vec::new());
        };

        let mut evicted = if tier == MemoryTier::ToolCache {
            self.drain_expired(items, now)
        } else {
            Vec::new()
        };
        if let Some(idx) = self.lowest_index(items, now) {
            evicted.push(items.remove(idx));
        }
        Ok(evicted)
    }

    /// Drop every tier of a session. Returns the number of items removed.
    pub fn purge(&self, session_id: &str) -> Result<usize, MemoryError> {
        let mut sessions = self.lock()?;
        let removed = sessions
            .remove(session_id)
            .map(|tiers| tiers.values().map(Vec::len).sum())
            .unwrap_or(0);
        debug!(session_id = %session_id, removed, "Purged session memory");
        Ok(removed)
    }

    /// Copy Working items at or above the promotion threshold into LongTerm.
    /// Returns the promoted LongTerm items.
    pub fn promote(&self, session_id: &str) -> Result<Vec<MemoryItem>, MemoryError> {
        let candidates: Vec<MemoryItem> = {
            let sessions = self.lock()?;
            sessions
                .get(session_id)
                .and_then(|t| t.get(&MemoryTier::Working))
                .map(|items| {
                    items
                        .iter()
                        .filter(|i| i.relevance >= self.config.promotion_threshold)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut promoted = Vec::with_capacity(candidates.len());
        for mut item in candidates {
            item.tier = MemoryTier::LongTerm;
            self.store(session_id, item.clone())?;
            promoted.push(item);
        }
        Ok(promoted)
    }

    /// Chunks cached for `query` that have not expired, best first.
    pub fn cached_chunks(&self, session_id: &str, query: &str) -> Result<Vec<ContextChunk>, MemoryError> {
        let now = Timestamp::now();
        let key = normalize_query(query);
        let mut sessions = self.lock()?;
        let Some(items) = sessions
            .get_mut(session_id)
            .and_then(|t| t.get_mut(&MemoryTier::ToolCache))
        else {
            return Ok(Vec::new());
        };
        self.drain_expired(items, now);

        let mut chunks: Vec<ContextChunk> = items
            .iter()
            .filter(|i| i.metadata.get(QUERY_KEY).and_then(|v| v.as_str()) == Some(key.as_str()))
            .filter_map(|i| i.metadata.get(CHUNK_KEY))
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        chunks.sort_by(|a: &ContextChunk, b| b.quality_score.total_cmp(&a.quality_score));
        Ok(chunks)
    }

    /// Number of items currently held in a tier.
    pub fn len(&self, session_id: &str, tier: MemoryTier) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions
                .get(session_id)
                .and_then(|t| t.get(&tier))
                .map(Vec::len)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Build the ToolCache entry remembering `chunk` as a result for `query`.
    pub fn tool_cache_item(query: &str, chunk: &ContextChunk) -> MemoryItem {
        let serialized = serde_json::to_value(chunk).unwrap_or(serde_json::Value::Null);
        MemoryItem::new(MemoryTier::ToolCache, chunk.content.clone(), chunk.quality_score)
            .with_metadata(QUERY_KEY, normalize_query(query))
            .with_metadata("source_id", chunk.source_id.clone())
            .with_metadata(CHUNK_KEY, serialized)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SessionTiers>>, MemoryError> {
        self.sessions
            .lock()
            .map_err(|e| MemoryError::LockPoisoned(e.to_string()))
    }

    fn lowest_index(&self, items: &[MemoryItem], now: Timestamp) -> Option<usize> {
        let half_life = self.config.recency_half_life_secs;
        items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                eviction_score(a, now, half_life).total_cmp(&eviction_score(b, now, half_life))
            })
            .map(|(idx, _)| idx)
    }

    fn drain_expired(&self, items: &mut Vec<MemoryItem>, now: Timestamp) -> Vec<MemoryItem> {
        let ttl = self.config.tool_cache_ttl_secs as i64;
        let (expired, live): (Vec<_>, Vec<_>) = items
            .drain(..)
            .partition(|i| now.secs_since(i.inserted_at) > ttl);
        *items = live;
        expired
    }
}

fn cache_key(item: &MemoryItem) -> Option<(String, String)> {
    let query = item.metadata.get(QUERY_KEY)?.as_str()?;
    let source = item.metadata.get("source_id")?.as_str()?;
    Some((query.to_string(), source.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MemoryConfig {
        MemoryConfig {
            short_term_capacity: 3,
            working_capacity: 3,
            long_term_capacity: 2,
            tool_cache_capacity: 2,
            tool_cache_ttl_secs: 300,
            recency_half_life_secs: 900,
            promotion_threshold: 0.8,
            recall_limit: 3,
        }
    }

    fn chunk(content: &str, source: &str, quality: f32) -> ContextChunk {
        let mut c = ContextChunk::new(content, source, quality);
        c.quality_score = quality;
        c
    }

    // ---- store / capacity ----

    #[test]
    fn test_store_respects_capacity() {
        let manager = MemoryManager::new(small_config());
        for i in 0..10 {
            let item = MemoryItem::new(MemoryTier::Working, format!("fact {}", i), 0.5);
            manager.store("s", item).unwrap();
            assert!(manager.len("s", MemoryTier::Working) <= 3);
        }
        assert_eq!(manager.len("s", MemoryTier::Working), 3);
    }

    #[test]
    fn test_store_evicts_lowest_score() {
        let manager = MemoryManager::new(small_config());
        manager
            .store("s", MemoryItem::new(MemoryTier::ShortTerm, "high", 0.9))
            .unwrap();
        manager
            .store("s", MemoryItem::new(MemoryTier::ShortTerm, "low", 0.1))
            .unwrap();
        manager
            .store("s", MemoryItem::new(MemoryTier::ShortTerm, "mid", 0.5))
            .unwrap();
        let evicted = manager
            .store("s", MemoryItem::new(MemoryTier::ShortTerm, "newer", 0.6))
            .unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].content, "low");
    }

    #[test]
    fn test_store_prefers_evicting_stale_items() {
        let manager = MemoryManager::new(small_config());
        let stale = MemoryItem::new(MemoryTier::Working, "stale", 0.9)
            .with_inserted_at(Timestamp::now().minus_secs(3 * 3600));
        manager.store("s", stale).unwrap();
        for name in ["a", "b", "c"] {
            manager
                .store("s", MemoryItem::new(MemoryTier::Working, name, 0.5))
                .unwrap();
        }
        let remaining = manager.retrieve("s", MemoryTier::Working, "", 10).unwrap();
        assert!(remaining.iter().all(|i| i.content != "stale"));
    }

    #[test]
    fn test_zero_capacity_is_capacity_error() {
        let mut config = small_config();
        config.working_capacity = 0;
        let manager = MemoryManager::new(config);
        let err = manager
            .store("s", MemoryItem::new(MemoryTier::Working, "x", 0.5))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Capacity { capacity: 0, .. }));
    }

    #[test]
    fn test_rejected_batch_stores_nothing() {
        let mut config = small_config();
        config.working_capacity = 0;
        let manager = MemoryManager::new(config);
        let err = manager
            .store_all(
                "s",
                vec![
                    MemoryItem::new(MemoryTier::ShortTerm, "question", 0.5),
                    MemoryItem::new(MemoryTier::Working, "answer", 0.9),
                    MemoryItem::new(MemoryTier::Working, "more", 0.9),
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Capacity {
                tier: MemoryTier::Working,
                len: 2,
                ..
            }
        ));
        assert_eq!(manager.len("s", MemoryTier::ShortTerm), 0);
    }

    #[test]
    fn test_store_all_evicts_within_batch() {
        let manager = MemoryManager::new(small_config());
        let batch = (0..5)
            .map(|i| MemoryItem::new(MemoryTier::ShortTerm, format!("fact {}", i), 0.5))
            .collect();
        let evicted = manager.store_all("s", batch).unwrap();
        assert_eq!(evicted.len(), 2);
        assert_eq!(manager.len("s", MemoryTier::ShortTerm), 3);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let manager = MemoryManager::new(small_config());
        manager
            .store("a", MemoryItem::new(MemoryTier::Working, "alpha", 0.5))
            .unwrap();
        assert_eq!(manager.len("a", MemoryTier::Working), 1);
        assert_eq!(manager.len("b", MemoryTier::Working), 0);
    }

    // ---- retrieve ----

    #[test]
    fn test_retrieve_ranks_by_overlap_and_limit() {
        let manager = MemoryManager::new(small_config());
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "vacation policy grants days", 0.5))
            .unwrap();
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "vacation requests", 0.5))
            .unwrap();
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "parking rules", 0.9))
            .unwrap();

        let hits = manager
            .retrieve("s", MemoryTier::Working, "vacation policy", 5)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "vacation policy grants days");

        let limited = manager
            .retrieve("s", MemoryTier::Working, "vacation policy", 1)
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_retrieve_unknown_session_is_empty() {
        let manager = MemoryManager::new(small_config());
        assert!(manager
            .retrieve("nope", MemoryTier::LongTerm, "x", 5)
            .unwrap()
            .is_empty());
    }

    // ---- evict / purge ----

    #[test]
    fn test_evict_removes_lowest() {
        let manager = MemoryManager::new(small_config());
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "keep", 0.9))
            .unwrap();
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "drop", 0.2))
            .unwrap();
        let evicted = manager.evict("s", MemoryTier::Working).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].content, "drop");
        assert_eq!(manager.len("s", MemoryTier::Working), 1);
    }

    #[test]
    fn test_purge_removes_all_tiers() {
        let manager = MemoryManager::new(small_config());
        for tier in MemoryTier::ALL {
            manager.store("s", MemoryItem::new(tier, "x", 0.5)).unwrap();
        }
        assert_eq!(manager.purge("s").unwrap(), 4);
        for tier in MemoryTier::ALL {
            assert_eq!(manager.len("s", tier), 0);
        }
        assert_eq!(manager.purge("s").unwrap(), 0);
    }

    // ---- tool cache ----

    #[test]
    fn test_tool_cache_round_trip() {
        let manager = MemoryManager::new(small_config());
        let c = chunk("Employees accrue 20 vacation days", "handbook#4", 0.8);
        manager
            .store("s", MemoryManager::tool_cache_item("Vacation policy?", &c))
            .unwrap();

        let cached = manager.cached_chunks("s", "vacation   POLICY").unwrap();
        assert_eq!(cached, vec![c]);
        assert!(manager.cached_chunks("s", "parking").unwrap().is_empty());
    }

    #[test]
    fn test_tool_cache_same_query_and_source_replaces() {
        let manager = MemoryManager::new(small_config());
        let first = chunk("old text", "doc#1", 0.6);
        let second = chunk("new text", "doc#1", 0.7);
        manager
            .store("s", MemoryManager::tool_cache_item("q", &first))
            .unwrap();
        manager
            .store("s", MemoryManager::tool_cache_item("q", &second))
            .unwrap();
        assert_eq!(manager.len("s", MemoryTier::ToolCache), 1);
        assert_eq!(manager.cached_chunks("s", "q").unwrap()[0].content, "new text");
    }

    #[test]
    fn test_tool_cache_entries_expire() {
        let manager = MemoryManager::new(small_config());
        let c = chunk("stale answer", "doc#9", 0.9);
        let item = MemoryManager::tool_cache_item("q", &c)
            .with_inserted_at(Timestamp::now().minus_secs(301));
        manager.store("s", item).unwrap();
        assert!(manager.cached_chunks("s", "q").unwrap().is_empty());
        assert_eq!(manager.len("s", MemoryTier::ToolCache), 0);
    }

    // ---- promotion ----

    #[test]
    fn test_promote_copies_relevant_working_items() {
        let manager = MemoryManager::new(small_config());
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "important", 0.85))
            .unwrap();
        manager
            .store("s", MemoryItem::new(MemoryTier::Working, "trivial", 0.3))
            .unwrap();
        let promoted = manager.promote("s").unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].tier, MemoryTier::LongTerm);
        assert_eq!(manager.len("s", MemoryTier::LongTerm), 1);
        assert_eq!(manager.len("s", MemoryTier::Working), 2);
    }
}
