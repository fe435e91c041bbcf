//! Bounded, TTL'd cache for the ephemeral `widget_frame` rendering plane.
//!
//! Holds at most [`WidgetFrameCache::CAPACITY`] entries, one per
//! `agent_id` in practice, each valid for [`WidgetFrameCache::TTL`].
//! Frames are never written to the evidence plane; this cache exists only
//! so a Control client that attaches late can see the most recent frame
//! without re-requesting a render.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    inserted_at: Instant,
}

/// LRU-evicted, TTL-expiring cache of the last `widget_frame` per agent.
pub struct WidgetFrameCache {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl WidgetFrameCache {
    /// Maximum number of distinct agents cached at once.
    pub const CAPACITY: usize = 16;
    /// Time-to-live for a cached frame.
    pub const TTL: Duration = Duration::from_secs(30);

    /// Construct an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert or replace the frame for `agent_id`, evicting the
    /// least-recently-used entry if the cache is at capacity.
    pub fn insert(&mut self, agent_id: String, value: serde_json::Value) {
        if !self.entries.contains_key(&agent_id) && self.entries.len() >= Self::CAPACITY {
            if let Some(evicted) = self.order.first().cloned() {
                self.entries.remove(&evicted);
                self.order.remove(0);
            }
        }
        self.order.retain(|k| k != &agent_id);
        self.order.push(agent_id.clone());
        self.entries.insert(
            agent_id,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Fetch the cached frame for `agent_id`, if present and not expired.
    /// An expired entry is evicted on lookup.
    pub fn get(&mut self, agent_id: &str) -> Option<serde_json::Value> {
        let expired = self
            .entries
            .get(agent_id)
            .is_some_and(|entry| entry.inserted_at.elapsed() > Self::TTL);
        if expired {
            self.entries.remove(agent_id);
            self.order.retain(|k| k != agent_id);
            return None;
        }
        self.entries.get(agent_id).map(|entry| entry.value.clone())
    }
}

impl Default for WidgetFrameCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_a_frame() {
        let mut cache = WidgetFrameCache::new();
        cache.insert("fw".into(), serde_json::json!({"tick": 1}));
        assert_eq!(cache.get("fw"), Some(serde_json::json!({"tick": 1})));
    }

    #[test]
    fn evicts_least_recently_used_past_capacity() {
        let mut cache = WidgetFrameCache::new();
        for i in 0..WidgetFrameCache::CAPACITY {
            cache.insert(format!("agent-{i}"), serde_json::json!({"i": i}));
        }
        cache.insert("overflow".into(), serde_json::json!({"i": "overflow"}));
        assert!(cache.get("agent-0").is_none());
        assert!(cache.get("overflow").is_some());
    }

    #[test]
    fn missing_key_returns_none() {
        let mut cache = WidgetFrameCache::new();
        assert!(cache.get("nope").is_none());
    }
}
