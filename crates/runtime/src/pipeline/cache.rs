// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-stage result cache.
//!
//! Keys are `(stage name, SHA-256 of the input's JSON text)`. Object keys
//! serialize in sorted order, so equal inputs hash equally. When full, the
//! oldest inserted entry is evicted.

use model_bundle::sha256_hex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub stage: String,
    pub digest: String,
}

impl CacheKey {
    pub fn new(stage: &str, input: &Value) -> Self {
        Self {
            stage: stage.to_string(),
            digest: sha256_hex(input.to_string().as_bytes()),
        }
    }
}

#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<CacheKey, Value>,
    order: VecDeque<CacheKey>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Value> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stores `value`. Replacing an existing key keeps its insertion slot.
    pub fn insert(&mut self, key: CacheKey, value: Value) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    tracing::trace!(stage = %oldest.stage, "cache entry evicted");
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_object_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(CacheKey::new("s", &a), CacheKey::new("s", &b));
        assert_ne!(CacheKey::new("s", &a), CacheKey::new("t", &a));
        assert_ne!(CacheKey::new("s", &a), CacheKey::new("s", &json!({"x": 2})));
    }

    #[test]
    fn test_hit_and_miss_counts() {
        let mut cache = ResultCache::new(4);
        let key = CacheKey::new("s", &json!(1));
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), json!("one"));
        assert_eq!(cache.get(&key), Some(json!("one")));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_evicts_oldest_insert() {
        let mut cache = ResultCache::new(2);
        let keys: Vec<_> = (0..3).map(|i| CacheKey::new("s", &json!(i))).collect();
        cache.insert(keys[0].clone(), json!(0));
        cache.insert(keys[1].clone(), json!(1));
        // Reading does not refresh an entry.
        cache.get(&keys[0]);
        cache.insert(keys[2].clone(), json!(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&keys[0]).is_none());
        assert!(cache.get(&keys[1]).is_some());
    }

    #[test]
    fn test_replace_keeps_size() {
        let mut cache = ResultCache::new(2);
        let key = CacheKey::new("s", &json!(1));
        cache.insert(key.clone(), json!(1));
        cache.insert(key.clone(), json!(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key), Some(json!(2)));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = ResultCache::new(0);
        cache.insert(CacheKey::new("s", &json!(1)), json!(1));
        assert!(cache.is_empty());
    }
}
