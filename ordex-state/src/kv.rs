//! The key-value backend: JSON documents, hashes, sorted sets, key scans,
//! atomic pipelines, and pub/sub channels.
//!
//! The in-memory implementation keeps every keyspace under one mutex so a
//! [`Kv::pipelined`] closure observes and applies its reads and writes as
//! a single atomic submission, which is what keeps a record and its
//! indices consistent with each other. Pub/sub is a broadcast channel per
//! topic; publishing to a topic nobody subscribes to is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::StoreError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Keyspace {
    docs: BTreeMap<String, serde_json::Value>,
    hashes: BTreeMap<String, HashMap<String, String>>,
    zsets: BTreeMap<String, HashMap<String, f64>>,
}

/// Handle to the shared store; cheap to clone.
#[derive(Clone, Default)]
pub struct Kv {
    inner: Arc<Mutex<Keyspace>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

/// A batch of operations applied under one lock acquisition.
pub struct Pipeline<'a> {
    space: &'a mut Keyspace,
    publishes: Vec<(String, String)>,
}

impl Kv {
    pub fn new() -> Kv {
        Kv::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Keyspace>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` as one atomic submission. Reads inside the closure observe
    /// earlier writes of the same batch.
    pub fn pipelined<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Pipeline<'_>) -> Result<(), StoreError>,
    {
        let publishes = {
            let mut guard = self.lock()?;
            let mut pipe = Pipeline {
                space: &mut guard,
                publishes: Vec::new(),
            };
            f(&mut pipe)?;
            pipe.publishes
        };
        for (channel, payload) in publishes {
            self.publish(&channel, payload);
        }
        Ok(())
    }

    pub fn json_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.lock()?.json_get(key)
    }

    pub fn json_set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.lock()?.json_set(key, value)
    }

    pub fn json_merge(&self, key: &str, patch: serde_json::Value) -> Result<(), StoreError> {
        self.lock()?.json_merge(key, patch)
    }

    pub fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.docs.contains_key(key))
    }

    pub fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    pub fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.lock()?.hashes.get(key).cloned().unwrap_or_default())
    }

    pub fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.lock()?.zadd(key, member, score);
        Ok(())
    }

    pub fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.lock()?.zrem(key, member);
        Ok(())
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .lock()?
            .zsets
            .get(key)
            .and_then(|zset| zset.get(member).copied()))
    }

    pub fn zincrby(&self, key: &str, delta: f64, member: &str) -> Result<f64, StoreError> {
        let mut guard = self.lock()?;
        let entry = guard
            .zsets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0);
        *entry += delta;
        Ok(*entry)
    }

    pub fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.zsets.get(key).map_or(0, HashMap::len))
    }

    /// Count of members whose score falls in `[min, max]`.
    pub fn zcount(&self, key: &str, min: f64, max: f64) -> Result<usize, StoreError> {
        Ok(self.lock()?.zsets.get(key).map_or(0, |zset| {
            zset.values().filter(|&&s| s >= min && s <= max).count()
        }))
    }

    /// Members with scores in `[min, max]`, ascending by `(score, member)`.
    pub fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut entries = self.lock()?.zset_entries(key, min, max);
        entries.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(member, _)| member)
            .collect())
    }

    /// Members with scores in `[min, max]`, descending by `(score, member)`.
    pub fn zrevrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut entries = self.lock()?.zset_entries(key, min, max);
        entries.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        });
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(member, _)| member)
            .collect())
    }

    /// Members ordered lexicographically, restricted to `[min, max]`
    /// inclusive. Scores are ignored, which is exactly what the
    /// txid-prefixed range scans over `FTXOSTATE` keys rely on.
    pub fn zrange_by_lex(
        &self,
        key: &str,
        min: &str,
        max: &str,
    ) -> Result<Vec<String>, StoreError> {
        let guard = self.lock()?;
        let mut members: Vec<String> = guard
            .zsets
            .get(key)
            .map(|zset| {
                zset.keys()
                    .filter(|member| member.as_str() >= min && member.as_str() <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    /// Every `(member, score)` of the set, ascending by `(score, member)`.
    pub fn zscan(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut entries: Vec<(String, f64)> = self
            .lock()?
            .zsets
            .get(key)
            .map(|zset| zset.iter().map(|(m, &s)| (m.clone(), s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(entries)
    }

    /// All keys starting with `prefix`, across every keyspace, sorted.
    pub fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.lock()?;
        let mut keys: Vec<String> = guard
            .docs
            .keys()
            .chain(guard.hashes.keys())
            .chain(guard.zsets.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Publish `payload` to `channel`. Messages to channels without
    /// subscribers are dropped.
    pub fn publish(&self, channel: &str, payload: String) {
        if let Ok(channels) = self.channels.lock() {
            if let Some(sender) = channels.get(channel) {
                let _ = sender.send(payload);
            }
        }
    }

    /// Subscribe to `channel`, creating it on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().expect("pub/sub lock poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
                sender
            })
            .subscribe()
    }
}

impl Keyspace {
    fn json_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.docs.get(key) {
            Some(doc) => Ok(Some(serde_json::from_value(doc.clone())?)),
            None => Ok(None),
        }
    }

    fn json_set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let doc = serde_json::to_value(value)?;
        self.docs.insert(key.to_string(), doc);
        Ok(())
    }

    /// Shallow object merge; `null` values delete their field. A merge
    /// into an absent document creates it.
    fn json_merge(&mut self, key: &str, patch: serde_json::Value) -> Result<(), StoreError> {
        let doc = self
            .docs
            .entry(key.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        match (doc, patch) {
            (serde_json::Value::Object(doc), serde_json::Value::Object(patch)) => {
                for (field, value) in patch {
                    if value.is_null() {
                        doc.remove(&field);
                    } else {
                        doc.insert(field, value);
                    }
                }
                Ok(())
            }
            _ => Err(StoreError::Malformed("merge requires object documents")),
        }
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) {
        if let Some(zset) = self.zsets.get_mut(key) {
            zset.remove(member);
            if zset.is_empty() {
                self.zsets.remove(key);
            }
        }
    }

    fn zset_entries(&self, key: &str, min: f64, max: f64) -> Vec<(String, f64)> {
        self.zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, &score)| score >= min && score <= max)
                    .map(|(member, &score)| (member.clone(), score))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<'a> Pipeline<'a> {
    pub fn json_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.space.json_get(key)
    }

    pub fn json_set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.space.json_set(key, value)
    }

    pub fn json_merge(&mut self, key: &str, patch: serde_json::Value) -> Result<(), StoreError> {
        self.space.json_merge(key, patch)
    }

    pub fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.space.zadd(key, member, score);
    }

    pub fn zrem(&mut self, key: &str, member: &str) {
        self.space.zrem(key, member);
    }

    pub fn zincrby(&mut self, key: &str, delta: f64, member: &str) -> f64 {
        let entry = self
            .space
            .zsets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0);
        *entry += delta;
        *entry
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.space
            .zsets
            .get(key)
            .and_then(|zset| zset.get(member).copied())
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.space
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// Queue a pub/sub message for delivery once the batch commits.
    pub fn publish(&mut self, channel: &str, payload: String) {
        self.publishes.push((channel.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_roundtrip() {
        ordex_test::init();

        let kv = Kv::new();
        kv.json_set("doc:a", &serde_json::json!({"x": 1})).unwrap();

        let loaded: Option<serde_json::Value> = kv.json_get("doc:a").unwrap();
        assert_eq!(loaded, Some(serde_json::json!({"x": 1})));
        assert!(kv.exists("doc:a").unwrap());
        assert!(!kv.exists("doc:b").unwrap());
    }

    #[test]
    fn merge_patches_and_deletes_fields() {
        ordex_test::init();

        let kv = Kv::new();
        kv.json_set("doc", &serde_json::json!({"keep": 1, "drop": 2}))
            .unwrap();
        kv.json_merge("doc", serde_json::json!({"drop": null, "new": 3}))
            .unwrap();

        let loaded: Option<serde_json::Value> = kv.json_get("doc").unwrap();
        assert_eq!(loaded, Some(serde_json::json!({"keep": 1, "new": 3})));
    }

    #[test]
    fn zset_ranges_order_by_score_then_member() {
        ordex_test::init();

        let kv = Kv::new();
        kv.zadd("z", "b", 2.0).unwrap();
        kv.zadd("z", "a", 1.0).unwrap();
        kv.zadd("z", "c", 1.0).unwrap();

        assert_eq!(
            kv.zrange_by_score("z", 0.0, 10.0, 0, 100).unwrap(),
            vec!["a", "c", "b"]
        );
        assert_eq!(
            kv.zrevrange_by_score("z", 0.0, 10.0, 0, 2).unwrap(),
            vec!["b", "c"]
        );
        assert_eq!(kv.zcount("z", 1.0, 1.0).unwrap(), 2);
    }

    #[test]
    fn lex_range_is_member_ordered() {
        ordex_test::init();

        let kv = Kv::new();
        kv.zadd("state", "tx1_0", 1.5).unwrap();
        kv.zadd("state", "tx1_1", 0.5).unwrap();
        kv.zadd("state", "tx2_0", 0.25).unwrap();

        assert_eq!(
            kv.zrange_by_lex("state", "tx1", "tx1_a").unwrap(),
            vec!["tx1_0", "tx1_1"]
        );
    }

    #[test]
    fn scan_finds_keys_across_keyspaces() {
        ordex_test::init();

        let kv = Kv::new();
        kv.json_set("pre:doc", &1u32).unwrap();
        kv.zadd("pre:zset", "m", 0.0).unwrap();
        kv.hset("pre:hash", "f", "v").unwrap();
        kv.zadd("other", "m", 0.0).unwrap();

        assert_eq!(
            kv.scan_keys("pre:").unwrap(),
            vec!["pre:doc", "pre:hash", "pre:zset"]
        );
    }

    #[test]
    fn pipeline_is_atomic_and_publishes_after_commit() {
        ordex_test::init();

        let kv = Kv::new();
        let mut receiver = kv.subscribe("events");

        kv.pipelined(|pipe| {
            pipe.json_set("doc", &serde_json::json!({"n": 1}))?;
            pipe.zadd("idx", "doc", 5.0);
            pipe.publish("events", "committed".to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(kv.zscore("idx", "doc").unwrap(), Some(5.0));
        assert_eq!(receiver.try_recv().unwrap(), "committed");
    }

    #[test]
    fn zrem_clears_empty_sets() {
        ordex_test::init();

        let kv = Kv::new();
        kv.zadd("z", "only", 1.0).unwrap();
        kv.zrem("z", "only").unwrap();

        assert!(kv.scan_keys("z").unwrap().is_empty());
        assert_eq!(kv.zcard("z").unwrap(), 0);
    }
}
