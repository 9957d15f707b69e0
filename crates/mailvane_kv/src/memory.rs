//! In-process KV backend.
//!
//! Mirrors the backing store's semantics closely enough for the queue and
//! index invariants to hold: sorted sets order by (score, member bytes),
//! pipelines apply under a single write lock, TTLs expire lazily on access.
//! Used by every test and by local development without a Redis.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{KvError, Result};
use crate::store::{glob_match, KeyType, Kv, KvOp};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

impl Value {
    fn key_type(&self) -> KeyType {
        match self {
            Value::Str(_) => KeyType::String,
            Value::Hash(_) => KeyType::Hash,
            Value::ZSet(_) => KeyType::SortedSet,
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Deterministic in-memory [`Kv`].
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    entries.get(key).filter(|e| !e.expired())
}

fn sorted_members(set: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

fn hash_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut HashMap<String, String>> {
    if entries.get(key).is_some_and(|e| e.expired()) {
        entries.remove(key);
    }
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Hash(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Hash(map) => Ok(map),
        _ => Err(KvError::wrong_type(key, "hash")),
    }
}

fn zset_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut HashMap<String, f64>> {
    if entries.get(key).is_some_and(|e| e.expired()) {
        entries.remove(key);
    }
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::ZSet(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::ZSet(set) => Ok(set),
        _ => Err(KvError::wrong_type(key, "zset")),
    }
}

fn apply_op(entries: &mut HashMap<String, Entry>, op: KvOp) -> Result<()> {
    match op {
        KvOp::Set { key, value } => {
            entries.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: None,
                },
            );
        }
        KvOp::SetEx { key, value, ttl } => {
            entries.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        }
        KvOp::Del { key } => {
            entries.remove(&key);
        }
        KvOp::HSet { key, field, value } => {
            hash_mut(entries, &key)?.insert(field, value);
        }
        KvOp::HDel { key, field } => {
            if let Some(entry) = entries.get_mut(&key) {
                if let Value::Hash(map) = &mut entry.value {
                    map.remove(&field);
                }
            }
        }
        KvOp::HIncrBy { key, field, delta } => {
            incr_hash_field(entries, &key, &field, delta)?;
        }
        KvOp::ZAdd { key, member, score } => {
            zset_mut(entries, &key)?.insert(member, score);
        }
        KvOp::ZRem { key, member } => {
            if let Some(entry) = entries.get_mut(&key) {
                if let Value::ZSet(set) = &mut entry.value {
                    set.remove(&member);
                }
            }
        }
        KvOp::Expire { key, ttl } => {
            if let Some(entry) = entries.get_mut(&key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
    }
    Ok(())
}

fn incr_hash_field(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    field: &str,
    delta: i64,
) -> Result<i64> {
    let map = hash_mut(entries, key)?;
    let current: i64 = map.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
    let next = current + delta;
    map.insert(field.to_string(), next.to_string());
    Ok(next)
}

/// Resolve redis-style rank bounds against a set of `len` members.
fn rank_bounds(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if start > stop || len == 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                _ => Err(KvError::wrong_type(key, "string")),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        apply_op(
            &mut entries,
            KvOp::Set {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if live(&entries, key).is_some() {
            return Ok(false);
        }
        apply_op(
            &mut entries,
            KvOp::SetEx {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )?;
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if live(&entries, key).is_none() {
            return Ok(false);
        }
        apply_op(
            &mut entries,
            KvOp::Expire {
                key: key.to_string(),
                ttl,
            },
        )?;
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let entries = self.entries.read().await;
        Ok(live(&entries, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn key_type(&self, key: &str) -> Result<KeyType> {
        let entries = self.entries.read().await;
        Ok(live(&entries, key).map_or(KeyType::None, |e| e.value.key_type()))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.get(field).cloned()),
                _ => Err(KvError::wrong_type(key, "hash")),
            },
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        apply_op(
            &mut entries,
            KvOp::HSet {
                key: key.to_string(),
                field: field.to_string(),
                value: value.to_string(),
            },
        )
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        apply_op(
            &mut entries,
            KvOp::HDel {
                key: key.to_string(),
                field: field.to_string(),
            },
        )
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.clone()),
                _ => Err(KvError::wrong_type(key, "hash")),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn hlen(&self, key: &str) -> Result<u64> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.len() as u64),
                _ => Err(KvError::wrong_type(key, "hash")),
            },
            None => Ok(0),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.write().await;
        incr_hash_field(&mut entries, key, field, delta)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut entries = self.entries.write().await;
        apply_op(
            &mut entries,
            KvOp::ZAdd {
                key: key.to_string(),
                member: member.to_string(),
                score,
            },
        )
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expired()) {
            entries.remove(key);
            return Ok(false);
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        match &mut entry.value {
            Value::ZSet(set) => Ok(set.remove(member).is_some()),
            _ => Err(KvError::wrong_type(key, "zset")),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::ZSet(set) => Ok(set.len() as u64),
                _ => Err(KvError::wrong_type(key, "zset")),
            },
            None => Ok(0),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::ZSet(set) => Ok(set.get(member).copied()),
                _ => Err(KvError::wrong_type(key, "zset")),
            },
            None => Ok(None),
        }
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<(String, f64)>> {
        let entries = self.entries.read().await;
        let set = match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::ZSet(set) => set,
                _ => return Err(KvError::wrong_type(key, "zset")),
            },
            None => return Ok(Vec::new()),
        };
        let mut members = sorted_members(set);
        if rev {
            members.reverse();
        }
        match rank_bounds(start, stop, members.len()) {
            Some((lo, hi)) => Ok(members[lo..=hi].to_vec()),
            None => Ok(Vec::new()),
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        let entries = self.entries.read().await;
        let set = match live(&entries, key) {
            Some(entry) => match &entry.value {
                Value::ZSet(set) => set,
                _ => return Err(KvError::wrong_type(key, "zset")),
            },
            None => return Ok(Vec::new()),
        };
        let mut members: Vec<(String, f64)> = sorted_members(set)
            .into_iter()
            .filter(|(_, s)| *s >= min && *s <= max)
            .collect();
        if let Some(limit) = limit {
            members.truncate(limit);
        }
        Ok(members)
    }

    async fn zpop_min(&self, key: &str) -> Result<Option<(String, f64)>> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expired()) {
            entries.remove(key);
            return Ok(None);
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let set = match &mut entry.value {
            Value::ZSet(set) => set,
            _ => return Err(KvError::wrong_type(key, "zset")),
        };
        let Some((member, score)) = sorted_members(set).into_iter().next() else {
            return Ok(None);
        };
        set.remove(&member);
        Ok(Some((member, score)))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| !e.expired() && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut entries = self.entries.write().await;
        for op in ops {
            apply_op(&mut entries, op)?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_round_trip() {
        let kv = MemoryKv::new();
        kv.set("k", "v").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_ex_excludes_second_writer() {
        let kv = MemoryKv::new();
        assert!(kv
            .set_nx_ex("lock:a", "t1", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!kv
            .set_nx_ex("lock:a", "t2", Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(kv.get("lock:a").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_set_nx_ex_expires() {
        let kv = MemoryKv::new();
        assert!(kv
            .set_nx_ex("lock:a", "t1", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kv
            .set_nx_ex("lock:a", "t2", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_zset_orders_by_score_then_member() {
        let kv = MemoryKv::new();
        kv.zadd("z", "b", 2.0).await.unwrap();
        kv.zadd("z", "a", 1.0).await.unwrap();
        kv.zadd("z", "c", 1.0).await.unwrap();
        let all = kv.zrange("z", 0, -1, false).await.unwrap();
        let members: Vec<&str> = all.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["a", "c", "b"]);

        let popped = kv.zpop_min("z").await.unwrap().unwrap();
        assert_eq!(popped.0, "a");
    }

    #[tokio::test]
    async fn test_zrange_negative_indexes() {
        let kv = MemoryKv::new();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            kv.zadd("z", m, s).await.unwrap();
        }
        let last_two = kv.zrange("z", -2, -1, false).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].0, "b");
        assert_eq!(last_two[1].0, "c");

        let newest_first = kv.zrange("z", 0, 0, true).await.unwrap();
        assert_eq!(newest_first[0].0, "c");
    }

    #[tokio::test]
    async fn test_zrange_by_score_with_limit() {
        let kv = MemoryKv::new();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            kv.zadd("z", m, s).await.unwrap();
        }
        let due = kv
            .zrange_by_score("z", f64::MIN, 2.5, None)
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
        let limited = kv.zrange_by_score("z", f64::MIN, 4.0, Some(3)).await.unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn test_pipeline_applies_all_ops() {
        let kv = MemoryKv::new();
        kv.zadd("ready", "task1", 5.0).await.unwrap();
        kv.pipeline(vec![
            KvOp::ZRem {
                key: "ready".to_string(),
                member: "task1".to_string(),
            },
            KvOp::ZAdd {
                key: "processing".to_string(),
                member: "task1".to_string(),
                score: 10.0,
            },
            KvOp::HSet {
                key: "status".to_string(),
                field: "task1".to_string(),
                value: "{\"status\":\"processing\"}".to_string(),
            },
        ])
        .await
        .unwrap();

        assert_eq!(kv.zcard("ready").await.unwrap(), 0);
        assert_eq!(kv.zcard("processing").await.unwrap(), 1);
        assert!(kv.hget("status", "task1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let kv = MemoryKv::new();
        kv.set("k", "v").await.unwrap();
        assert!(matches!(
            kv.zadd("k", "m", 1.0).await,
            Err(KvError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_matches_pattern() {
        let kv = MemoryKv::new();
        kv.zadd("posting:hello", "email:1", 0.5).await.unwrap();
        kv.zadd("posting:world", "email:1", 0.5).await.unwrap();
        kv.hset("meta:email", "1", "{}").await.unwrap();
        let keys = kv.scan("posting:*").await.unwrap();
        assert_eq!(keys, vec!["posting:hello", "posting:world"]);
    }
}
