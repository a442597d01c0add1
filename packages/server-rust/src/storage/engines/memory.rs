//! In-memory [`HotStore`] implementation backed by [`DashMap`].
//!
//! Expiry is lazy: an expired key is purged the next time any operation
//! touches it. Deadlines use `tokio::time::Instant`, so tests running with a
//! paused clock can advance past a TTL deterministically.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::storage::hot_store::HotStore;

#[derive(Debug, Clone)]
enum HotValue {
    Str(String),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

impl HotValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Set(_) => "set",
            Self::ZSet(_) => "zset",
        }
    }

    /// Collections are dropped when their last member goes.
    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct HotEntry {
    value: HotValue,
    expires_at: Option<Instant>,
}

impl HotEntry {
    fn persistent(value: HotValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str, expected: &str, actual: &HotValue) -> anyhow::Error {
    anyhow::anyhow!(
        "WRONGTYPE key `{key}` holds a {}, expected a {expected}",
        actual.type_name()
    )
}

/// Process-local hot store.
#[derive(Debug, Default)]
pub struct MemoryHotStore {
    entries: DashMap<String, HotEntry>,
}

impl MemoryHotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn drop_if_empty(&self, key: &str) {
        self.entries
            .remove_if(key, |_, entry| entry.value.is_empty_collection());
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                HotValue::Str(s) => Ok(Some(s.clone())),
                other => Err(wrong_type(key, "string", other)),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let entry = HotEntry {
            value: HotValue::Str(value.to_string()),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.purge_if_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.purge_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn set_add(&self, key: &str, members: &[String]) -> anyhow::Result<u64> {
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| HotEntry::persistent(HotValue::Set(HashSet::new())));
        let HotValue::Set(set) = &mut entry.value else {
            return Err(wrong_type(key, "set", &entry.value));
        };
        let added = members.iter().filter(|m| set.insert((*m).clone())).count();
        Ok(added as u64)
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> anyhow::Result<u64> {
        self.purge_if_expired(key);
        let removed = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return Ok(0);
            };
            let HotValue::Set(set) = &mut entry.value else {
                return Err(wrong_type(key, "set", &entry.value));
            };
            members.iter().filter(|m| set.remove(m.as_str())).count()
        };
        self.drop_if_empty(key);
        Ok(removed as u64)
    }

    async fn set_members(&self, key: &str) -> anyhow::Result<HashSet<String>> {
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(HashSet::new()),
            Some(entry) => match &entry.value {
                HotValue::Set(set) => Ok(set.clone()),
                other => Err(wrong_type(key, "set", other)),
            },
        }
    }

    async fn set_card(&self, key: &str) -> anyhow::Result<u64> {
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                HotValue::Set(set) => Ok(set.len() as u64),
                other => Err(wrong_type(key, "set", other)),
            },
        }
    }

    async fn incr_by(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| HotEntry::persistent(HotValue::Str("0".to_string())));
        let HotValue::Str(raw) = &mut entry.value else {
            return Err(wrong_type(key, "string", &entry.value));
        };
        let Ok(current) = raw.parse::<i64>() else {
            bail!("value at `{key}` is not an integer");
        };
        let Some(next) = current.checked_add(delta) else {
            bail!("increment of `{key}` would overflow");
        };
        *raw = next.to_string();
        Ok(next)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> anyhow::Result<()> {
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| HotEntry::persistent(HotValue::ZSet(HashMap::new())));
        let HotValue::ZSet(zset) = &mut entry.value else {
            return Err(wrong_type(key, "zset", &entry.value));
        };
        zset.insert(member.to_string(), score);
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> anyhow::Result<Option<f64>> {
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                HotValue::ZSet(zset) => Ok(zset.get(member).copied()),
                other => Err(wrong_type(key, "zset", other)),
            },
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        self.purge_if_expired(key);
        let mut hits: Vec<(String, f64)> = match self.entries.get(key) {
            None => return Ok(Vec::new()),
            Some(entry) => match &entry.value {
                HotValue::ZSet(zset) => zset
                    .iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect(),
                other => return Err(wrong_type(key, "zset", other)),
            },
        };
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> anyhow::Result<u64> {
        self.purge_if_expired(key);
        let removed = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return Ok(0);
            };
            let HotValue::ZSet(zset) = &mut entry.value else {
                return Err(wrong_type(key, "zset", &entry.value));
            };
            let before = zset.len();
            zset.retain(|_, score| *score < min || *score > max);
            before - zset.len()
        };
        self.drop_if_empty(key);
        Ok(removed as u64)
    }

    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
