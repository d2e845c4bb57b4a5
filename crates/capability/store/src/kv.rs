//! 进程内 KV 存储
//!
//! 脚本之间共享状态的带过期映射：
//! - set / set_with_duration / get / delete / count
//! - fuzzy_get 支持 `prefix*`、`*suffix` 与精确键
//!
//! 过期惰性清理：每次访问先剔除已过期条目，过期条目对
//! get/fuzzy_get/count 均不可见。容量上限内 count 恒成立，
//! 超限的写入整体拒绝、不改动任何状态。

use crate::error::StorageError;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// KV 存储。键有序存放，模糊查询结果确定。
pub struct KvStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    max_size: usize,
}

impl KvStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            max_size,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn purge_expired(entries: &mut BTreeMap<String, Entry>) {
        let now = Instant::now();
        entries.retain(|_, entry| !entry.expired(now));
    }

    /// 写入不过期的键值。
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.insert(key, value, None)
    }

    /// 写入带过期时间的键值。
    pub fn set_with_duration(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.insert(key, value, Some(Instant::now() + ttl))
    }

    fn insert(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<Instant>,
    ) -> Result<(), StorageError> {
        let mut entries = self.lock();
        Self::purge_expired(&mut entries);
        // 覆盖已有键不算新增
        if !entries.contains_key(key) && entries.len() + 1 > self.max_size {
            return Err(StorageError::max_size_reached(entries.len()));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    /// 读取；不存在或已过期返回空串。
    pub fn get(&self, key: &str) -> String {
        self.try_get(key).unwrap_or_default()
    }

    /// 读取；区分"键不存在"与"值为空串"。
    pub fn try_get(&self, key: &str) -> Option<String> {
        let mut entries = self.lock();
        Self::purge_expired(&mut entries);
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn delete(&self, key: &str) {
        let mut entries = self.lock();
        entries.remove(key);
    }

    pub fn count(&self) -> usize {
        let mut entries = self.lock();
        Self::purge_expired(&mut entries);
        entries.len()
    }

    /// 模糊查询：`prefix*` 前缀、`*suffix` 后缀、其余按精确键。
    /// 多个命中时返回键序最小者。
    pub fn fuzzy_get(&self, pattern: &str) -> String {
        let mut entries = self.lock();
        Self::purge_expired(&mut entries);
        if let Some(prefix) = pattern.strip_suffix('*') {
            return entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(_, entry)| entry.value.clone())
                .next()
                .unwrap_or_default();
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return entries
                .iter()
                .find(|(k, _)| k.ends_with(suffix))
                .map(|(_, entry)| entry.value.clone())
                .unwrap_or_default();
        }
        entries
            .get(pattern)
            .map(|entry| entry.value.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let kv = KvStore::new(16);
        kv.set("gateway.mode", "edge").unwrap();
        assert_eq!(kv.get("gateway.mode"), "edge");
        kv.delete("gateway.mode");
        assert_eq!(kv.get("gateway.mode"), "");
    }

    #[test]
    fn max_size_rejected_without_mutation() {
        let kv = KvStore::new(2);
        kv.set("a", "1").unwrap();
        kv.set("b", "2").unwrap();
        let err = kv.set("c", "3").unwrap_err();
        assert!(err.is_max_size_reached());
        assert_eq!(kv.count(), 2);
        assert_eq!(kv.get("c"), "");
        // 覆盖已有键不受上限影响
        kv.set("a", "9").unwrap();
        assert_eq!(kv.get("a"), "9");
    }

    #[test]
    fn try_get_distinguishes_empty_value_from_absence() {
        let kv = KvStore::new(4);
        kv.set("flag", "").unwrap();
        assert_eq!(kv.try_get("flag"), Some(String::new()));
        assert_eq!(kv.try_get("missing"), None);
        kv.set_with_duration("tmp", "", Duration::from_millis(5))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(kv.try_get("tmp"), None);
    }

    #[test]
    fn ttl_expiry_is_lazy_but_invisible() {
        let kv = KvStore::new(4);
        kv.set_with_duration("tmp", "x", Duration::from_millis(5))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(kv.get("tmp"), "");
        assert_eq!(kv.count(), 0);
    }

    #[test]
    fn fuzzy_patterns() {
        let kv = KvStore::new(8);
        kv.set("meter.a.volt", "220").unwrap();
        kv.set("meter.b.volt", "221").unwrap();
        kv.set("pump.state", "on").unwrap();
        assert_eq!(kv.fuzzy_get("meter.*"), "220");
        assert_eq!(kv.fuzzy_get("*state"), "on");
        assert_eq!(kv.fuzzy_get("pump.state"), "on");
        assert_eq!(kv.fuzzy_get("*nothing"), "");
    }
}
