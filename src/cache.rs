//! 进程内 TTL 缓存.
//!
//! 写路径只做失效, 从不回写. 为了避免"读者在写入前回源、在失效后才回填"
//! 把旧值放回缓存, 回填前先取 [`Stamp`], 回填时若该键已被失效过则放弃写入.
//!
//! 失效版本只保留一个 TTL: 早于 TTL 的戳本身就不能回填, 旧版本随之清理,
//! `clear` 清空全部版本.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认 TTL: 5 分钟
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// 失效版本戳: (全局清空次数, 单键失效版本, 取戳时间)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    epoch: u64,
    generation: u64,
    taken_at: Instant,
}

/// 单键失效版本; 版本号取自全局递增计数, 清理后重建也不会与旧戳相同
#[derive(Debug, Clone, Copy)]
struct Generation {
    value: u64,
    bumped_at: Instant,
}

/// 缓存抽象, 便于在匹配引擎中注入
pub trait Cache<K, V>: Send + Sync {
    /// 读取未过期的值
    fn get(&self, key: &K) -> Option<V>;

    fn set(&self, key: K, value: V);

    /// 回源前取版本戳
    fn stamp(&self, key: &K) -> Stamp;

    /// 仅当期间没有发生失效时写入, 返回是否写入
    fn set_if_unchanged(&self, key: K, value: V, stamp: Stamp) -> bool;

    fn invalidate(&self, key: &K);

    fn clear(&self);
}

/// 基于 DashMap 的 TTL 缓存 (分片锁, 不同键互不阻塞)
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
    generations: DashMap<K, Generation>,
    next_generation: AtomicU64,
    epoch: AtomicU64,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            next_generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            ttl,
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 从未失效 (或版本已清理) 的键视为版本 0
    fn generation(&self, key: &K) -> u64 {
        self.generations.get(key).map(|g| g.value).unwrap_or(0)
    }

    /// 清理超过 TTL 的失效版本
    fn prune_generations(&self) {
        let ttl = self.ttl;
        self.generations.retain(|_, g| g.bumped_at.elapsed() < ttl);
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K, V> Cache<K, V> for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh(self.ttl) {
                return Some(entry.value.clone());
            }
        }
        // 过期条目不再返回, 顺手清掉
        self.entries.remove_if(key, |_, entry| !entry.is_fresh(self.ttl));
        None
    }

    fn set(&self, key: K, value: V) {
        self.entries.insert(key, CacheEntry::new(value));
    }

    fn stamp(&self, key: &K) -> Stamp {
        Stamp {
            epoch: self.epoch.load(Ordering::Acquire),
            generation: self.generation(key),
            taken_at: Instant::now(),
        }
    }

    fn set_if_unchanged(&self, key: K, value: V, stamp: Stamp) -> bool {
        // 回源超过 TTL 的结果不回填 (对应的失效版本可能已被清理)
        if stamp.taken_at.elapsed() >= self.ttl {
            return false;
        }
        // 持有 generation 分片锁期间比较并写入, 与 invalidate 互斥; 空位不插入
        let slot = self.generations.entry(key.clone());
        let current = match &slot {
            Entry::Occupied(entry) => entry.get().value,
            Entry::Vacant(_) => 0,
        };
        let unchanged =
            current == stamp.generation && self.epoch.load(Ordering::Acquire) == stamp.epoch;
        if unchanged {
            self.entries.insert(key, CacheEntry::new(value));
        }
        drop(slot);
        unchanged
    }

    fn invalidate(&self, key: &K) {
        let value = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        // 先换版本再删条目: 之后完成的旧戳回填都会被拒绝
        self.generations.insert(
            key.clone(),
            Generation {
                value,
                bumped_at: Instant::now(),
            },
        );
        self.entries.remove(key);
        self.prune_generations();
    }

    fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        // 逐分片加写锁: 等待正在回填的读者结束; 旧戳的 epoch 已失效, 版本可全部丢弃
        self.generations.clear();
        self.entries.clear();
    }
}
