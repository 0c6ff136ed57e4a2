use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

/// 缓存中的一项
///
/// value 为空表示还没有构造完成，或者上一次构造失败。
struct GfxCacheSlot<V> {
    value: RwLock<Option<V>>,
    /// 只在 miss 路径上使用，保证同一个 key 只构造一次
    build_lock: Mutex<()>,
    last_used: AtomicU64,
}
impl<V> GfxCacheSlot<V> {
    fn new(frame: u64) -> Self {
        Self {
            value: RwLock::new(None),
            build_lock: Mutex::new(()),
            last_used: AtomicU64::new(frame),
        }
    }

    #[inline]
    fn touch(&self, frame: u64) {
        self.last_used.fetch_max(frame, Ordering::AcqRel);
    }
}

/// 以创建参数为 key 的对象缓存
///
/// - 命中时只需要 map 的读锁，不会阻塞其他读者
/// - 未命中时，相同 key 的调用者在该 key 自己的锁上排队，只会构造一次
/// - 构造失败不会留下 value，下一次调用会重新构造
///
/// value 一般是可复制的句柄，销毁由 `collect` 的回调负责。
pub struct GfxCache<K, V> {
    slots: RwLock<HashMap<K, Arc<GfxCacheSlot<V>>>>,
}
impl<K, V> Default for GfxCache<K, V> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}
// new & init
impl<K, V> GfxCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }
}
// getters
impl<K, V> GfxCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// 已经构造完成的项数
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|slot| slot.value.read().is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.read().get(key).is_some_and(|slot| slot.value.read().is_some())
    }

    /// 不构造，只查询；命中时同样会刷新访问帧
    pub fn get(&self, key: &K, frame: u64) -> Option<V> {
        let slot = self.slots.read().get(key).cloned()?;
        let value = slot.value.read().clone();
        if value.is_some() {
            slot.touch(frame);
        }
        value
    }
}
// tools
impl<K, V> GfxCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// 查找 key 对应的对象，不存在时调用 `create` 构造
    ///
    /// `frame` 是当前的绝对帧号，用于之后的回收。
    pub fn get_or_create<E>(&self, key: &K, frame: u64, create: impl FnOnce(&K) -> Result<V, E>) -> Result<V, E> {
        // 快速路径
        let existing = self.slots.read().get(key).cloned();
        if let Some(slot) = existing.as_ref() {
            if let Some(value) = slot.value.read().as_ref() {
                slot.touch(frame);
                return Ok(value.clone());
            }
        }

        let slot = match existing {
            Some(slot) => slot,
            None => self.slots.write().entry(key.clone()).or_insert_with(|| Arc::new(GfxCacheSlot::new(frame))).clone(),
        };
        slot.touch(frame);

        let _guard = slot.build_lock.lock();
        if let Some(value) = slot.value.read().as_ref() {
            return Ok(value.clone());
        }
        let value = create(key)?;
        *slot.value.write() = Some(value.clone());
        Ok(value)
    }

    /// 回收 `current_frame - last_used > max_age` 的项，返回被回收的数量
    ///
    /// 正在被构造的项（有其他线程持有）不会被回收。
    pub fn collect(&self, current_frame: u64, max_age: u64, mut destroy: impl FnMut(V)) -> usize {
        let mut slots = self.slots.write();
        let mut evicted = 0;
        slots.retain(|_, slot| {
            let last_used = slot.last_used.load(Ordering::Acquire);
            if current_frame.saturating_sub(last_used) <= max_age || Arc::strong_count(slot) > 1 {
                return true;
            }
            if let Some(value) = slot.value.write().take() {
                destroy(value);
                evicted += 1;
            }
            false
        });
        evicted
    }

    /// 清空整个缓存，用于销毁 context
    pub fn drain(&self, mut destroy: impl FnMut(V)) -> usize {
        let mut slots = self.slots.write();
        let mut evicted = 0;
        for (_, slot) in slots.drain() {
            if let Some(value) = slot.value.write().take() {
                destroy(value);
                evicted += 1;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use rayon::prelude::*;

    use super::*;

    #[test]
    fn concurrent_equal_keys_construct_once() {
        let cache: GfxCache<(u32, u32), u64> = GfxCache::new();
        let constructions = AtomicUsize::new(0);

        let values: Vec<u64> = (0..64)
            .into_par_iter()
            .map(|_| {
                cache
                    .get_or_create::<()>(&(1920, 1080), 0, |_| {
                        constructions.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        Ok(0xBEEF)
                    })
                    .unwrap()
            })
            .collect();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(values.len(), 64);
        assert!(values.iter().all(|v| *v == 0xBEEF));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_construction_is_retried() {
        let cache: GfxCache<&'static str, u32> = GfxCache::new();

        let first = cache.get_or_create(&"gbuffer", 3, |_| Err("out of memory"));
        assert_eq!(first, Err("out of memory"));
        assert!(!cache.contains(&"gbuffer"));
        assert!(cache.is_empty());

        let second = cache.get_or_create::<&str>(&"gbuffer", 4, |_| Ok(7));
        assert_eq!(second, Ok(7));
        assert!(cache.contains(&"gbuffer"));

        // 已经存在，不会再调用构造函数
        let third = cache.get_or_create::<&str>(&"gbuffer", 5, |_| panic!("constructed twice"));
        assert_eq!(third, Ok(7));
    }

    #[test]
    fn collect_evicts_by_age() {
        let cache: GfxCache<u32, u32> = GfxCache::new();
        cache.get_or_create::<()>(&1, 10, |_| Ok(100)).unwrap();
        cache.get_or_create::<()>(&2, 15, |_| Ok(200)).unwrap();

        let mut destroyed = vec![];
        let evicted = cache.collect(20, 6, |v| destroyed.push(v));

        assert_eq!(evicted, 1);
        assert_eq!(destroyed, vec![100]);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
    }

    #[test]
    fn hits_refresh_last_used() {
        let cache: GfxCache<u32, u32> = GfxCache::new();
        cache.get_or_create::<()>(&1, 2, |_| Ok(1)).unwrap();
        assert_eq!(cache.get(&1, 12), Some(1));
        // 旧的帧号不会把访问时间往回拨
        cache.get_or_create::<()>(&1, 5, |_| Ok(1)).unwrap();

        assert_eq!(cache.collect(15, 6, |_| {}), 0);
        assert_eq!(cache.collect(19, 6, |_| {}), 1);
    }

    #[test]
    fn stale_failed_slots_are_dropped() {
        let cache: GfxCache<u32, u32> = GfxCache::new();
        let _ = cache.get_or_create(&9, 0, |_| Err(()));
        let mut destroyed = 0;
        assert_eq!(cache.collect(100, 6, |_| destroyed += 1), 0);
        assert_eq!(destroyed, 0);
        assert_eq!(cache.slots.read().len(), 0);
    }

    #[test]
    fn drain_hands_out_every_value() {
        let cache: GfxCache<u32, u32> = GfxCache::new();
        for i in 0..4 {
            cache.get_or_create::<()>(&i, 0, |k| Ok(*k * 10)).unwrap();
        }
        let mut destroyed = vec![];
        assert_eq!(cache.drain(|v| destroyed.push(v)), 4);
        destroyed.sort();
        assert_eq!(destroyed, vec![0, 10, 20, 30]);
        assert!(cache.is_empty());
    }
}
