//! 按key互斥的进程内锁
//! 用于：同一钱包的余额同步串行执行，避免并发写 Account.balance 丢失更新

use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// 锁守卫（超出作用域自动释放）
pub type KeyedLockGuard = OwnedMutexGuard<()>;

pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLock<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, key: K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // 清理无人持有的条目
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    /// 获取锁，阻塞直到同key的其他持有者释放
    pub async fn lock(&self, key: K) -> KeyedLockGuard {
        self.entry(key).await.lock_owned().await
    }

    /// 非阻塞获取；已被持有时返回 None
    pub async fn try_lock(&self, key: K) -> Option<KeyedLockGuard> {
        self.entry(key).await.try_lock_owned().ok()
    }

    /// 当前被跟踪的key数量
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
