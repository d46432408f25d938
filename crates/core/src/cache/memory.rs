//! # メモリキャッシュ

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{CacheError, CredentialCache};

struct Inner<T> {
    slot: Mutex<Option<T>>,
    saves: AtomicUsize,
}

/// プロセス内の資格情報キャッシュ。クローンは同じ保存先を共有する。
pub struct MemoryCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for MemoryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> MemoryCache<T> {
    pub fn new() -> Self {
        Self::with_value(None)
    }

    /// 初期値を持つキャッシュ
    pub fn with_value(value: Option<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(value),
                saves: AtomicUsize::new(0),
            }),
        }
    }

    /// これまでの保存回数
    pub fn saves(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }
}

impl<T: Clone> MemoryCache<T> {
    /// 現在の保存内容
    pub fn get(&self) -> Option<T> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<T> CredentialCache<T> for MemoryCache<T>
where
    T: Clone + Send + Sync,
{
    async fn load(&self) -> Result<Option<T>, CacheError> {
        Ok(self.get())
    }

    async fn save(&self, credential: &T) -> Result<(), CacheError> {
        *self.inner.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
