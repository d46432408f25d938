//! # メモリKV
//!
//! プロセス内のKV実装。期限切れのエントリは読み取り・書き込み・列挙の際に取り除く。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{validate_key, KvError, KvNamespace};
use crate::clock::{Clock, SystemClock};

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// メモリ上のKV。
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 期限判定に使う時計を指定して構築する。
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// 期限切れエントリを含めた保持件数
    #[cfg(test)]
    async fn stored(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// 期限切れのエントリを取り除く。
fn sweep(entries: &mut BTreeMap<String, Entry>, now: DateTime<Utc>) {
    entries.retain(|_, entry| entry.is_live(now));
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KvNamespace for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        validate_key(key)?;
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        validate_key(key)?;
        let now = self.clock.now();
        let expires_at = match ttl {
            Some(ttl) => {
                let expires_at = chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .ok_or_else(|| KvError::InvalidKey(format!("TTLが大きすぎます: {ttl:?}")))?;
                Some(expires_at)
            }
            None => None,
        };
        let mut entries = self.entries.write().await;
        sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        validate_key(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, KvError> {
        let now = self.clock.now();
        let prefix = prefix.unwrap_or("");
        let mut entries = self.entries.write().await;
        sweep(&mut entries, now);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
