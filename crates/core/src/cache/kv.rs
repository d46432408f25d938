//! # KVキャッシュ
//!
//! 資格情報をKVストアにJSON文字列として保存する。
//! キーはデプロイ環境ごとに分ける（`b2_auth_{env}`, `b2_upload_url_{env}`）。

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use b2edge_types::{AccountCredential, UploadUrlCredential};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CacheError, CredentialCache};
use crate::kv::KvNamespace;

/// KV上の資格情報のTTL（23時間）。資格情報の有効期間より先に消える。
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(23 * 60 * 60);

/// アカウント資格情報キーの接頭辞
pub const ACCOUNT_KEY_PREFIX: &str = "b2_auth_";
/// アップロードURL資格情報キーの接頭辞
pub const UPLOAD_URL_KEY_PREFIX: &str = "b2_upload_url_";

/// 資格情報キャッシュが使うキーか。同じ名前空間を共有する利用者はこれらに触れてはならない。
pub fn is_credential_key(key: &str) -> bool {
    key.starts_with(ACCOUNT_KEY_PREFIX) || key.starts_with(UPLOAD_URL_KEY_PREFIX)
}

/// KVストアによる資格情報キャッシュ。
pub struct KvCache<T> {
    kv: Arc<dyn KvNamespace>,
    key: String,
    ttl: Option<Duration>,
    _credential: PhantomData<fn() -> T>,
}

impl<T> KvCache<T> {
    pub fn new(kv: Arc<dyn KvNamespace>, key: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            kv,
            key: key.into(),
            ttl,
            _credential: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl KvCache<AccountCredential> {
    /// `b2_auth_{env_name}` に保存するキャッシュ
    pub fn account(kv: Arc<dyn KvNamespace>, env_name: &str) -> Self {
        Self::new(kv, format!("{ACCOUNT_KEY_PREFIX}{env_name}"), Some(CREDENTIAL_TTL))
    }
}

impl KvCache<UploadUrlCredential> {
    /// `b2_upload_url_{env_name}` に保存するキャッシュ
    pub fn upload_url(kv: Arc<dyn KvNamespace>, env_name: &str) -> Self {
        Self::new(kv, format!("{UPLOAD_URL_KEY_PREFIX}{env_name}"), Some(CREDENTIAL_TTL))
    }
}

#[async_trait::async_trait]
impl<T> CredentialCache<T> for KvCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.kv.get(&self.key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::Decode(format!("{}: {e}", self.key)))
    }

    async fn save(&self, credential: &T) -> Result<(), CacheError> {
        let json =
            serde_json::to_string(credential).map_err(|e| CacheError::Encode(e.to_string()))?;
        self.kv.put(&self.key, &json, self.ttl).await?;
        Ok(())
    }
}
