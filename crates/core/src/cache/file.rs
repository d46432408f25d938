//! # ファイルキャッシュ
//!
//! 資格情報をJSONファイルとして保存する。既定の配置は `data/memo/` 配下。

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CacheError, CredentialCache};

/// アカウント資格情報のファイル名
pub const ACCOUNT_FILE_NAME: &str = "b2_auth.json";
/// アップロードURL資格情報のファイル名
pub const UPLOAD_URL_FILE_NAME: &str = "b2_upload_url.json";

/// JSONファイルによる資格情報キャッシュ。
pub struct FileCache<T> {
    path: PathBuf,
    _credential: PhantomData<fn() -> T>,
}

impl<T> FileCache<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _credential: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileCache<b2edge_types::AccountCredential> {
    /// `dir/b2_auth.json` に保存するキャッシュ
    pub fn account_in(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(ACCOUNT_FILE_NAME))
    }
}

impl FileCache<b2edge_types::UploadUrlCredential> {
    /// `dir/b2_upload_url.json` に保存するキャッシュ
    pub fn upload_url_in(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(UPLOAD_URL_FILE_NAME))
    }
}

#[async_trait::async_trait]
impl<T> CredentialCache<T> for FileCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self) -> Result<Option<T>, CacheError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| CacheError::Decode(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, credential: &T) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| CacheError::Encode(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
