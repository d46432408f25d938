//! # 資格情報キャッシュ
//!
//! アカウント資格情報とアップロードURL資格情報を、プロセスの再起動をまたいで保持する。
//!
//! - [`FileCache`]: JSONファイル（CLI、単一ホスト）
//! - [`KvCache`]: KVストア（Gateway、複数インスタンス）
//! - [`MemoryCache`]: プロセス内（開発・テスト）
//!
//! 読み込み失敗はオーケストレータ側でキャッシュミスとして扱い、
//! 保存失敗は警告として記録する。どちらもアップロードを止めない。

mod file;
mod kv;
mod memory;

pub use file::FileCache;
pub use kv::{is_credential_key, KvCache};
pub use memory::MemoryCache;

use crate::kv::KvError;

/// キャッシュ操作のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// ファイルI/O失敗
    #[error("キャッシュファイルのI/Oに失敗: {0}")]
    Io(#[from] std::io::Error),
    /// 保存内容を資格情報として解釈できない
    #[error("キャッシュ内容の解析に失敗: {0}")]
    Decode(String),
    /// 資格情報のシリアライズ失敗
    #[error("資格情報のシリアライズに失敗: {0}")]
    Encode(String),
    /// KVバックエンドの失敗
    #[error("KVキャッシュの操作に失敗: {0}")]
    Kv(#[from] KvError),
}

/// 資格情報1件分の永続化先。
#[async_trait::async_trait]
pub trait CredentialCache<T: Send + Sync>: Send + Sync {
    /// 保存済みの資格情報を読み込む。未保存なら `None`。
    async fn load(&self) -> Result<Option<T>, CacheError>;

    /// 資格情報を保存する（上書き）。
    async fn save(&self, credential: &T) -> Result<(), CacheError>;
}
