//! # キーバリューストア
//!
//! 資格情報キャッシュとGatewayのメタデータAPIが共有するKVの抽象インターフェース。
//! 実装はメモリ版（開発・テスト用）とCloudflare Workers KV版（REST API）を持つ。

mod cloudflare;
mod memory;

pub use cloudflare::CloudflareKv;
pub use memory::MemoryKv;

use std::time::Duration;

/// KV操作のエラー型
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// バックエンドの設定不足
    #[error("KV設定エラー: {0}")]
    Config(String),
    /// 不正なキー（空文字列等）
    #[error("不正なキー: {0}")]
    InvalidKey(String),
    /// バックエンドへの通信失敗
    #[error("KVバックエンドへの通信に失敗: {0}")]
    Http(String),
    /// バックエンドがエラーを返した
    #[error("KVバックエンドエラー (HTTP {status}): {message}")]
    Backend { status: u16, message: String },
}

/// KVストアの抽象インターフェース。
///
/// 値は文字列。TTLを指定した書き込みは期限を過ぎると読めなくなる。
#[async_trait::async_trait]
pub trait KvNamespace: Send + Sync {
    /// 値を取得する。存在しなければ `None`。
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// 値を書き込む。
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// 値を削除する。存在しないキーの削除は成功扱い。
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// キー名を列挙する。`prefix` を指定すると前方一致で絞り込む。
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, KvError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), KvError> {
    if key.is_empty() {
        return Err(KvError::InvalidKey("キーが空です".to_string()));
    }
    Ok(())
}
