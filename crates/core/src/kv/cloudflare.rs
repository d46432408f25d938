//! # Cloudflare Workers KV
//!
//! Cloudflare APIのREST経由でWorkers KVの名前空間を操作する。
//!
//! | 操作 | メソッド | パス |
//! |------|--------|------|
//! | get | GET | `/values/{key}` |
//! | put | PUT | `/values/{key}?expiration_ttl=N` |
//! | delete | DELETE | `/values/{key}` |
//! | list | GET | `/keys?prefix=..&cursor=..` |

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use super::{validate_key, KvError, KvNamespace};

/// Cloudflare APIのデフォルトベースURL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Workers KVが受け付ける最小TTL（秒）
pub const MIN_TTL_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: Vec<ListedKey>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ListedKey {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    cursor: Option<String>,
}

/// Cloudflare Workers KVの名前空間。
pub struct CloudflareKv {
    http: reqwest::Client,
    namespace_url: String,
    api_token: String,
}

impl CloudflareKv {
    pub fn new(
        http: reqwest::Client,
        account_id: &str,
        namespace_id: &str,
        api_token: impl Into<String>,
    ) -> Self {
        Self::with_base_url(http, CLOUDFLARE_API_BASE, account_id, namespace_id, api_token)
    }

    /// APIのベースURLを指定して構築する。
    pub fn with_base_url(
        http: reqwest::Client,
        base_url: &str,
        account_id: &str,
        namespace_id: &str,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            namespace_url: format!(
                "{}/accounts/{account_id}/storage/kv/namespaces/{namespace_id}",
                base_url.trim_end_matches('/')
            ),
            api_token: api_token.into(),
        }
    }

    /// タイムアウト付きのHTTPクライアントを作る。
    ///
    /// 資格情報キャッシュの読み書きはアップローダーのロック内で行われるため、
    /// 応答しないリクエストは必ず打ち切る。
    pub fn http_client(timeout: Duration) -> Result<reqwest::Client, KvError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KvError::Config(format!("HTTPクライアントの構築に失敗: {e}")))
    }

    /// 環境変数（`CF_ACCOUNT_ID`, `CF_KV_NAMESPACE_ID`, `CF_API_TOKEN`）から構築する。
    /// リクエストは `timeout` で打ち切る。
    pub fn from_env(timeout: Duration) -> Result<Self, KvError> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| KvError::Config(format!("{name} が設定されていません")))
        };
        Ok(Self::new(
            Self::http_client(timeout)?,
            &var("CF_ACCOUNT_ID")?,
            &var("CF_KV_NAMESPACE_ID")?,
            var("CF_API_TOKEN")?,
        ))
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.namespace_url, urlencoding::encode(key))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, KvError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|e| format!("レスポンス読み取り失敗: {e}"));
        Err(KvError::Backend {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport(e: reqwest::Error) -> KvError {
    KvError::Http(e.to_string())
}

#[async_trait::async_trait]
impl KvNamespace for CloudflareKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        validate_key(key)?;
        let response = self
            .http
            .get(self.value_url(key))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        response.text().await.map(Some).map_err(transport)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        validate_key(key)?;
        let mut request = self
            .http
            .put(self.value_url(key))
            .bearer_auth(&self.api_token)
            .body(value.to_string());
        if let Some(ttl) = ttl {
            let secs = ttl.as_secs().max(MIN_TTL_SECS);
            request = request.query(&[("expiration_ttl", secs)]);
        }
        let response = request.send().await.map_err(transport)?;
        Self::check(response).await?;
        tracing::debug!(key, "KVに書き込み");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        validate_key(key)?;
        let response = self
            .http
            .delete(self.value_url(key))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, KvError> {
        let url = format!("{}/keys", self.namespace_url);
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = self.http.get(&url).bearer_auth(&self.api_token);
            if let Some(prefix) = prefix {
                request = request.query(&[("prefix", prefix)]);
            }
            if let Some(cursor) = &cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }
            let response = Self::check(request.send().await.map_err(transport)?).await?;
            let page: ListResponse = response.json().await.map_err(transport)?;
            names.extend(page.result.into_iter().map(|k| k.name));

            cursor = page
                .result_info
                .and_then(|info| info.cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }
        Ok(names)
    }
}
