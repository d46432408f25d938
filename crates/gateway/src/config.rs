//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use b2edge_core::api::{DEFAULT_AUTHORIZE_URL, DEFAULT_TIMEOUT_SECS};
use b2edge_core::{
    B2Api, B2Client, CachedUploader, Clock, CloudflareKv, CredentialCache, FileCache, KvCache,
    KvNamespace, MemoryCache, MemoryKv, SystemClock, UploadUrlPolicy, UploaderSettings,
};
use b2edge_types::{AccountCredential, UploadUrlCredential};
use tokio::sync::{Mutex, OnceCell};

use crate::error::GatewayError;

/// ダウンロード応答のデフォルト `Cache-Control`
pub const DEFAULT_CACHE_CONTROL: &str =
    "public, max-age=86400, stale-while-revalidate=259200, immutable";

/// KVストアの実装
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvBackend {
    Memory,
    Cloudflare,
}

/// 資格情報キャッシュの保存先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStore {
    /// Gatewayと共有するKV
    Kv,
    /// 指定ディレクトリのJSONファイル
    File(PathBuf),
    /// プロセス内
    Memory,
}

/// Gatewayの設定。
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 待ち受けアドレス
    pub bind_addr: String,
    /// デプロイ環境名（キャッシュキーの接尾辞）
    pub env_name: String,
    /// `/version` で返す文字列
    pub version: String,
    /// B2アプリケーションキーID
    pub b2_key_id: String,
    /// B2アプリケーションキー
    pub b2_application_key: String,
    /// アクセストークン検証用シークレット
    pub token_secret: Option<String>,
    /// ダウンロード中継先のバケット公開URL
    pub public_base_url: Option<String>,
    /// ダウンロード応答の `Cache-Control`
    pub cache_control: String,
    /// CORSで許可するオリジン（`*` を含めば全許可）
    pub cors_allow_origins: Vec<String>,
    /// `Access-Control-Max-Age`
    pub cors_max_age: String,
    /// `b2_authorize_account` のURL
    pub authorize_url: String,
    /// B2呼び出しのタイムアウト
    pub http_timeout: Duration,
    pub kv_backend: KvBackend,
    pub credential_store: CredentialStore,
    pub url_policy: UploadUrlPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            env_name: "dev".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            b2_key_id: String::new(),
            b2_application_key: String::new(),
            token_secret: None,
            public_base_url: None,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            cors_allow_origins: vec!["*".to_string()],
            cors_max_age: "300".to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            kv_backend: KvBackend::Memory,
            credential_store: CredentialStore::Kv,
            url_policy: UploadUrlPolicy::Independent,
        }
    }
}

/// 空白のみの値は未設定として扱う。
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// カンマ区切りのオリジン一覧。未指定なら `*`。
pub(crate) fn parse_allowed_origins(raw: Option<&str>) -> Vec<String> {
    let origins: Vec<String> = raw
        .unwrap_or("")
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if origins.is_empty() {
        vec!["*".to_string()]
    } else {
        origins
    }
}

impl GatewayConfig {
    /// 環境変数から設定を読み込む。
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let http_timeout = match env_opt("B2_HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("B2_HTTP_TIMEOUT_SECS が不正です: {v}"))?,
            ),
            None => defaults.http_timeout,
        };

        let kv_backend = match env_opt("KV_BACKEND").as_deref() {
            None | Some("memory") => KvBackend::Memory,
            Some("cloudflare") => KvBackend::Cloudflare,
            Some(other) => anyhow::bail!("KV_BACKEND が不正です: {other}（memory / cloudflare）"),
        };

        let credential_store = match env_opt("CREDENTIAL_CACHE").as_deref() {
            None | Some("kv") => CredentialStore::Kv,
            Some("file") => CredentialStore::File(PathBuf::from(
                env_opt("CREDENTIAL_CACHE_DIR").unwrap_or_else(|| "data/memo".to_string()),
            )),
            Some("memory") => CredentialStore::Memory,
            Some(other) => anyhow::bail!("CREDENTIAL_CACHE が不正です: {other}（kv / file / memory）"),
        };

        let url_policy = match env_opt("UPLOAD_URL_POLICY") {
            Some(v) => v.parse().map_err(anyhow::Error::msg)?,
            None => defaults.url_policy,
        };

        let b2_key_id = env_opt("B2_ACCOUNT").unwrap_or_default();
        if b2_key_id.is_empty() {
            tracing::warn!("B2_ACCOUNTが未設定です。アップロード系APIは利用できません");
        }

        Ok(Self {
            bind_addr: env_opt("BIND_ADDR").unwrap_or(defaults.bind_addr),
            env_name: env_opt("ENV_NAME").unwrap_or(defaults.env_name),
            version: env_opt("VERSION").unwrap_or(defaults.version),
            b2_key_id,
            b2_application_key: env_opt("B2_KEY").unwrap_or_default(),
            token_secret: env_opt("TOKEN_SECRET"),
            public_base_url: env_opt("B2_BUCKET_PUBLIC_BASE_URL"),
            cache_control: env_opt("HEADER_CACHE_CONTROL").unwrap_or(defaults.cache_control),
            cors_allow_origins: parse_allowed_origins(env_opt("HEADER_CORS_ALLOW_ORIGIN").as_deref()),
            cors_max_age: env_opt("HEADER_CORS_MAX_AGE").unwrap_or(defaults.cors_max_age),
            authorize_url: env_opt("B2_AUTH_URL").unwrap_or(defaults.authorize_url),
            http_timeout,
            kv_backend,
            credential_store,
            url_policy,
        })
    }
}

/// Gatewayの共有状態。
pub struct GatewayState {
    pub config: GatewayConfig,
    /// ダウンロード中継用HTTPクライアント（リダイレクトは追わない）
    pub http_client: reqwest::Client,
    /// メタデータとキャッシュに使うKV
    pub kv: Arc<dyn KvNamespace>,
    /// B2 APIクライアント
    pub b2: Arc<dyn B2Api>,
    pub clock: Arc<dyn Clock>,
    /// 初回のアップロード系リクエストで初期化するオーケストレータ
    uploader: OnceCell<Mutex<CachedUploader>>,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        http_client: reqwest::Client,
        kv: Arc<dyn KvNamespace>,
        b2: Arc<dyn B2Api>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            http_client,
            kv,
            b2,
            clock,
            uploader: OnceCell::new(),
        }
    }

    /// 設定からHTTPクライアント・KV・B2クライアントを組み立てる。
    pub fn from_config(config: GatewayConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.http_timeout)
            .build()
            .context("ダウンロード用HTTPクライアントの構築に失敗")?;

        let kv: Arc<dyn KvNamespace> = match config.kv_backend {
            KvBackend::Memory => Arc::new(MemoryKv::new()),
            KvBackend::Cloudflare => Arc::new(CloudflareKv::from_env(config.http_timeout)?),
        };

        let b2 = B2Client::with_timeout(
            config.http_timeout,
            config.authorize_url.clone(),
            clock.clone(),
        )?;

        tracing::info!(
            env_name = %config.env_name,
            kv_backend = ?config.kv_backend,
            credential_store = ?config.credential_store,
            url_policy = ?config.url_policy,
            "Gateway設定を読み込み"
        );

        Ok(Self::new(config, http_client, kv, Arc::new(b2), clock))
    }

    fn credential_caches(
        &self,
    ) -> (
        Box<dyn CredentialCache<AccountCredential>>,
        Box<dyn CredentialCache<UploadUrlCredential>>,
    ) {
        match &self.config.credential_store {
            CredentialStore::Kv => (
                Box::new(KvCache::account(self.kv.clone(), &self.config.env_name)),
                Box::new(KvCache::upload_url(self.kv.clone(), &self.config.env_name)),
            ),
            CredentialStore::File(dir) => (
                Box::new(FileCache::account_in(dir)),
                Box::new(FileCache::upload_url_in(dir)),
            ),
            CredentialStore::Memory => (
                Box::new(MemoryCache::<AccountCredential>::new()),
                Box::new(MemoryCache::<UploadUrlCredential>::new()),
            ),
        }
    }

    /// オーケストレータを取得する。未初期化なら初期化する（同時に1つだけ）。
    ///
    /// 初期化に失敗した場合は次のリクエストで再試行する。
    pub async fn uploader(&self) -> Result<&Mutex<CachedUploader>, GatewayError> {
        self.uploader
            .get_or_try_init(|| async {
                let (account_cache, url_cache) = self.credential_caches();
                let settings = UploaderSettings {
                    key_id: self.config.b2_key_id.clone(),
                    application_key: self.config.b2_application_key.clone(),
                    url_policy: self.config.url_policy,
                };
                let uploader = CachedUploader::initialize(
                    settings,
                    self.b2.clone(),
                    account_cache,
                    url_cache,
                    self.clock.clone(),
                )
                .await?;
                Ok::<_, GatewayError>(Mutex::new(uploader))
            })
            .await
    }

    /// 鮮度確認済みのアップロードURL資格情報を得る。ロックは確認の間だけ保持する。
    pub async fn fresh_upload_credential(&self) -> Result<UploadUrlCredential, GatewayError> {
        let mut uploader = self.uploader().await?.lock().await;
        let credential = uploader.fresh_upload_credential().await?;
        let warnings = uploader.take_cache_warnings();
        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), "資格情報キャッシュの保存に失敗したまま継続");
        }
        Ok(credential)
    }
}
