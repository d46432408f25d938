//! # キャッシュ付きアップローダー
//!
//! アカウント資格情報とアップロードURL資格情報の2つを管理し、
//! アップロードのたびに鮮度を確認してから送信するオーケストレータ。
//!
//! ## 状態遷移
//! 1. 初期化: キャッシュから読み込み、欠落・失効していればB2から取得して保存する
//! 2. アップロード前: アカウント → アップロードURLの順に失効を確認し、失効分だけ再取得する
//! 3. アップロード: ボディの長さとSHA-1を確定させて送信する。失敗しても自動リトライしない
//!
//! 資格情報の失効判定は `now >= expiresAt`（猶予なし）。
//! アップロードURLの取得には必ず鮮度確認済みのアカウント資格情報を使う。

use std::str::FromStr;
use std::sync::Arc;

use b2edge_types::{
    AccountCredential, Expiring, ProxiedUpload, UploadFileInfo, UploadRequest,
    UploadUrlCredential, UploadedFile,
};
use bytes::Bytes;

use crate::api::B2Api;
use crate::cache::{CacheError, CredentialCache};
use crate::clock::Clock;
use crate::error::B2Error;
use crate::hasher::{hash_body, UploadBody};

// ---------------------------------------------------------------------------
// 設定
// ---------------------------------------------------------------------------

/// アカウント資格情報を再取得したとき、アップロードURL資格情報をどう扱うか。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadUrlPolicy {
    /// それぞれの有効期限だけで判断する
    #[default]
    Independent,
    /// アカウント資格情報の再取得に合わせてアップロードURLも取り直す
    FollowAccount,
}

impl FromStr for UploadUrlPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "independent" => Ok(UploadUrlPolicy::Independent),
            "follow-account" => Ok(UploadUrlPolicy::FollowAccount),
            other => Err(format!(
                "不明なアップロードURLポリシー: {other}（independent / follow-account）"
            )),
        }
    }
}

/// オーケストレータの設定。
#[derive(Clone)]
pub struct UploaderSettings {
    /// B2アプリケーションキーID
    pub key_id: String,
    /// B2アプリケーションキー
    pub application_key: String,
    pub url_policy: UploadUrlPolicy,
}

impl std::fmt::Debug for UploaderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploaderSettings")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .field("url_policy", &self.url_policy)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// キャッシュ警告
// ---------------------------------------------------------------------------

/// 資格情報の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Account,
    UploadUrl,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialKind::Account => f.write_str("account"),
            CredentialKind::UploadUrl => f.write_str("upload_url"),
        }
    }
}

/// 保存に失敗した資格情報キャッシュの記録。アップロードは継続する。
#[derive(Debug)]
pub struct CacheWarning {
    pub kind: CredentialKind,
    pub error: CacheError,
}

impl std::fmt::Display for CacheWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}キャッシュの保存に失敗: {}", self.kind, self.error)
    }
}

/// キャッシュから鮮度のある資格情報を読み込む。読み込み失敗はミス扱い。
async fn load_fresh<T>(
    cache: &dyn CredentialCache<T>,
    kind: CredentialKind,
    clock: &dyn Clock,
) -> Option<T>
where
    T: Expiring + Send + Sync,
{
    match cache.load().await {
        Ok(Some(credential)) if !credential.is_stale_at(clock.now()) => {
            tracing::info!(
                kind = %kind,
                expires_at = %credential.expires_at(),
                "キャッシュ済み資格情報を使用"
            );
            Some(credential)
        }
        Ok(Some(credential)) => {
            tracing::info!(
                kind = %kind,
                expires_at = %credential.expires_at(),
                "キャッシュ済み資格情報は失効済み"
            );
            None
        }
        Ok(None) => {
            tracing::info!(kind = %kind, "資格情報キャッシュなし");
            None
        }
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "資格情報キャッシュの読み込みに失敗");
            None
        }
    }
}

/// 資格情報を保存する。失敗は警告として積む。
async fn save_or_warn<T>(
    cache: &dyn CredentialCache<T>,
    kind: CredentialKind,
    credential: &T,
    warnings: &mut Vec<CacheWarning>,
) where
    T: Send + Sync,
{
    if let Err(error) = cache.save(credential).await {
        tracing::warn!(kind = %kind, error = %error, "資格情報キャッシュの保存に失敗");
        warnings.push(CacheWarning { kind, error });
    }
}

// ---------------------------------------------------------------------------
// アップロード準備
// ---------------------------------------------------------------------------

/// 送信内容が確定したアップロード。
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub info: UploadFileInfo,
    pub bytes: Bytes,
}

/// ボディを確定させ、送信するファイル情報を組み立てる。
///
/// 呼び出し側が指定した `content_length` と `sha1` は計算値より優先する。
pub async fn prepare_upload(
    request: UploadRequest,
    body: UploadBody,
) -> Result<PreparedUpload, B2Error> {
    let hashed = hash_body(body).await?;
    let computed_length = hashed.len();
    let info = UploadFileInfo {
        full_file_name: request.full_file_name,
        mime_type: request.mime_type,
        content_length: request.content_length.unwrap_or(computed_length),
        sha1: request.sha1.unwrap_or(hashed.sha1),
    };
    if info.content_length != computed_length {
        tracing::warn!(
            file_name = %info.full_file_name,
            declared = info.content_length,
            actual = computed_length,
            "指定されたContent-Lengthがボディ長と一致しません"
        );
    }
    Ok(PreparedUpload {
        info,
        bytes: hashed.bytes,
    })
}

// ---------------------------------------------------------------------------
// オーケストレータ
// ---------------------------------------------------------------------------

/// キャッシュ済み資格情報でB2へアップロードするオーケストレータ。
///
/// 変更系のメソッドは `&mut self` を取るため、共有する場合は
/// `tokio::sync::Mutex` 等で包んで再取得を直列化する。
pub struct CachedUploader {
    settings: UploaderSettings,
    api: Arc<dyn B2Api>,
    account_cache: Box<dyn CredentialCache<AccountCredential>>,
    url_cache: Box<dyn CredentialCache<UploadUrlCredential>>,
    clock: Arc<dyn Clock>,
    account: AccountCredential,
    upload_url: UploadUrlCredential,
    warnings: Vec<CacheWarning>,
}

impl CachedUploader {
    /// キャッシュから資格情報を読み込み、欠落・失効分をB2から取得する。
    ///
    /// アカウント資格情報を先に確定させ、それを使ってアップロードURLを取得する。
    pub async fn initialize(
        settings: UploaderSettings,
        api: Arc<dyn B2Api>,
        account_cache: Box<dyn CredentialCache<AccountCredential>>,
        url_cache: Box<dyn CredentialCache<UploadUrlCredential>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, B2Error> {
        if settings.key_id.is_empty() {
            return Err(B2Error::Config("B2_ACCOUNT が設定されていません".to_string()));
        }
        if settings.application_key.is_empty() {
            return Err(B2Error::Config("B2_KEY が設定されていません".to_string()));
        }

        let mut warnings = Vec::new();

        let cached_account =
            load_fresh(account_cache.as_ref(), CredentialKind::Account, clock.as_ref()).await;
        let account_refreshed = cached_account.is_none();
        let account = match cached_account {
            Some(account) => account,
            None => {
                let account = api
                    .authorize_account(&settings.key_id, &settings.application_key)
                    .await?;
                save_or_warn(
                    account_cache.as_ref(),
                    CredentialKind::Account,
                    &account,
                    &mut warnings,
                )
                .await;
                account
            }
        };

        let cached_url = if account_refreshed && settings.url_policy == UploadUrlPolicy::FollowAccount
        {
            None
        } else {
            load_fresh(url_cache.as_ref(), CredentialKind::UploadUrl, clock.as_ref()).await
        };
        let upload_url = match cached_url {
            Some(upload_url) => upload_url,
            None => {
                let upload_url = api.get_upload_url(&account).await?;
                save_or_warn(
                    url_cache.as_ref(),
                    CredentialKind::UploadUrl,
                    &upload_url,
                    &mut warnings,
                )
                .await;
                upload_url
            }
        };

        tracing::info!(
            account_expires_at = %account.expires_at,
            upload_url_expires_at = %upload_url.expires_at,
            "アップローダーを初期化"
        );

        Ok(Self {
            settings,
            api,
            account_cache,
            url_cache,
            clock,
            account,
            upload_url,
            warnings,
        })
    }

    /// 現在のアカウント資格情報
    pub fn account(&self) -> &AccountCredential {
        &self.account
    }

    /// 現在のアップロードURL資格情報
    pub fn upload_url(&self) -> &UploadUrlCredential {
        &self.upload_url
    }

    /// B2 APIクライアント
    pub fn api(&self) -> Arc<dyn B2Api> {
        self.api.clone()
    }

    /// 溜まったキャッシュ警告を取り出す。
    pub fn take_cache_warnings(&mut self) -> Vec<CacheWarning> {
        std::mem::take(&mut self.warnings)
    }

    async fn refresh_account(&mut self) -> Result<(), B2Error> {
        let account = self
            .api
            .authorize_account(&self.settings.key_id, &self.settings.application_key)
            .await?;
        save_or_warn(
            self.account_cache.as_ref(),
            CredentialKind::Account,
            &account,
            &mut self.warnings,
        )
        .await;
        self.account = account;
        Ok(())
    }

    async fn refresh_upload_url(&mut self) -> Result<(), B2Error> {
        let upload_url = self.api.get_upload_url(&self.account).await?;
        save_or_warn(
            self.url_cache.as_ref(),
            CredentialKind::UploadUrl,
            &upload_url,
            &mut self.warnings,
        )
        .await;
        self.upload_url = upload_url;
        Ok(())
    }

    /// アップロード前の鮮度確認。失効した資格情報だけを再取得する。
    ///
    /// アカウントを先に確認し、その結果を踏まえてアップロードURLを確認する。
    pub async fn ensure_fresh(&mut self) -> Result<(), B2Error> {
        let mut account_refreshed = false;
        if self.account.is_stale_at(self.clock.now()) {
            tracing::info!(
                expires_at = %self.account.expires_at,
                "アカウント資格情報が失効したため再取得"
            );
            self.refresh_account().await?;
            account_refreshed = true;
        }

        let follow = account_refreshed && self.settings.url_policy == UploadUrlPolicy::FollowAccount;
        if follow || self.upload_url.is_stale_at(self.clock.now()) {
            tracing::info!(
                expires_at = %self.upload_url.expires_at,
                follow_account = follow,
                "アップロードURL資格情報を再取得"
            );
            self.refresh_upload_url().await?;
        }
        Ok(())
    }

    /// 鮮度確認済みのアップロードURL資格情報を返す。
    pub async fn fresh_upload_credential(&mut self) -> Result<UploadUrlCredential, B2Error> {
        self.ensure_fresh().await?;
        Ok(self.upload_url.clone())
    }

    /// ファイルをアップロードし、B2のレスポンスをそのまま返す。
    pub async fn upload(
        &mut self,
        request: UploadRequest,
        body: UploadBody,
    ) -> Result<UploadedFile, B2Error> {
        let target = self.fresh_upload_credential().await?;
        let (uploaded, _) = upload_to(self.api.as_ref(), &target, request, body).await?;
        Ok(uploaded)
    }

    /// ファイルをアップロードし、プロキシ形式 `{success, key, size, contentType}` で返す。
    pub async fn upload_proxied(
        &mut self,
        key: &str,
        content_type: &str,
        sha1: Option<String>,
        body: UploadBody,
    ) -> Result<ProxiedUpload, B2Error> {
        let target = self.fresh_upload_credential().await?;
        let request = UploadRequest {
            sha1,
            ..UploadRequest::new(key, content_type)
        };
        let (_, info) = upload_to(self.api.as_ref(), &target, request, body).await?;
        Ok(ProxiedUpload::from_info(&info))
    }
}

/// 確認済みのアップロードURL資格情報へ送信する。
///
/// 鮮度確認とは切り離してあるため、ロックを外した状態で並行に呼べる。
pub async fn upload_to(
    api: &dyn B2Api,
    target: &UploadUrlCredential,
    request: UploadRequest,
    body: UploadBody,
) -> Result<(UploadedFile, UploadFileInfo), B2Error> {
    let prepared = prepare_upload(request, body).await?;
    let uploaded = api.upload_file(target, &prepared.info, prepared.bytes).await?;
    Ok((uploaded, prepared.info))
}

// ---------------------------------------------------------------------------
// テスト
// ---------------------------------------------------------------------------
