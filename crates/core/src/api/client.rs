//! # B2 HTTPクライアント
//!
//! reqwestでB2 APIを呼び出す [`B2Api`] 実装。
//! すべてのリクエストにクライアント単位のタイムアウトがかかる。

use std::sync::Arc;
use std::time::Duration;

use b2edge_types::{
    credential_expiry, headers, AccountCredential, B2AuthorizeResponse, B2ErrorBody,
    B2GetUploadUrlResponse, UploadFileInfo, UploadUrlCredential, UploadedFile,
};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};

use super::schema::{self, optional, required, Field, Kind};
use super::B2Api;
use crate::clock::Clock;
use crate::error::B2Error;

/// `b2_authorize_account` のデフォルトURL
pub const DEFAULT_AUTHORIZE_URL: &str =
    "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";

/// デフォルトのリクエストタイムアウト（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const AUTHORIZE_FIELDS: &[Field] = &[
    required("accountId", Kind::Str),
    required("apiUrl", Kind::Str),
    required("authorizationToken", Kind::Str),
    required("allowed.bucketId", Kind::Str),
    optional("downloadUrl", Kind::Str),
];

const UPLOAD_URL_FIELDS: &[Field] = &[
    required("uploadUrl", Kind::Str),
    required("authorizationToken", Kind::Str),
];

const UPLOAD_FIELDS: &[Field] = &[
    required("fileId", Kind::Str),
    required("uploadTimestamp", Kind::Int),
    optional("bucketId", Kind::Str),
    optional("accountId", Kind::Str),
    optional("action", Kind::Str),
];

/// reqwestによるB2 APIクライアント。
pub struct B2Client {
    http: reqwest::Client,
    authorize_url: String,
    clock: Arc<dyn Clock>,
}

impl B2Client {
    pub fn new(http: reqwest::Client, authorize_url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            authorize_url: authorize_url.into(),
            clock,
        }
    }

    /// タイムアウト付きのHTTPクライアントを作って構築する。
    pub fn with_timeout(
        timeout: Duration,
        authorize_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, B2Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| B2Error::Config(format!("HTTPクライアントの構築に失敗: {e}")))?;
        Ok(Self::new(http, authorize_url, clock))
    }

    /// 本文を読み切り、ステータスと共に返す。
    async fn read(
        op: &'static str,
        response: reqwest::Response,
    ) -> Result<(reqwest::StatusCode, String), B2Error> {
        let status = response.status();
        let body = response.text().await.map_err(|e| B2Error::http(op, e))?;
        tracing::debug!(op, status = status.as_u16(), "B2レスポンスを受信");
        Ok((status, body))
    }
}

/// 非2xxをB2のエラーコード付きで包む。コードが読めなければ `"api error"`。
fn api_error(op: &'static str, status: reqwest::StatusCode, body: String) -> B2Error {
    let code = serde_json::from_str::<B2ErrorBody>(&body)
        .map(|parsed| parsed.code)
        .unwrap_or_else(|_| "api error".to_string());
    tracing::error!(op, status = status.as_u16(), code = %code, "B2 APIがエラーを返しました");
    B2Error::Api {
        op,
        code,
        status: status.as_u16(),
        body,
    }
}

/// `X-Bz-File-Name` 用にファイル名をパーセントエンコードする（`/` は区切りとして残す）。
pub(crate) fn encode_file_name(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait::async_trait]
impl B2Api for B2Client {
    async fn authorize_account(
        &self,
        key_id: &str,
        application_key: &str,
    ) -> Result<AccountCredential, B2Error> {
        const OP: &str = "b2_authorize_account";

        let response = self
            .http
            .get(&self.authorize_url)
            .header(
                AUTHORIZATION,
                b2edge_crypto::basic_authorization(key_id, application_key),
            )
            .send()
            .await
            .map_err(|e| B2Error::http(OP, e))?;
        let (status, body) = Self::read(OP, response).await?;
        if !status.is_success() {
            return Err(api_error(OP, status, body));
        }

        let parsed: B2AuthorizeResponse = schema::parse(OP, &body, AUTHORIZE_FIELDS)?;
        let created_at = self.clock.now();
        tracing::info!(
            api_url = %parsed.api_url,
            bucket_id = %parsed.allowed.bucket_id,
            "B2アカウントを認可"
        );

        Ok(AccountCredential {
            api_url: parsed.api_url,
            authorization_token: parsed.authorization_token,
            bucket_id: parsed.allowed.bucket_id,
            account_id: Some(parsed.account_id),
            download_url: parsed.download_url,
            created_at,
            expires_at: credential_expiry(created_at),
        })
    }

    async fn get_upload_url(
        &self,
        account: &AccountCredential,
    ) -> Result<UploadUrlCredential, B2Error> {
        const OP: &str = "b2_get_upload_url";

        let url = format!(
            "{}/b2api/v2/b2_get_upload_url",
            account.api_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .query(&[("bucketId", account.bucket_id.as_str())])
            .header(AUTHORIZATION, &account.authorization_token)
            .send()
            .await
            .map_err(|e| B2Error::http(OP, e))?;
        let (status, body) = Self::read(OP, response).await?;
        if !status.is_success() {
            return Err(api_error(OP, status, body));
        }

        let parsed: B2GetUploadUrlResponse = schema::parse(OP, &body, UPLOAD_URL_FIELDS)?;
        let created_at = self.clock.now();
        tracing::info!(bucket_id = %account.bucket_id, "アップロードURLを取得");

        Ok(UploadUrlCredential {
            upload_url: parsed.upload_url,
            authorization_token: parsed.authorization_token,
            created_at,
            expires_at: credential_expiry(created_at),
        })
    }

    async fn upload_file(
        &self,
        target: &UploadUrlCredential,
        info: &UploadFileInfo,
        body: Bytes,
    ) -> Result<UploadedFile, B2Error> {
        const OP: &str = "b2_upload_file";

        let response = self
            .http
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header(headers::BZ_FILE_NAME, encode_file_name(&info.full_file_name))
            .header(CONTENT_TYPE, &info.mime_type)
            .header(CONTENT_LENGTH, info.content_length)
            .header(headers::BZ_CONTENT_SHA1, &info.sha1)
            .body(body)
            .send()
            .await
            .map_err(|e| B2Error::http(OP, e))?;
        let (status, body) = Self::read(OP, response).await?;
        if !status.is_success() {
            tracing::error!(
                file_name = %info.full_file_name,
                status = status.as_u16(),
                "アップロードが拒否されました"
            );
            return Err(B2Error::UploadRejected {
                status: status.as_u16(),
                body,
            });
        }

        let uploaded: UploadedFile = schema::parse(OP, &body, UPLOAD_FIELDS)?;
        tracing::info!(
            file_name = %info.full_file_name,
            file_id = %uploaded.file_id,
            size = info.content_length,
            "アップロード完了"
        );
        Ok(uploaded)
    }
}
