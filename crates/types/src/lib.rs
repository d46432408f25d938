//! # b2edge 共有型定義
//!
//! Backblaze B2 エッジプロキシで共有されるデータ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - 資格情報キャッシュのJSONはcamelCase（既存のキャッシュファイルと互換）
//! - 時刻はRFC 3339（UTC）
//! - SHA-1ダイジェストは小文字16進数40文字

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 定数
// ---------------------------------------------------------------------------

/// 資格情報の有効期間（分）。
/// B2のトークン寿命24時間に対して5分の安全マージンを取る（23時間55分）。
pub const CREDENTIAL_LIFETIME_MINUTES: i64 = 23 * 60 + 55;

/// createdAtから有効期限を計算する。
pub fn credential_expiry(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::minutes(CREDENTIAL_LIFETIME_MINUTES)
}

/// Gateway APIのパス定義
pub mod paths {
    /// APIのベースパス
    pub const API_BASE: &str = "/api/b2";
    /// バージョン取得
    pub const VERSION: &str = "/version";
    /// 死活監視
    pub const IS_ONLINE: &str = "/is-online";
    /// ファイルダウンロード（パススルー）
    pub const DOWNLOAD: &str = "/download";
    /// アップロードURL取得
    pub const GET_UPLOAD_URL: &str = "/get-upload-url";
    /// ヘッダー指定アップロード
    pub const UPLOAD: &str = "/upload";
    /// クエリ指定アップロード
    pub const UPLOAD_PATH: &str = "/upload-path";
    /// KVメタデータストア
    pub const KV: &str = "/kv";
}

/// HTTPヘッダー名
pub mod headers {
    /// Gateway `/upload` のファイル名ヘッダー
    pub const DISPLAY_NAME: &str = "Display-Name";
    /// Gateway `/upload` のファイルサイズヘッダー
    pub const FILE_SIZE: &str = "File-Size";
    /// Gateway `/upload` のSHA-1ヘッダー
    pub const SHA1: &str = "SHA-1";
    /// KV書き込み時のTTL（秒）
    pub const EXPIRATION_SECONDS: &str = "X-Expiration-Seconds";
    /// B2アップロードのファイル名（パーセントエンコード済み）
    pub const BZ_FILE_NAME: &str = "X-Bz-File-Name";
    /// B2アップロードのSHA-1
    pub const BZ_CONTENT_SHA1: &str = "X-Bz-Content-Sha1";
}

// ---------------------------------------------------------------------------
// 資格情報
// ---------------------------------------------------------------------------

/// 有効期限を持つ資格情報。
pub trait Expiring {
    /// 取得時刻
    fn created_at(&self) -> DateTime<Utc>;
    /// 有効期限
    fn expires_at(&self) -> DateTime<Utc>;

    /// `now >= expiresAt` なら失効（猶予期間なし）。
    fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// アカウント認可の資格情報（b2_authorize_account の結果）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredential {
    /// APIのベースURL
    pub api_url: String,
    /// アカウント認可トークン
    pub authorization_token: String,
    /// アップロード先バケットID
    pub bucket_id: String,
    /// アカウントID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// ダウンロード用ベースURL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// 取得時刻
    pub created_at: DateTime<Utc>,
    /// 有効期限（created_at + 23h55m）
    pub expires_at: DateTime<Utc>,
}

impl Expiring for AccountCredential {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// アップロードURLの資格情報（b2_get_upload_url の結果）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlCredential {
    /// アップロード先URL
    pub upload_url: String,
    /// アップロード用認可トークン
    pub authorization_token: String,
    /// 取得時刻
    pub created_at: DateTime<Utc>,
    /// 有効期限（created_at + 23h55m）
    pub expires_at: DateTime<Utc>,
}

impl Expiring for UploadUrlCredential {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

// ---------------------------------------------------------------------------
// アップロード
// ---------------------------------------------------------------------------

/// 呼び出し側が指定するアップロード要求。
///
/// `content_length` と `sha1` を指定した場合、ローカルで計算した値より常に優先される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// オブジェクトキー（B2上のファイル名）
    pub full_file_name: String,
    /// MIMEタイプ
    pub mime_type: String,
    /// コンテンツ長（省略時はボディから計算）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// SHA-1（省略時はボディから計算）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl UploadRequest {
    /// ファイル名とMIMEタイプだけを指定した要求を作る。
    pub fn new(full_file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            full_file_name: full_file_name.into(),
            mime_type: mime_type.into(),
            content_length: None,
            sha1: None,
        }
    }
}

/// アップロードAPIに渡す確定済みのファイル情報。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileInfo {
    /// オブジェクトキー
    pub full_file_name: String,
    /// MIMEタイプ
    pub mime_type: String,
    /// コンテンツ長（0も有効）
    pub content_length: u64,
    /// 送信するバイト列のSHA-1
    pub sha1: String,
}

/// b2_upload_file の成功レスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// B2のファイルID
    pub file_id: String,
    /// アップロード時刻（エポックミリ秒）
    pub upload_timestamp: i64,
    /// バケットID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<String>,
    /// アカウントID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// アクション（"upload" 等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// プロキシ形式アップロードの成功レスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxiedUpload {
    /// 常にtrue
    pub success: bool,
    /// オブジェクトキー
    pub key: String,
    /// 送信したバイト数
    pub size: u64,
    /// MIMEタイプ
    pub content_type: String,
}

impl ProxiedUpload {
    /// 送信済みのファイル情報から組み立てる。
    pub fn from_info(info: &UploadFileInfo) -> Self {
        Self {
            success: true,
            key: info.full_file_name.clone(),
            size: info.content_length,
            content_type: info.mime_type.clone(),
        }
    }
}

/// アップロード結果。どのエントリポイントを使ったかで形が決まる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadResult {
    /// B2ネイティブ形式 `{fileId, uploadTimestamp}`
    Native(UploadedFile),
    /// プロキシ形式 `{success, key, size, contentType}`
    Proxied(ProxiedUpload),
}

// ---------------------------------------------------------------------------
// B2 API ワイヤ形式
// ---------------------------------------------------------------------------

/// b2_authorize_account の `allowed` フィールド。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2Allowed {
    /// 許可されたバケットID
    pub bucket_id: String,
    /// 許可されたバケット名
    #[serde(default)]
    pub bucket_name: Option<String>,
    /// ファイル名プレフィックス制限
    #[serde(default)]
    pub name_prefix: Option<String>,
}

/// b2_authorize_account のレスポンス（必要なフィールドのみ）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2AuthorizeResponse {
    /// アカウントID
    pub account_id: String,
    /// APIのベースURL
    pub api_url: String,
    /// 認可トークン
    pub authorization_token: String,
    /// 許可範囲
    pub allowed: B2Allowed,
    /// ダウンロード用ベースURL
    #[serde(default)]
    pub download_url: Option<String>,
}

/// b2_get_upload_url のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2GetUploadUrlResponse {
    /// アップロード先URL
    pub upload_url: String,
    /// アップロード用認可トークン
    pub authorization_token: String,
    /// バケットID
    #[serde(default)]
    pub bucket_id: Option<String>,
}

/// B2の構造化エラーレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B2ErrorBody {
    /// エラーコード（"bad_auth_token" 等）
    pub code: String,
    /// エラーメッセージ
    pub message: String,
    /// HTTPステータス
    pub status: u16,
}

// ---------------------------------------------------------------------------
// Gateway API (`/api/b2`)
// ---------------------------------------------------------------------------

/// `GET /api/b2/get-upload-url` レスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    /// アップロード先URL
    pub upload_url: String,
    /// アップロード用認可トークン
    pub authorization_token: String,
}

/// `POST /api/b2/upload-path` のクエリ。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPathQuery {
    /// オブジェクトキー
    pub key: String,
    /// MIMEタイプ
    pub content_type: String,
    /// SHA-1（空なら受信側で計算）
    #[serde(default)]
    pub sha1: String,
}

/// `GET /api/b2/kv` のクエリ。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvListQuery {
    /// キーのプレフィックス
    #[serde(default)]
    pub prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_expiry_is_23h55m() {
        let created = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let expires = credential_expiry(created);
        assert_eq!(expires, "2025-01-01T23:55:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_stale_boundary_is_strict() {
        let created = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let cred = UploadUrlCredential {
            upload_url: "https://pod.example/upload".to_string(),
            authorization_token: "tok".to_string(),
            created_at: created,
            expires_at: credential_expiry(created),
        };
        let just_before = cred.expires_at - Duration::milliseconds(1);
        assert!(!cred.is_stale_at(just_before));
        assert!(cred.is_stale_at(cred.expires_at));
    }

    /// 既存キャッシュファイル（camelCase, ISO 8601）を読み込めることを確認
    #[test]
    fn test_account_credential_reads_cache_json() {
        let json = r#"{
            "apiUrl": "https://api005.backblazeb2.com",
            "authorizationToken": "4_abc",
            "bucketId": "bucket123",
            "createdAt": "2025-03-01T10:00:00.000Z",
            "expiresAt": "2025-03-02T09:55:00.000Z"
        }"#;
        let cred: AccountCredential = serde_json::from_str(json).unwrap();
        assert_eq!(cred.api_url, "https://api005.backblazeb2.com");
        assert_eq!(cred.bucket_id, "bucket123");
        assert!(cred.account_id.is_none());
        assert_eq!(credential_expiry(cred.created_at), cred.expires_at);
    }

    #[test]
    fn test_upload_result_shapes() {
        let native = UploadResult::Native(UploadedFile {
            file_id: "4_z123".to_string(),
            upload_timestamp: 1_700_000_000_000,
            bucket_id: None,
            account_id: None,
            action: None,
        });
        let value = serde_json::to_value(&native).unwrap();
        assert_eq!(value["fileId"], "4_z123");
        assert_eq!(value["uploadTimestamp"], 1_700_000_000_000i64);
        assert!(value.get("success").is_none());

        let proxied = UploadResult::Proxied(ProxiedUpload {
            success: true,
            key: "a/b.txt".to_string(),
            size: 0,
            content_type: "text/plain".to_string(),
        });
        let value = serde_json::to_value(&proxied).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["contentType"], "text/plain");
        assert_eq!(value["size"], 0);
    }

    #[test]
    fn test_upload_request_optional_fields_omitted() {
        let req = UploadRequest::new("hello.txt", "text/plain");
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("sha1").is_none());
        assert!(value.get("contentLength").is_none());
    }
}
