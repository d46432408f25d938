//! # b2edge 暗号処理
//!
//! エッジプロキシが使う暗号プリミティブをまとめる。
//!
//! ## アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | コンテンツ整合性（`X-Bz-Content-Sha1`） | SHA-1 |
//! | B2アカウント認可 | HTTP Basic（Base64） |
//! | Gatewayアクセストークン | HS256 JWT |

use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// アクセストークンのデフォルト有効日数
pub const DEFAULT_TOKEN_VALID_DAYS: i64 = 30;

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 署名鍵（TOKEN_SECRET）が空
    #[error("トークン署名用シークレットが空です")]
    EmptySecret,
    /// トークン発行エラー
    #[error("トークンの発行に失敗しました: {0}")]
    TokenIssue(String),
    /// トークン検証エラー（署名不一致、期限切れ、形式不正）
    #[error("トークンの検証に失敗しました: {0}")]
    TokenInvalid(String),
}

/// Base64エンコーディング（Standard）
pub fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// SHA-1ハッシュ計算。
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-1の小文字16進ダイジェスト（40文字）。
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(sha1(data))
}

/// 16進SHA-1として妥当か（40文字、小文字16進）。
pub fn is_sha1_hex(value: &str) -> bool {
    value.len() == 40 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// B2アカウント認可用の `Authorization` ヘッダー値を構築する。
///
/// `Basic base64(keyId:applicationKey)`
pub fn basic_authorization(key_id: &str, application_key: &str) -> String {
    format!("Basic {}", b64().encode(format!("{key_id}:{application_key}")))
}

/// Gatewayアクセストークンのクレーム。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// ユーザーID
    pub sub: String,
    /// 発行時刻（UNIX秒）
    pub iat: i64,
    /// 有効期限（UNIX秒）
    pub exp: i64,
}

/// HS256アクセストークンを発行する。
pub fn issue_token(
    user_id: &str,
    secret: &str,
    valid_days: i64,
    now: DateTime<Utc>,
) -> Result<String, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::EmptySecret);
    }
    let expires_at = TimeDelta::try_days(valid_days)
        .and_then(|valid| now.checked_add_signed(valid))
        .ok_or_else(|| CryptoError::TokenIssue(format!("有効日数が範囲外です: {valid_days}")))?;
    let claims = TokenClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| CryptoError::TokenIssue(e.to_string()))
}

/// HS256アクセストークンを検証し、クレームを返す。
pub fn verify_token(token: &str, secret: &str) -> Result<TokenClaims, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::EmptySecret);
    }
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| CryptoError::TokenInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_vectors() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(sha1_hex(b"hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn test_sha1_is_deterministic() {
        let data = vec![7u8; 4096];
        assert_eq!(sha1_hex(&data), sha1_hex(&data));
        assert!(is_sha1_hex(&sha1_hex(&data)));
    }

    #[test]
    fn test_is_sha1_hex_rejects_uppercase_and_length() {
        assert!(!is_sha1_hex("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"));
        assert!(!is_sha1_hex("aaf4c6"));
        assert!(!is_sha1_hex("zaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"));
    }

    #[test]
    fn test_basic_authorization() {
        // base64("keyId:secret") = "a2V5SWQ6c2VjcmV0"
        assert_eq!(basic_authorization("keyId", "secret"), "Basic a2V5SWQ6c2VjcmV0");
    }

    #[test]
    fn test_token_roundtrip() {
        let token = issue_token("user-1", "s3cret", 30, Utc::now()).unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_wrong_secret_rejected() {
        let token = issue_token("user-1", "s3cret", 30, Utc::now()).unwrap();
        assert!(matches!(
            verify_token(&token, "other"),
            Err(CryptoError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_token_expired_rejected() {
        let issued = Utc::now() - TimeDelta::days(40);
        let token = issue_token("user-1", "s3cret", 30, issued).unwrap();
        assert!(verify_token(&token, "s3cret").is_err());
    }

    #[test]
    fn test_out_of_range_validity_is_error() {
        for days in [100_000_000, i64::MAX, i64::MIN] {
            assert!(matches!(
                issue_token("user-1", "s3cret", days, Utc::now()),
                Err(CryptoError::TokenIssue(_))
            ));
        }
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            issue_token("user-1", "", 30, Utc::now()),
            Err(CryptoError::EmptySecret)
        ));
        assert!(matches!(verify_token("x.y.z", ""), Err(CryptoError::EmptySecret)));
    }
}
