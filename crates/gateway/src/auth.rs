//! # アクセストークン認証
//!
//! `Authorization` ヘッダーのHS256トークンを `TOKEN_SECRET` で検証する。
//! `Bearer ` 接頭辞は省略可。

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use b2edge_crypto::TokenClaims;

use crate::config::GatewayState;
use crate::error::GatewayError;

/// 認証済みリクエストを表すエクストラクタ。
#[derive(Debug, Clone)]
pub struct Authenticated(pub TokenClaims);

/// ヘッダーのトークンを検証する。
///
/// ヘッダー欠落 → 401、シークレット未設定 → 500、トークン不正 → 401 の順に判定する。
pub(crate) fn verify_bearer(
    headers: &HeaderMap,
    secret: Option<&str>,
) -> Result<TokenClaims, GatewayError> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::Unauthorized("Missing Authorization header".to_string()))?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);

    let secret = secret
        .ok_or_else(|| GatewayError::Internal("TOKEN_SECRET が設定されていません".to_string()))?;

    b2edge_crypto::verify_token(token, secret).map_err(|e| {
        tracing::warn!(error = %e, "アクセストークンの検証に失敗");
        GatewayError::Unauthorized("Invalid token".to_string())
    })
}

impl FromRequestParts<Arc<GatewayState>> for Authenticated {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let claims = verify_bearer(&parts.headers, state.config.token_secret.as_deref())?;
        tracing::debug!(sub = %claims.sub, "アクセストークンを検証");
        Ok(Authenticated(claims))
    }
}
