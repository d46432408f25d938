//! # KVメタデータAPI
//!
//! | メソッド | パス | 内容 |
//! |---------|------|------|
//! | GET | `/api/b2/kv?prefix=` | キー名のJSON配列 |
//! | GET | `/api/b2/kv/{key}` | 値（無ければ `null`） |
//! | POST | `/api/b2/kv/{key}` | 本文を保存。TTLは `X-Expiration-Seconds`（既定86400秒） |
//! | DELETE | `/api/b2/kv/{key}` | 削除 |
//!
//! 資格情報キャッシュのキー（`b2_auth_*`, `b2_upload_url_*`）は読み書きできず、一覧にも出ない。

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use b2edge_core::cache::is_credential_key;
use b2edge_core::KvError;
use b2edge_types::{headers, KvListQuery};

use crate::auth::Authenticated;
use crate::config::GatewayState;
use crate::error::GatewayError;

/// `X-Expiration-Seconds` 未指定時のTTL
pub const DEFAULT_EXPIRATION_SECS: u64 = 86_400;

const NULL: &str = "null";

/// 不正なキーはクライアントの誤りとして400にする。
fn kv_error(err: KvError) -> GatewayError {
    match err {
        KvError::InvalidKey(message) => GatewayError::BadRequest(message),
        other => GatewayError::Kv(other),
    }
}

/// 資格情報キャッシュのキーは400。
fn user_key(key: &str) -> Result<&str, GatewayError> {
    if is_credential_key(key) {
        return Err(GatewayError::BadRequest(format!("Reserved key: {key}")));
    }
    Ok(key)
}

/// `X-Expiration-Seconds` を読む。未指定なら既定値。
pub(crate) fn expiration(headers: &HeaderMap) -> Result<Duration, GatewayError> {
    let Some(raw) = headers.get(headers::EXPIRATION_SECONDS) else {
        return Ok(Duration::from_secs(DEFAULT_EXPIRATION_SECS));
    };
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            GatewayError::BadRequest(format!(
                "{} は正の整数である必要があります",
                headers::EXPIRATION_SECONDS
            ))
        })
}

fn null_json() -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "application/json")], NULL).into_response()
}

/// GET /api/b2/kv
pub async fn handle_kv_list(
    State(state): State<Arc<GatewayState>>,
    _auth: Authenticated,
    Query(query): Query<KvListQuery>,
) -> Result<Json<Vec<String>>, GatewayError> {
    let keys = state.kv.list(query.prefix.as_deref()).await.map_err(kv_error)?;
    Ok(Json(keys.into_iter().filter(|key| !is_credential_key(key)).collect()))
}

/// GET /api/b2/kv/{key}
pub async fn handle_kv_get(
    State(state): State<Arc<GatewayState>>,
    _auth: Authenticated,
    Path(key): Path<String>,
) -> Result<Response, GatewayError> {
    let value = state.kv.get(user_key(&key)?).await.map_err(kv_error)?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain")],
        value.unwrap_or_else(|| NULL.to_string()),
    )
        .into_response())
}

/// POST /api/b2/kv/{key}
pub async fn handle_kv_put(
    State(state): State<Arc<GatewayState>>,
    Authenticated(claims): Authenticated,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, GatewayError> {
    let ttl = expiration(&headers)?;
    state
        .kv
        .put(user_key(&key)?, &body, Some(ttl))
        .await
        .map_err(kv_error)?;
    tracing::debug!(sub = %claims.sub, key = %key, ttl_secs = ttl.as_secs(), "KVに書き込み");
    Ok(null_json())
}

/// DELETE /api/b2/kv/{key}
pub async fn handle_kv_delete(
    State(state): State<Arc<GatewayState>>,
    Authenticated(claims): Authenticated,
    Path(key): Path<String>,
) -> Result<Response, GatewayError> {
    state.kv.delete(user_key(&key)?).await.map_err(kv_error)?;
    tracing::debug!(sub = %claims.sub, key = %key, "KVから削除");
    Ok(null_json())
}
