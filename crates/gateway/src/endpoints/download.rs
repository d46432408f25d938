//! # GET /api/b2/download/{*key}
//!
//! バケットの公開URLへのパススルー。条件付きリクエストのヘッダーを転送し、
//! 本文はストリームのまま返す。

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    CACHE_CONTROL, CONNECTION, IF_MODIFIED_SINCE, IF_NONE_MATCH, RANGE, TRANSFER_ENCODING,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::GatewayState;
use crate::error::GatewayError;

const FORWARDED: [HeaderName; 3] = [RANGE, IF_NONE_MATCH, IF_MODIFIED_SINCE];
const HOP_BY_HOP: [HeaderName; 2] = [CONNECTION, TRANSFER_ENCODING];

/// 公開ベースURLにオブジェクトキーを連結する。キーはセグメント単位でエンコードする。
pub(crate) fn object_url(base: &str, key: &str) -> Result<reqwest::Url, GatewayError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| GatewayError::Internal(format!("B2_BUCKET_PUBLIC_BASE_URL が不正です: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::Internal("B2_BUCKET_PUBLIC_BASE_URL がベースURLではありません".to_string()))?
        .pop_if_empty()
        .extend(key.split('/'));
    Ok(url)
}

/// GET /api/b2/download/{*key}: ファイルダウンロードの中継。
pub async fn handle_download(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(GatewayError::BadRequest("File path required".to_string()));
    }
    let base = state
        .config
        .public_base_url
        .as_deref()
        .ok_or_else(|| GatewayError::Internal("B2_BUCKET_PUBLIC_BASE_URL が設定されていません".to_string()))?;
    let url = object_url(base, key)?;

    let mut request = state.http_client.get(url);
    for name in FORWARDED {
        if let Some(value) = headers.get(&name) {
            request = request.header(name, value.clone());
        }
    }

    let upstream = request.send().await.map_err(|e| {
        tracing::error!(key, error = %e, "ダウンロード元への接続に失敗");
        GatewayError::BadGateway(e.to_string())
    })?;

    let status = upstream.status();
    if !status.is_success() && status != StatusCode::NOT_MODIFIED {
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound("File not found".to_string()));
        }
        tracing::warn!(key, status = status.as_u16(), "ダウンロード元がエラーを返しました");
        return Err(GatewayError::BadGateway(format!(
            "Upstream status {}",
            status.as_u16()
        )));
    }

    let mut response_headers = upstream.headers().clone();
    for name in HOP_BY_HOP {
        response_headers.remove(name);
    }
    if let Ok(value) = HeaderValue::from_str(&state.config.cache_control) {
        response_headers.insert(CACHE_CONTROL, value);
    }
    response_headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    tracing::debug!(key, status = status.as_u16(), "ダウンロードを中継");
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
