//! # POST /api/b2/upload-path
//!
//! クエリでキーとMIMEタイプを受け取り、本文をそのままアップロードする。
//! `sha1` が空ならGateway側で計算する。

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::Json;
use b2edge_core::upload_to;
use b2edge_types::{ProxiedUpload, UploadPathQuery, UploadRequest, UploadResult};

use super::upload::{body_stream, normalize_sha1};
use crate::auth::Authenticated;
use crate::config::GatewayState;
use crate::error::GatewayError;

/// クエリからアップロード要求を組み立てる。サイズは本文から求める。
pub(crate) fn path_request(query: UploadPathQuery) -> Result<UploadRequest, GatewayError> {
    let key = query.key.trim();
    if key.is_empty() {
        return Err(GatewayError::BadRequest("Missing or empty key".to_string()));
    }
    let content_type = query.content_type.trim();
    if content_type.is_empty() {
        return Err(GatewayError::BadRequest("Missing or empty contentType".to_string()));
    }
    let sha1 = query.sha1.trim();

    let mut request = UploadRequest::new(key, content_type);
    if !sha1.is_empty() {
        request.sha1 = Some(normalize_sha1(sha1)?);
    }
    Ok(request)
}

/// POST /api/b2/upload-path: 簡易形式でアップロード結果を返す。
pub async fn handle_upload_path(
    State(state): State<Arc<GatewayState>>,
    Authenticated(claims): Authenticated,
    Query(query): Query<UploadPathQuery>,
    body: Body,
) -> Result<Json<UploadResult>, GatewayError> {
    let request = path_request(query)?;
    tracing::info!(sub = %claims.sub, key = %request.full_file_name, "パス指定アップロード要求を受信");

    let target = state.fresh_upload_credential().await?;
    let (_, info) = upload_to(state.b2.as_ref(), &target, request, body_stream(body)).await?;
    Ok(Json(UploadResult::Proxied(ProxiedUpload::from_info(&info))))
}
