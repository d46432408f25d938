//! # GET /api/b2/get-upload-url
//!
//! 鮮度確認済みのアップロードURLと認可トークンを返す。
//! クライアントはこれを使ってB2へ直接アップロードできる。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use b2edge_types::UploadUrlResponse;

use crate::auth::Authenticated;
use crate::config::GatewayState;
use crate::error::GatewayError;

pub async fn handle_get_upload_url(
    State(state): State<Arc<GatewayState>>,
    Authenticated(claims): Authenticated,
) -> Result<Json<UploadUrlResponse>, GatewayError> {
    let credential = state.fresh_upload_credential().await?;
    tracing::info!(sub = %claims.sub, expires_at = %credential.expires_at, "アップロードURLを払い出し");
    Ok(Json(UploadUrlResponse {
        upload_url: credential.upload_url,
        authorization_token: credential.authorization_token,
    }))
}
