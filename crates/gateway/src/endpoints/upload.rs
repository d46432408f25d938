//! # POST /api/b2/upload
//!
//! ヘッダーでファイル情報を受け取り、本文をB2へアップロードする。
//!
//! | ヘッダー | 内容 |
//! |---------|------|
//! | `Display-Name` | オブジェクトキー |
//! | `File-Size` | バイト数（0以上の整数） |
//! | `Content-Type` | MIMEタイプ |
//! | `SHA-1` | 本文のSHA-1 |

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;
use b2edge_core::{upload_to, ByteStream, UploadBody};
use b2edge_types::{headers, UploadRequest, UploadResult};
use futures::TryStreamExt;

use crate::auth::Authenticated;
use crate::config::GatewayState;
use crate::error::GatewayError;

/// 必須ヘッダーを取り出す。欠落・空は400。
pub(crate) fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &str,
) -> Result<&'a str, GatewayError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::BadRequest(format!("Missing or empty {name} header")))
}

/// 呼び出し側が指定したSHA-1を検証し、小文字に揃える。不正なら400。
pub(crate) fn normalize_sha1(raw: &str) -> Result<String, GatewayError> {
    let sha1 = raw.to_ascii_lowercase();
    if !b2edge_crypto::is_sha1_hex(&sha1) {
        return Err(GatewayError::BadRequest(format!(
            "{} は40文字の16進数である必要があります",
            headers::SHA1
        )));
    }
    Ok(sha1)
}

/// リクエスト本文をアップロードボディのストリームにする。
pub(crate) fn body_stream(body: Body) -> UploadBody {
    let stream: ByteStream = Box::pin(body.into_data_stream().map_err(std::io::Error::other));
    UploadBody::Stream(stream)
}

/// ヘッダーからアップロード要求を組み立てる。
pub(crate) fn upload_request(headers: &HeaderMap) -> Result<UploadRequest, GatewayError> {
    let full_file_name = required_header(headers, headers::DISPLAY_NAME)?;
    let file_size = required_header(headers, headers::FILE_SIZE)?;
    let content_length: u64 = file_size.parse().map_err(|_| {
        GatewayError::BadRequest(format!("{} は0以上の整数である必要があります", headers::FILE_SIZE))
    })?;
    let mime_type = required_header(headers, CONTENT_TYPE.as_str())?;
    let sha1 = normalize_sha1(required_header(headers, headers::SHA1)?)?;

    Ok(UploadRequest {
        full_file_name: full_file_name.to_string(),
        mime_type: mime_type.to_string(),
        content_length: Some(content_length),
        sha1: Some(sha1),
    })
}

/// POST /api/b2/upload: B2ネイティブ形式でアップロード結果を返す。
pub async fn handle_upload(
    State(state): State<Arc<GatewayState>>,
    Authenticated(claims): Authenticated,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResult>, GatewayError> {
    let request = upload_request(&headers)?;
    tracing::info!(
        sub = %claims.sub,
        file_name = %request.full_file_name,
        size = ?request.content_length,
        "アップロード要求を受信"
    );

    let target = state.fresh_upload_credential().await?;
    let (uploaded, _) = upload_to(state.b2.as_ref(), &target, request, body_stream(body)).await?;
    Ok(Json(UploadResult::Native(uploaded)))
}
