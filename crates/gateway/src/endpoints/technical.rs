//! # 技術系エンドポイント
//!
//! ルート・バージョン・死活監視と、未定義ルートの応答。

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::config::GatewayState;

const TEXT_PLAIN: &str = "text/plain";

/// GET /: ルートへのアクセスは許可しない。
pub async fn handle_root() -> impl IntoResponse {
    (
        StatusCode::FORBIDDEN,
        [(CONTENT_TYPE, TEXT_PLAIN)],
        "Access to root path is not allowed",
    )
}

/// GET /api/b2/version
pub async fn handle_version(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, TEXT_PLAIN)],
        state.config.version.clone(),
    )
}

/// GET /api/b2/is-online
pub async fn handle_is_online() -> impl IntoResponse {
    (StatusCode::OK, [(CONTENT_TYPE, TEXT_PLAIN)], "OK")
}

/// 未定義のルート・メソッド。
pub async fn handle_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(CONTENT_TYPE, TEXT_PLAIN)],
        "Method not allowed",
    )
}
