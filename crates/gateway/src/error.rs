//! # Gateway エラー型

use axum::http::StatusCode;
use b2edge_core::{B2Error, KvError};

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト
    #[error("{0}")]
    BadRequest(String),
    /// 認証失敗（ヘッダー欠落・トークン不正）
    #[error("{0}")]
    Unauthorized(String),
    /// 対象が存在しない
    #[error("{0}")]
    NotFound(String),
    /// B2とのやり取りに失敗
    #[error("B2操作に失敗: {0}")]
    Upstream(#[from] B2Error),
    /// KV操作に失敗
    #[error("KV操作に失敗: {0}")]
    Kv(#[from] KvError),
    /// ダウンロード元への中継に失敗
    #[error("Proxy error: {0}")]
    BadGateway(String),
    /// 内部エラー（設定不足等）
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) | GatewayError::Kv(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "リクエスト処理に失敗");
        }
        (status, self.to_string()).into_response()
    }
}
