//! # 共通ミドルウェア
//!
//! - CORS: すべての応答にCORSヘッダーを付け、`OPTIONS` は200で即答する
//! - Server-Timing: 処理時間を `total;dur=<ms>` で付ける

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ORIGIN,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use b2edge_types::headers;

use crate::config::{GatewayConfig, GatewayState};

const ALLOW_METHODS: &str = "GET, HEAD, OPTIONS, POST, DELETE";

fn allow_headers() -> String {
    [
        "Authorization",
        "If-Modified-Since",
        headers::DISPLAY_NAME,
        headers::FILE_SIZE,
        "Content-Type",
        headers::SHA1,
        headers::EXPIRATION_SECONDS,
    ]
    .join(", ")
}

/// リクエストのオリジンに対するCORSヘッダーを組み立てる。
///
/// 許可リストにあるオリジンはそのまま返し、無ければ `*` が許可されている場合のみ `*`。
pub(crate) fn cors_headers(config: &GatewayConfig, origin: Option<&str>) -> HeaderMap {
    let mut out = HeaderMap::new();
    let allowed = &config.cors_allow_origins;

    let allow_origin = match origin {
        Some(o) if allowed.iter().any(|a| a == o) => Some(o),
        _ if allowed.iter().any(|a| a == "*") => Some("*"),
        _ => None,
    };
    if let Some(value) = allow_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        out.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    if let Ok(value) = HeaderValue::from_str(&config.cors_max_age) {
        out.insert(ACCESS_CONTROL_MAX_AGE, value);
    }
    out.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    if let Ok(value) = HeaderValue::from_str(&allow_headers()) {
        out.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
    out
}

/// CORSミドルウェア
pub async fn cors(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let cors = cors_headers(&state.config, origin.as_deref());

    if request.method() == Method::OPTIONS {
        return (StatusCode::OK, cors).into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(cors);
    response
}

/// Server-Timingミドルウェア
pub async fn server_timing(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let value = format!("total;dur={}", started.elapsed().as_millis());
    if let Ok(value) = HeaderValue::from_str(&value) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("server-timing"), value);
    }
    response
}
