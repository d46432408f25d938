//! # Gatewayエンドポイント
//!
//! | メソッド | パス | 認証 |
//! |---------|------|------|
//! | GET | `/` | - |
//! | GET | `/api/b2/version`, `/api/b2/is-online` | - |
//! | GET | `/api/b2/download/{*key}` | - |
//! | GET | `/api/b2/get-upload-url` | Bearer |
//! | POST | `/api/b2/upload`, `/api/b2/upload-path` | Bearer |
//! | GET/POST/DELETE | `/api/b2/kv`, `/api/b2/kv/{key}` | Bearer |

pub mod download;
pub mod get_upload_url;
pub mod kv;
pub mod technical;
pub mod upload;
pub mod upload_path;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use b2edge_types::paths;

pub use download::handle_download;
pub use get_upload_url::handle_get_upload_url;
pub use kv::{handle_kv_delete, handle_kv_get, handle_kv_list, handle_kv_put};
pub use technical::{handle_is_online, handle_not_allowed, handle_root, handle_version};
pub use upload::handle_upload;
pub use upload_path::handle_upload_path;

use crate::config::GatewayState;
use crate::middleware::{cors, server_timing};

/// 全ルートとミドルウェアを組み立てる。
pub fn router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route(paths::VERSION, get(handle_version))
        .route(paths::IS_ONLINE, get(handle_is_online))
        .route(&format!("{}/{{*key}}", paths::DOWNLOAD), get(handle_download))
        .route(paths::GET_UPLOAD_URL, get(handle_get_upload_url))
        .route(paths::UPLOAD, post(handle_upload))
        .route(paths::UPLOAD_PATH, post(handle_upload_path))
        .route(paths::KV, get(handle_kv_list))
        .route(
            &format!("{}/{{key}}", paths::KV),
            get(handle_kv_get).post(handle_kv_put).delete(handle_kv_delete),
        )
        .method_not_allowed_fallback(handle_not_allowed);

    Router::new()
        .route("/", get(handle_root))
        .nest(paths::API_BASE, api)
        .method_not_allowed_fallback(handle_not_allowed)
        .fallback(handle_not_allowed)
        .layer(from_fn_with_state(state.clone(), cors))
        .layer(from_fn(server_timing))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// テスト
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Bytes;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::Json;
    use b2edge_core::{B2Client, ManualClock, MemoryKv};
    use chrono::{DateTime, Utc};

    use crate::config::{CredentialStore, GatewayConfig};

    const SECRET: &str = "test-secret";

    fn start() -> DateTime<Utc> {
        "2025-06-01T00:00:00Z".parse().unwrap()
    }

    fn header(headers: &HeaderMap, name: &str) -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn serve(listener: tokio::net::TcpListener, app: Router) {
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    /// モックB2への呼び出し回数
    #[derive(Default)]
    struct Hits {
        authorize: AtomicUsize,
        upload_url: AtomicUsize,
    }

    /// B2 APIとバケット公開URLを兼ねるモックサーバー。
    /// 認可は少し遅らせ、同時リクエストが再取得中に重なるようにする。
    /// アップロードは `X-Bz-Content-Sha1` と本文のSHA-1が一致する場合のみ受け付ける。
    async fn spawn_mock_b2(hits: Arc<Hits>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());

        let api_url = base.clone();
        let upload_url = format!("{base}/upload");
        let url_hits = hits.clone();
        let app = Router::new()
            .route(
                "/auth",
                get(move || {
                    hits.authorize.fetch_add(1, Ordering::SeqCst);
                    let api_url = api_url.clone();
                    async move {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        Json(serde_json::json!({
                            "accountId": "acc-1",
                            "apiUrl": api_url,
                            "authorizationToken": "account-token",
                            "allowed": { "bucketId": "bucket-1" }
                        }))
                    }
                }),
            )
            .route(
                "/b2api/v2/b2_get_upload_url",
                get(move || {
                    url_hits.upload_url.fetch_add(1, Ordering::SeqCst);
                    let upload_url = upload_url.clone();
                    async move {
                        Json(serde_json::json!({
                            "bucketId": "bucket-1",
                            "uploadUrl": upload_url,
                            "authorizationToken": "upload-token"
                        }))
                    }
                }),
            )
            .route(
                "/upload",
                post(|headers: HeaderMap, body: Bytes| async move {
                    if header(&headers, "x-bz-content-sha1") != b2edge_crypto::sha1_hex(&body) {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(serde_json::json!({
                                "code": "bad_request",
                                "message": "Sha1 did not match data received",
                                "status": 400
                            })),
                        )
                            .into_response();
                    }
                    Json(serde_json::json!({
                        "fileId": "4_z_file",
                        "fileName": header(&headers, "x-bz-file-name"),
                        "uploadTimestamp": 1_717_200_000_000_i64,
                        "bucketId": "bucket-1"
                    }))
                    .into_response()
                }),
            )
            .route(
                "/file/bucket/{*path}",
                get(|Path(path): Path<String>, headers: HeaderMap| async move {
                    match path.as_str() {
                        "missing.txt" => StatusCode::NOT_FOUND.into_response(),
                        "broken.txt" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                        _ if header(&headers, "if-none-match") == "\"v1\"" => {
                            StatusCode::NOT_MODIFIED.into_response()
                        }
                        _ => (
                            StatusCode::OK,
                            [("content-type", "text/plain"), ("etag", "\"v1\"")],
                            format!("content of {path}"),
                        )
                            .into_response(),
                    }
                }),
            );

        serve(listener, app).await;
        base
    }

    struct TestGateway {
        base: String,
        hits: Arc<Hits>,
        clock: Arc<ManualClock>,
        client: reqwest::Client,
        token: String,
    }

    impl TestGateway {
        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        fn bearer(&self) -> String {
            format!("Bearer {}", self.token)
        }
    }

    async fn spawn_gateway() -> TestGateway {
        let hits = Arc::new(Hits::default());
        let b2_base = spawn_mock_b2(hits.clone()).await;

        let clock = Arc::new(ManualClock::new(start()));
        let config = GatewayConfig {
            b2_key_id: "keyId".to_string(),
            b2_application_key: "appKey".to_string(),
            token_secret: Some(SECRET.to_string()),
            public_base_url: Some(format!("{b2_base}/file/bucket")),
            authorize_url: format!("{b2_base}/auth"),
            credential_store: CredentialStore::Kv,
            ..GatewayConfig::default()
        };
        let b2 = B2Client::new(reqwest::Client::new(), config.authorize_url.clone(), clock.clone());
        let state = Arc::new(GatewayState::new(
            config,
            reqwest::Client::new(),
            Arc::new(MemoryKv::new()),
            Arc::new(b2),
            clock.clone(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        serve(listener, router(state)).await;

        TestGateway {
            base,
            hits,
            clock,
            client: reqwest::Client::new(),
            token: b2edge_crypto::issue_token("user-1", SECRET, 30, Utc::now()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_technical_routes() {
        let gw = spawn_gateway().await;

        let resp = gw.client.get(gw.url("/")).send().await.unwrap();
        assert_eq!(resp.status(), 403);
        assert!(resp.headers().get("server-timing").is_some());
        assert_eq!(resp.text().await.unwrap(), "Access to root path is not allowed");

        let resp = gw.client.get(gw.url("/api/b2/is-online")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(resp.headers(), "access-control-allow-origin"), "*");
        assert_eq!(resp.text().await.unwrap(), "OK");

        let resp = gw.client.get(gw.url("/api/b2/version")).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), env!("CARGO_PKG_VERSION"));

        let resp = gw.client.get(gw.url("/api/b2/nothing")).send().await.unwrap();
        assert_eq!(resp.status(), 405);
        assert_eq!(resp.text().await.unwrap(), "Method not allowed");

        // 定義済みパスでもメソッドが違えば405
        let resp = gw.client.put(gw.url("/api/b2/upload")).send().await.unwrap();
        assert_eq!(resp.status(), 405);
        assert!(resp.headers().get("server-timing").is_some());
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let gw = spawn_gateway().await;

        let resp = gw
            .client
            .request(reqwest::Method::OPTIONS, gw.url("/api/b2/upload"))
            .header("origin", "https://app.example")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(resp.headers(), "access-control-allow-origin"), "*");
        assert!(header(resp.headers(), "access-control-allow-methods").contains("POST"));
        assert!(header(resp.headers(), "access-control-allow-headers").contains("Display-Name"));
    }

    #[tokio::test]
    async fn test_authenticated_routes_reject_missing_or_bad_token() {
        let gw = spawn_gateway().await;

        let resp = gw.client.get(gw.url("/api/b2/get-upload-url")).send().await.unwrap();
        assert_eq!(resp.status(), 401);
        assert_eq!(resp.text().await.unwrap(), "Missing Authorization header");

        let resp = gw
            .client
            .get(gw.url("/api/b2/kv"))
            .header("authorization", "Bearer not-a-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        assert_eq!(resp.text().await.unwrap(), "Invalid token");

        // 認証失敗ではB2へ問い合わせない
        assert_eq!(gw.hits.authorize.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_reuses_cached_credentials() {
        let gw = spawn_gateway().await;
        let body = "hello world";

        for _ in 0..2 {
            let resp = gw
                .client
                .post(gw.url("/api/b2/upload"))
                .header("authorization", gw.bearer())
                .header("Display-Name", "docs/hello.txt")
                .header("File-Size", body.len().to_string())
                .header("Content-Type", "text/plain")
                .header("SHA-1", b2edge_crypto::sha1_hex(body.as_bytes()))
                .body(body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            let json: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(json["fileId"], "4_z_file");
            assert_eq!(json["uploadTimestamp"], 1_717_200_000_000_i64);
        }

        assert_eq!(gw.hits.authorize.load(Ordering::SeqCst), 1);
        assert_eq!(gw.hits.upload_url.load(Ordering::SeqCst), 1);
    }

    /// 失効後に同時に届いたアップロードでも、再取得はそれぞれ1回だけ
    #[tokio::test]
    async fn test_concurrent_uploads_refresh_once_after_expiry() {
        let gw = spawn_gateway().await;
        let body = "concurrent";

        let upload = |name: String| {
            gw.client
                .post(gw.url("/api/b2/upload"))
                .header("authorization", gw.bearer())
                .header("Display-Name", name)
                .header("File-Size", body.len().to_string())
                .header("Content-Type", "text/plain")
                .header("SHA-1", b2edge_crypto::sha1_hex(body.as_bytes()))
                .body(body)
                .send()
        };

        let resp = upload("warm.txt".to_string()).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(gw.hits.authorize.load(Ordering::SeqCst), 1);
        assert_eq!(gw.hits.upload_url.load(Ordering::SeqCst), 1);

        // 両方の資格情報が失効する
        gw.clock.advance(chrono::Duration::hours(24));

        let responses =
            futures::future::join_all((0..8).map(|i| upload(format!("file-{i}.txt")))).await;
        for resp in responses {
            assert_eq!(resp.unwrap().status(), 200);
        }

        assert_eq!(gw.hits.authorize.load(Ordering::SeqCst), 2);
        assert_eq!(gw.hits.upload_url.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_upload_missing_header_is_bad_request() {
        let gw = spawn_gateway().await;

        let resp = gw
            .client
            .post(gw.url("/api/b2/upload"))
            .header("authorization", gw.bearer())
            .header("Display-Name", "a.txt")
            .header("Content-Type", "text/plain")
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(resp.text().await.unwrap(), "Missing or empty File-Size header");
    }

    #[tokio::test]
    async fn test_upload_sha1_mismatch_surfaces_upstream_body() {
        let gw = spawn_gateway().await;

        let resp = gw
            .client
            .post(gw.url("/api/b2/upload"))
            .header("authorization", gw.bearer())
            .header("Display-Name", "a.txt")
            .header("File-Size", "5")
            .header("Content-Type", "text/plain")
            .header("SHA-1", "0000000000000000000000000000000000000000")
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let text = resp.text().await.unwrap();
        assert!(text.contains("Upload failed: 400"));
        assert!(text.contains("Sha1 did not match data received"));
    }

    #[tokio::test]
    async fn test_upload_path_hashes_body_locally() {
        let gw = spawn_gateway().await;

        let resp = gw
            .client
            .post(gw.url("/api/b2/upload-path?key=img/a.txt&contentType=text/plain"))
            .header("authorization", gw.bearer())
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "key": "img/a.txt",
                "size": 5,
                "contentType": "text/plain"
            })
        );
    }

    #[tokio::test]
    async fn test_get_upload_url() {
        let gw = spawn_gateway().await;

        let resp = gw
            .client
            .get(gw.url("/api/b2/get-upload-url"))
            .header("authorization", &gw.token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let json: serde_json::Value = resp.json().await.unwrap();
        assert!(json["uploadUrl"].as_str().unwrap().ends_with("/upload"));
        assert_eq!(json["authorizationToken"], "upload-token");
    }

    #[tokio::test]
    async fn test_kv_crud() {
        let gw = spawn_gateway().await;
        let auth = gw.bearer();

        let resp = gw
            .client
            .post(gw.url("/api/b2/kv/meta:a"))
            .header("authorization", &auth)
            .header("X-Expiration-Seconds", "600")
            .body(r#"{"title":"a"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(resp.headers(), "content-type"), "application/json");
        assert_eq!(resp.text().await.unwrap(), "null");

        gw.client
            .post(gw.url("/api/b2/kv/other"))
            .header("authorization", &auth)
            .body("x")
            .send()
            .await
            .unwrap();

        let resp = gw
            .client
            .get(gw.url("/api/b2/kv/meta:a"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), r#"{"title":"a"}"#);

        let keys: Vec<String> = gw
            .client
            .get(gw.url("/api/b2/kv?prefix=meta:"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(keys, vec!["meta:a"]);

        let resp = gw
            .client
            .post(gw.url("/api/b2/kv/bad-ttl"))
            .header("authorization", &auth)
            .header("X-Expiration-Seconds", "soon")
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = gw
            .client
            .delete(gw.url("/api/b2/kv/meta:a"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = gw
            .client
            .get(gw.url("/api/b2/kv/meta:a"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "null");
    }

    #[tokio::test]
    async fn test_kv_api_cannot_touch_credential_cache() {
        let gw = spawn_gateway().await;
        let auth = gw.bearer();

        // 初回アップロードで資格情報がKVに保存される
        let resp = gw
            .client
            .get(gw.url("/api/b2/get-upload-url"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        for key in ["b2_auth_dev", "b2_upload_url_dev"] {
            let resp = gw
                .client
                .get(gw.url(&format!("/api/b2/kv/{key}")))
                .header("authorization", &auth)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400);

            let resp = gw
                .client
                .post(gw.url(&format!("/api/b2/kv/{key}")))
                .header("authorization", &auth)
                .body(r#"{"uploadUrl":"https://attacker.example"}"#)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400);
        }

        let keys: Vec<String> = gw
            .client
            .get(gw.url("/api/b2/kv"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(keys.is_empty());

        let json: serde_json::Value = gw
            .client
            .get(gw.url("/api/b2/get-upload-url"))
            .header("authorization", &auth)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(json["uploadUrl"].as_str().unwrap().ends_with("/upload"));
        assert_eq!(gw.hits.authorize.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_download_pass_through() {
        let gw = spawn_gateway().await;

        let resp = gw
            .client
            .get(gw.url("/api/b2/download/docs/a.txt"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(resp.headers(), "etag"), "\"v1\"");
        assert_eq!(header(resp.headers(), "x-content-type-options"), "nosniff");
        assert_eq!(
            header(resp.headers(), "cache-control"),
            crate::config::DEFAULT_CACHE_CONTROL
        );
        assert_eq!(resp.text().await.unwrap(), "content of docs/a.txt");

        let resp = gw
            .client
            .get(gw.url("/api/b2/download/docs/a.txt"))
            .header("if-none-match", "\"v1\"")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 304);

        let resp = gw
            .client
            .get(gw.url("/api/b2/download/missing.txt"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.text().await.unwrap(), "File not found");

        let resp = gw
            .client
            .get(gw.url("/api/b2/download/broken.txt"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }
}
