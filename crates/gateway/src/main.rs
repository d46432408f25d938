//! # b2edge Gateway
//!
//! Backblaze B2バケットの前段に置くHTTPエッジプロキシ。
//!
//! ## 役割
//! - 公開バケットからのダウンロード中継（条件付きリクエスト・キャッシュヘッダー付与）
//! - 資格情報をキャッシュしたアップロード（ヘッダー形式・クエリ形式）
//! - クライアント直接アップロード用のアップロードURL払い出し
//! - KVメタデータストア
//!
//! エンドポイント一覧は [`endpoints`] を参照。

mod auth;
mod config;
mod endpoints;
mod error;
mod middleware;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{GatewayConfig, GatewayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    let addr = config.bind_addr.clone();
    let state = Arc::new(GatewayState::from_config(config)?);
    let app = endpoints::router(state);

    tracing::info!(addr = %addr, "Gatewayを起動");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
