//! # b2edge CLI
//!
//! Gatewayを介さずにB2へ直接アップロードする運用ツール。
//! 資格情報はファイルキャッシュ（既定 `data/memo/`）に保存し、次回の実行で再利用する。
//!
//! ## 環境変数
//! - `B2_ACCOUNT` / `B2_KEY`: B2アプリケーションキー
//! - `B2_AUTH_URL`: `b2_authorize_account` のURL（省略時は本番）
//! - `UPLOAD_URL_POLICY`: `independent` / `follow-account`
//! - `TOKEN_SECRET`: `token` サブコマンドの署名シークレット

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use b2edge_core::api::{DEFAULT_AUTHORIZE_URL, DEFAULT_TIMEOUT_SECS};
use b2edge_core::{
    hash_body, B2Client, CachedUploader, Clock, FileCache, SystemClock, UploadBody,
    UploadUrlPolicy, UploaderSettings,
};
use b2edge_types::UploadRequest;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// `token --days` の上限（10年）
const MAX_TOKEN_VALID_DAYS: i64 = 3650;

#[derive(Parser)]
#[command(name = "b2edge", about = "b2edge CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// 出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// B2のレスポンス `{fileId, uploadTimestamp, ...}`
    Native,
    /// `{success, key, size, contentType}`
    Proxied,
}

#[derive(Subcommand)]
enum Commands {
    /// ローカルファイルをアップロードする
    Upload {
        /// アップロードするファイル
        file: PathBuf,
        /// オブジェクトキー（省略時はファイル名）
        #[arg(long)]
        name: Option<String>,
        /// MIMEタイプ（省略時は拡張子から推定）
        #[arg(long)]
        mime: Option<String>,
        /// 資格情報キャッシュのディレクトリ
        #[arg(long, default_value = "data/memo")]
        cache_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Native)]
        format: OutputFormat,
    },
    /// ファイルのサイズとSHA-1を表示する
    Hash {
        file: PathBuf,
    },
    /// Gateway用のアクセストークンを発行する
    Token {
        /// トークンの主体
        #[arg(long)]
        user: String,
        /// 有効日数
        #[arg(
            long,
            default_value_t = b2edge_crypto::DEFAULT_TOKEN_VALID_DAYS,
            value_parser = clap::value_parser!(i64).range(1..=MAX_TOKEN_VALID_DAYS)
        )]
        days: i64,
    },
}

fn env_required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{name} が設定されていません"))
}

/// 明示されたキーを優先し、無ければファイル名を使う。
fn object_key(file: &Path, name: Option<String>) -> anyhow::Result<String> {
    match name {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("ファイル名を取得できません: {}", file.display())),
    }
}

/// 明示されたMIMEタイプを優先し、無ければ拡張子から推定する。
fn mime_type(file: &Path, mime: Option<String>) -> String {
    mime.unwrap_or_else(|| {
        mime_guess::from_path(file)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    })
}

async fn read_file(file: &Path) -> anyhow::Result<Bytes> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("ファイルを読み込めません: {}", file.display()))?;
    Ok(Bytes::from(data))
}

async fn upload(
    file: PathBuf,
    name: Option<String>,
    mime: Option<String>,
    cache_dir: PathBuf,
    format: OutputFormat,
) -> anyhow::Result<serde_json::Value> {
    let url_policy = match std::env::var("UPLOAD_URL_POLICY") {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(anyhow::Error::msg)?,
        _ => UploadUrlPolicy::default(),
    };
    let settings = UploaderSettings {
        key_id: env_required("B2_ACCOUNT")?,
        application_key: env_required("B2_KEY")?,
        url_policy,
    };
    let authorize_url =
        std::env::var("B2_AUTH_URL").unwrap_or_else(|_| DEFAULT_AUTHORIZE_URL.to_string());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let api = B2Client::with_timeout(
        Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        authorize_url,
        clock.clone(),
    )?;
    let mut uploader = CachedUploader::initialize(
        settings,
        Arc::new(api),
        Box::new(FileCache::account_in(&cache_dir)),
        Box::new(FileCache::upload_url_in(&cache_dir)),
        clock,
    )
    .await?;

    let key = object_key(&file, name)?;
    let content_type = mime_type(&file, mime);
    let body = UploadBody::Bytes(read_file(&file).await?);
    tracing::info!(key = %key, content_type = %content_type, "アップロード開始");

    let result = match format {
        OutputFormat::Native => {
            serde_json::to_value(uploader.upload(UploadRequest::new(key, content_type), body).await?)?
        }
        OutputFormat::Proxied => {
            serde_json::to_value(uploader.upload_proxied(&key, &content_type, None, body).await?)?
        }
    };
    for warning in uploader.take_cache_warnings() {
        tracing::warn!(%warning, "資格情報キャッシュを保存できませんでした");
    }
    Ok(result)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Upload {
            file,
            name,
            mime,
            cache_dir,
            format,
        } => {
            let result = upload(file, name, mime, cache_dir, format).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Hash { file } => {
            let hashed = hash_body(UploadBody::Bytes(read_file(&file).await?)).await?;
            println!("{}  {} bytes  {}", hashed.sha1, hashed.len(), file.display());
        }
        Commands::Token { user, days } => {
            let secret = env_required("TOKEN_SECRET")?;
            let token = b2edge_crypto::issue_token(&user, &secret, days, chrono::Utc::now())?;
            println!("{token}");
        }
    }
    Ok(())
}
