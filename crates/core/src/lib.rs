//! # b2edge コア
//!
//! Backblaze B2 へのアップロードを、キャッシュ済みの資格情報で行うためのライブラリ。
//!
//! ## 構成
//! - [`api`]: B2 API（認可・アップロードURL取得・アップロード）のクライアント
//! - [`cache`]: 資格情報キャッシュ（ファイル / KV / メモリ）
//! - [`kv`]: キーバリューストアの抽象（メモリ / Cloudflare Workers KV）
//! - [`hasher`]: アップロードボディの長さとSHA-1の計算
//! - [`uploader`]: 資格情報の鮮度を管理するアップロードオーケストレータ
//!
//! ## 資格情報の流れ
//! 1. 起動時にキャッシュから読み込み、失効していれば再取得して保存する
//! 2. アップロード直前にアカウント資格情報 → アップロードURL資格情報の順で鮮度を確認する
//! 3. 確認済みのアップロードURLへボディを送信する（自動リトライなし）

pub mod api;
pub mod cache;
pub mod clock;
pub mod error;
pub mod hasher;
pub mod kv;
pub mod uploader;

pub use api::{B2Api, B2Client};
pub use cache::{CacheError, CredentialCache, FileCache, KvCache, MemoryCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::B2Error;
pub use hasher::{hash_body, ByteStream, HashedBody, UploadBody};
pub use kv::{CloudflareKv, KvError, KvNamespace, MemoryKv};
pub use uploader::{
    prepare_upload, upload_to, CacheWarning, CachedUploader, CredentialKind, PreparedUpload,
    UploadUrlPolicy, UploaderSettings,
};
