//! # B2 API
//!
//! オーケストレータが使う3つのB2呼び出しの抽象インターフェースと、
//! reqwestによる実装 [`B2Client`]。
//!
//! | 操作 | B2 API |
//! |------|--------|
//! | [`B2Api::authorize_account`] | `b2_authorize_account` |
//! | [`B2Api::get_upload_url`] | `b2_get_upload_url` |
//! | [`B2Api::upload_file`] | `b2_upload_file` |

mod client;
pub(crate) mod schema;

pub use client::{B2Client, DEFAULT_AUTHORIZE_URL, DEFAULT_TIMEOUT_SECS};

use b2edge_types::{AccountCredential, UploadFileInfo, UploadUrlCredential, UploadedFile};
use bytes::Bytes;

use crate::error::B2Error;

/// B2 APIの抽象インターフェース。
///
/// テストではカウンタ付きのモック実装に差し替える。
#[async_trait::async_trait]
pub trait B2Api: Send + Sync {
    /// アカウントキーで認可し、アカウント資格情報を得る。
    async fn authorize_account(
        &self,
        key_id: &str,
        application_key: &str,
    ) -> Result<AccountCredential, B2Error>;

    /// アカウント資格情報を使ってアップロードURLを得る。
    async fn get_upload_url(
        &self,
        account: &AccountCredential,
    ) -> Result<UploadUrlCredential, B2Error>;

    /// アップロードURLへファイルを送信する。
    async fn upload_file(
        &self,
        target: &UploadUrlCredential,
        info: &UploadFileInfo,
        body: Bytes,
    ) -> Result<UploadedFile, B2Error>;
}
