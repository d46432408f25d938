//! # B2 エラー型
//!
//! アップロード経路で発生する失敗の分類。

/// B2との通信・アップロードに関するエラー型。
#[derive(Debug, thiserror::Error)]
pub enum B2Error {
    /// アカウントキー等の設定不足
    #[error("設定エラー: {0}")]
    Config(String),
    /// 認可・アップロードURL取得が非2xxを返した。
    /// `code` はB2のエラーコード、解析できなければ `"api error"`。
    #[error("B2 APIエラー ({op}): {code} (HTTP {status})")]
    Api {
        op: &'static str,
        code: String,
        status: u16,
        body: String,
    },
    /// 2xxだがレスポンスの形が期待と異なる
    #[error("B2レスポンスの形式が不正 ({op}): {}", .issues.join(", "))]
    Schema {
        op: &'static str,
        issues: Vec<String>,
        body: String,
    },
    /// アップロードが非2xxで拒否された（SHA-1不一致等）
    #[error("Upload failed: {status} - {body}")]
    UploadRejected { status: u16, body: String },
    /// 通信失敗（タイムアウトを含む）
    #[error("B2への通信に失敗 ({op}): {message}")]
    Http {
        op: &'static str,
        message: String,
        timeout: bool,
    },
    /// ストリームボディの読み取り失敗
    #[error("アップロードボディの読み取りに失敗: {0}")]
    Io(#[from] std::io::Error),
}

impl B2Error {
    /// reqwestのエラーを通信失敗として包む。
    pub(crate) fn http(op: &'static str, e: reqwest::Error) -> Self {
        B2Error::Http {
            op,
            timeout: e.is_timeout(),
            message: e.to_string(),
        }
    }

    /// 次回の呼び出しで回復しうる失敗か。
    ///
    /// 通信失敗とアップロード拒否はリトライ可能。
    /// 設定不足・認可失敗・形式不正は呼び出し側の対処が必要。
    pub fn is_retryable(&self) -> bool {
        match self {
            B2Error::Http { .. } | B2Error::UploadRejected { .. } => true,
            B2Error::Api { status, .. } => *status >= 500,
            B2Error::Config(_) | B2Error::Schema { .. } | B2Error::Io(_) => false,
        }
    }
}
