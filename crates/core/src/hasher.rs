//! # コンテンツハッシュ
//!
//! アップロードボディを送信可能なバイト列に確定させ、長さとSHA-1を求める。
//!
//! | 入力 | 送信バイト列 |
//! |------|------------|
//! | `Bytes` | そのまま |
//! | `Text` | UTF-8 |
//! | `Json` | `serde_json::to_vec` の結果 |
//! | `Stream` | 全チャンクを連結した単一バッファ |

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// チャンク単位で読み出すボディ。
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// アップロードボディ。
pub enum UploadBody {
    Bytes(Bytes),
    Text(String),
    Json(serde_json::Value),
    Stream(ByteStream),
}

impl std::fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            UploadBody::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
            UploadBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            UploadBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for UploadBody {
    fn from(value: Bytes) -> Self {
        UploadBody::Bytes(value)
    }
}

impl From<Vec<u8>> for UploadBody {
    fn from(value: Vec<u8>) -> Self {
        UploadBody::Bytes(Bytes::from(value))
    }
}

impl From<String> for UploadBody {
    fn from(value: String) -> Self {
        UploadBody::Text(value)
    }
}

impl From<&str> for UploadBody {
    fn from(value: &str) -> Self {
        UploadBody::Text(value.to_string())
    }
}

impl From<serde_json::Value> for UploadBody {
    fn from(value: serde_json::Value) -> Self {
        UploadBody::Json(value)
    }
}

/// ハッシュ済みのボディ。
#[derive(Debug, Clone)]
pub struct HashedBody {
    /// 送信するバイト列
    pub bytes: Bytes,
    /// `bytes` のSHA-1（小文字16進）
    pub sha1: String,
}

impl HashedBody {
    fn from_bytes(bytes: Bytes) -> Self {
        let sha1 = b2edge_crypto::sha1_hex(&bytes);
        Self { bytes, sha1 }
    }

    /// バイト長
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// ボディを確定させ、長さとSHA-1を計算する。
///
/// ストリームは最後まで読み切ってから計算する。読み取り失敗はそのまま返す。
pub async fn hash_body(body: UploadBody) -> Result<HashedBody, std::io::Error> {
    match body {
        UploadBody::Bytes(bytes) => Ok(HashedBody::from_bytes(bytes)),
        UploadBody::Text(text) => Ok(HashedBody::from_bytes(Bytes::from(text.into_bytes()))),
        UploadBody::Json(value) => {
            let encoded = serde_json::to_vec(&value).map_err(std::io::Error::other)?;
            Ok(HashedBody::from_bytes(Bytes::from(encoded)))
        }
        UploadBody::Stream(stream) => drain_stream(stream).await.map(HashedBody::from_bytes),
    }
}

/// ストリームを単一バッファへ連結する。
async fn drain_stream(mut stream: ByteStream) -> Result<Bytes, std::io::Error> {
    let mut chunks = Vec::new();
    let mut total_length = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total_length += chunk.len();
        chunks.push(chunk);
    }

    let mut buffer = BytesMut::with_capacity(total_length);
    for chunk in chunks {
        buffer.extend_from_slice(&chunk);
    }
    tracing::debug!(total_length, "ストリームボディを連結");
    Ok(buffer.freeze())
}
