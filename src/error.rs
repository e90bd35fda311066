//! エラー定義
//!
//! 起動時に致命的なエラー（設定・モデルのダウンロード/読み込み）と、
//! リクエスト単位で回復可能なエラー（画像のデコード失敗）を区別します。

use std::path::PathBuf;

/// 静的リソース（クラスインデックス、知識ベース、設定ファイル）の欠落・不正
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("resource not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("class index is empty")]
    EmptyClassIndex,

    #[error("class index {index} is assigned to both {first} and {second}")]
    DuplicateIndex {
        index: usize,
        first: String,
        second: String,
    },

    #[error("class indices must be contiguous from 0: index {0} is missing")]
    IndexGap(usize),

    #[error("invalid model url {url}: {detail}")]
    InvalidUrl { url: String, detail: String },
}

/// モデルアーティファクトのダウンロード失敗
#[derive(Debug, thiserror::Error)]
pub enum ModelDownloadError {
    #[error("request to {url} failed: {detail}")]
    Request { url: String, detail: String },

    #[error("server responded with {status} when downloading {url}")]
    Status { url: String, status: u16 },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model artifact {0} is missing and no download url is configured")]
    NoSource(PathBuf),
}

/// モデルアーティファクトが存在するが使用できない
#[derive(Debug, thiserror::Error)]
#[error("failed to load model from {path} ({size}): {detail}", size = describe_size(.file_size))]
pub struct ModelLoadError {
    pub path: PathBuf,
    pub file_size: Option<u64>,
    pub detail: String,
}

impl ModelLoadError {
    pub fn new(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        let path = path.into();
        let file_size = std::fs::metadata(&path).ok().map(|m| m.len());
        Self {
            path,
            file_size,
            detail: detail.into(),
        }
    }
}

fn describe_size(file_size: &Option<u64>) -> String {
    match file_size {
        Some(bytes) => format!("{} bytes", bytes),
        None => "file not found".to_string(),
    }
}

/// アップロードされた内容を画像としてデコードできない
#[derive(Debug, thiserror::Error)]
#[error("uploaded file is not a readable image: {0}")]
pub struct InvalidImageError(#[from] pub image::ImageError);

/// パイプライン全体のエラー
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Download(#[from] ModelDownloadError),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),

    /// 前処理とモデルの組み合わせが一致しない（設定ミス）
    #[error("input tensor shape {actual:?} does not match model input {expected:?}")]
    InputShapeMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },

    #[error("inference failed: {0}")]
    Inference(String),
}

impl ClassifierError {
    /// このリクエストだけを拒否すれば良いエラーか
    pub fn is_request_error(&self) -> bool {
        matches!(self, ClassifierError::InvalidImage(_))
    }
}
