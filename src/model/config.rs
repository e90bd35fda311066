//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやモデルの取得元などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデルファイルの形式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// 拡張子から判定（.tar.gz / .tgz → Archive、それ以外 → SingleFile）
    #[default]
    Auto,
    /// metadata.json + model.mpk を含む tar.gz
    Archive,
    /// 重みだけの .mpk ファイル
    SingleFile,
}

impl ModelFormat {
    /// `Auto` をパスから具体的な形式に解決
    pub fn resolve(self, path: &Path) -> ModelFormat {
        match self {
            ModelFormat::Auto => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
                    ModelFormat::Archive
                } else {
                    ModelFormat::SingleFile
                }
            }
            other => other,
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFormat::Auto => write!(f, "auto"),
            ModelFormat::Archive => write!(f, "archive (tar.gz)"),
            ModelFormat::SingleFile => write!(f, "single file (mpk)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    /// 使用するモデルファイルのパス（ダウンロード先も同じ）
    pub model_path: String,
    /// ファイルが無い場合のダウンロード元
    #[serde(default)]
    pub model_url: Option<String>,
    #[serde(default)]
    pub format: ModelFormat,
    /// 分類クラス数（単一ファイル形式ではメタデータが無いのでここから取る）
    pub num_classes: usize,
    /// ダウンロードのタイムアウト（秒）
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_download_timeout_secs() -> u64 {
    300
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/durian_leaf_classifier.tar.gz".to_string(),
            model_url: None,
            format: ModelFormat::Auto,
            num_classes: crate::ml::NUM_CLASSES,
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl ModelSettings {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn resolved_format(&self) -> ModelFormat {
        self.format.resolve(Path::new(&self.model_path))
    }
}

/// Webサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    pub bind_address: String,
    /// アップロードの最大サイズ（バイト）
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8501".to_string(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// クラスインデックス（クラス名 → インデックス）のJSON
    #[serde(default = "default_class_index_path")]
    pub class_index_path: String,
    /// 病害情報のJSON（未指定なら同梱のもの）
    #[serde(default)]
    pub knowledge_base_path: Option<String>,
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_class_index_path() -> String {
    "class_indices.json".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            model: ModelSettings::default(),
            class_index_path: default_class_index_path(),
            knowledge_base_path: None,
            server: ServerSettings::default(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Malformed {
                what: "config file",
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 設定ファイルがあれば読み込み、無ければデフォルト設定を返す
    ///
    /// ファイルが存在して壊れている場合はエラー（黙ってデフォルトに戻さない）。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!(path = %path.display(), "loaded config file");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の整合性チェック
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.model.model_url {
            let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                url: url.clone(),
                detail: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidUrl {
                    url: url.clone(),
                    detail: format!("unsupported scheme {}", parsed.scheme()),
                });
            }
        }
        if self.model.num_classes == 0 {
            return Err(ConfigError::Malformed {
                what: "config file",
                detail: "model.num_classes must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// モデルパスを設定
    pub fn set_model_path(&mut self, path: String) {
        self.model.model_path = path;
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("モデルパス: {}", self.model.model_path);
        println!("モデル形式: {}", self.model.resolved_format());
        match &self.model.model_url {
            Some(url) => println!("ダウンロード元: {}", url),
            None => println!("ダウンロード元: (なし)"),
        }
        println!("分類クラス数: {}", self.model.num_classes);
        println!("クラスインデックス: {}", self.class_index_path);
        println!(
            "病害情報: {}",
            self.knowledge_base_path.as_deref().unwrap_or("(同梱)")
        );
        println!("待ち受けアドレス: {}", self.server.bind_address);
        println!("========================\n");
    }
}
