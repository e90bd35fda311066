//! モデルメタデータの定義と永続化
//!
//! アーカイブ形式のモデルファイルには重みと一緒にこのメタデータが入ります。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.mpk: モデルの重み（named MessagePack）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力インデックス順のクラスラベル
    /// 例: ["ALGAL_LEAF_SPOT", "ALLOCARIDARA_ATTACK", "HEALTHY_LEAF", "LEAF_BLIGHT", "PHOMOPSIS_LEAF_SPOT"]
    pub class_labels: Vec<String>,

    /// 分類クラス数（モデル出力の長さ）
    pub num_classes: usize,

    /// モデル入力サイズ（通常224）
    pub model_input_size: usize,

    /// 学習エポック数（未学習の初期モデルは0）
    #[serde(default)]
    pub num_epochs: u32,

    /// 作成時刻（ISO8601形式）
    pub created_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(class_labels: Vec<String>, model_input_size: usize, num_epochs: u32) -> Self {
        let created_at = chrono::Local::now().to_rfc3339();

        Self {
            num_classes: class_labels.len(),
            class_labels,
            model_input_size,
            num_epochs,
            created_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let metadata: Self =
            serde_json::from_str(json).context("Failed to deserialize metadata from JSON")?;
        if metadata.num_classes == 0 {
            anyhow::bail!("metadata declares zero classes");
        }
        if !metadata.class_labels.is_empty() && metadata.class_labels.len() != metadata.num_classes {
            anyhow::bail!(
                "metadata lists {} labels for {} classes",
                metadata.class_labels.len(),
                metadata.num_classes
            );
        }
        Ok(metadata)
    }
}
