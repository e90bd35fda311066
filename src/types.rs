use serde::{Deserialize, Serialize};

use crate::knowledge::DiseaseRecord;

/// ラベルマップに存在しないインデックスが予測された場合のラベル
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

/// モデル出力（クラスごとの確率、長さN）
pub type ProbabilityVector = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_label: String,
    pub confidence: f32, // 0.0 - 1.0
    pub class_index: usize,
}

impl PredictionResult {
    pub fn is_unknown(&self) -> bool {
        self.predicted_label == UNKNOWN_LABEL
    }
}

// 1リクエスト分の結果（表示側に渡す）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub prediction: PredictionResult,
    pub record: Option<DiseaseRecord>,
}
