//! モデル出力からラベルと確信度を決定

use crate::labels::LabelMap;
use crate::types::{PredictionResult, UNKNOWN_LABEL};

/// 最大値のインデックス（同値は先頭を優先）
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, max)) if v <= max => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// 確率ベクトルを予測結果に変換
///
/// ラベルマップにないインデックスは `"UNKNOWN"` になります。
pub fn resolve(probabilities: &[f32], label_map: &LabelMap) -> PredictionResult {
    let Some((index, confidence)) = argmax(probabilities) else {
        return PredictionResult {
            predicted_label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            class_index: 0,
        };
    };

    let predicted_label = label_map
        .get(index)
        .unwrap_or(UNKNOWN_LABEL)
        .to_string();

    PredictionResult {
        predicted_label,
        confidence,
        class_index: index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{build_label_map, ClassIndex};

    fn three_class_map() -> LabelMap {
        let index: ClassIndex = [("ALGAL_LEAF_SPOT", 0), ("HEALTHY_LEAF", 1), ("LEAF_BLIGHT", 2)]
            .into_iter()
            .collect();
        build_label_map(index).unwrap()
    }

    #[test]
    fn test_resolve_picks_max() {
        let result = resolve(&[0.1, 0.7, 0.2], &three_class_map());
        assert_eq!(result.class_index, 1);
        assert_eq!(result.predicted_label, "HEALTHY_LEAF");
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_tie_goes_to_first_index() {
        let result = resolve(&[0.5, 0.5, 0.0], &three_class_map());
        assert_eq!(result.class_index, 0);
        assert_eq!(result.predicted_label, "ALGAL_LEAF_SPOT");
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_unmapped_index_is_unknown() {
        let result = resolve(&[0.1, 0.1, 0.1, 0.7], &three_class_map());
        assert_eq!(result.class_index, 3);
        assert_eq!(result.predicted_label, UNKNOWN_LABEL);
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_empty_vector_is_unknown() {
        let result = resolve(&[], &three_class_map());
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_argmax_skips_nan() {
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), Some((1, 0.2)));
        assert_eq!(argmax(&[0.3, f32::NAN, 0.3]), Some((0, 0.3)));
        assert_eq!(argmax(&[f32::NAN]), None);
    }
}
