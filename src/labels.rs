//! クラスインデックスとラベルマップ
//!
//! `class_indices.json`（クラス名 → インデックス）を読み込み、
//! 推論結果のインデックスからクラス名を引くための逆引きマップを作ります。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::ConfigError;

/// クラス名 → インデックス
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassIndex(pub BTreeMap<String, usize>);

impl ClassIndex {
    /// JSONファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed {
            what: "class index",
            detail: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for ClassIndex {
    fn from_iter<T: IntoIterator<Item = (S, usize)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(name, idx)| (name.into(), idx)).collect())
    }
}

/// インデックス → クラス名
///
/// [`build_label_map`] 経由でのみ作成されるため、0..N の全インデックスに
/// 重複のないクラス名が必ず対応します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// クラス数
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }
}

/// クラスインデックスを検証して逆引きマップを作成
pub fn build_label_map(class_index: ClassIndex) -> Result<LabelMap, ConfigError> {
    if class_index.is_empty() {
        return Err(ConfigError::EmptyClassIndex);
    }

    let n = class_index.len();
    let used: BTreeSet<usize> = class_index.0.values().copied().collect();
    let mut slots: Vec<Option<String>> = vec![None; n];

    for (name, index) in class_index.0 {
        if name.trim().is_empty() {
            return Err(ConfigError::Malformed {
                what: "class index",
                detail: format!("empty class name at index {}", index),
            });
        }
        // N個のエントリで 0..N を埋めるので、範囲外のインデックスは必ずどこかに穴を空ける
        let Some(slot) = slots.get_mut(index) else {
            let gap = (0..n).find(|i| !used.contains(i)).unwrap_or(n);
            return Err(ConfigError::IndexGap(gap));
        };
        if let Some(first) = slot.take() {
            return Err(ConfigError::DuplicateIndex {
                index,
                first,
                second: name,
            });
        }
        *slot = Some(name);
    }

    let labels = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or(ConfigError::IndexGap(i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LabelMap { labels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn durian_index() -> ClassIndex {
        ClassIndex::from_json_str(
            r#"{
                "ALGAL_LEAF_SPOT": 0,
                "ALLOCARIDARA_ATTACK": 1,
                "HEALTHY_LEAF": 2,
                "LEAF_BLIGHT": 3,
                "PHOMOPSIS_LEAF_SPOT": 4
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_label_map_is_total_and_unique() {
        let map = build_label_map(durian_index()).unwrap();
        assert_eq!(map.len(), 5);

        let mut seen = HashSet::new();
        for i in 0..map.len() {
            let label = map.get(i).unwrap();
            assert!(!label.is_empty());
            assert!(seen.insert(label.to_string()), "duplicate label {}", label);
        }
        assert_eq!(map.get(2), Some("HEALTHY_LEAF"));
        assert_eq!(map.get(5), None);
        assert_eq!(map.index_of("LEAF_BLIGHT"), Some(3));
    }

    #[test]
    fn test_empty_index_is_rejected() {
        let err = build_label_map(ClassIndex::default()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyClassIndex));
    }

    #[test]
    fn test_duplicate_index_is_rejected() {
        let index: ClassIndex = [("A", 0), ("B", 0)].into_iter().collect();
        let err = build_label_map(index).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateIndex { index: 0, .. }));
    }

    #[test]
    fn test_gap_is_rejected() {
        let index: ClassIndex = [("A", 0), ("B", 2)].into_iter().collect();
        let err = build_label_map(index).unwrap_err();
        assert!(matches!(err, ConfigError::IndexGap(1)));
    }

    #[test]
    fn test_malformed_and_missing_resource() {
        assert!(matches!(
            ClassIndex::from_json_str("[1, 2, 3]"),
            Err(ConfigError::Malformed { .. })
        ));
        assert!(matches!(
            ClassIndex::from_json_str(r#"{"A": -1}"#),
            Err(ConfigError::Malformed { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("class_indices.json");
        assert!(matches!(
            ClassIndex::load(&missing),
            Err(ConfigError::Missing(_))
        ));

        std::fs::write(&missing, r#"{"HEALTHY_LEAF": 0}"#).unwrap();
        let map = build_label_map(ClassIndex::load(&missing).unwrap()).unwrap();
        assert_eq!(map.labels(), &["HEALTHY_LEAF".to_string()]);
    }
}
