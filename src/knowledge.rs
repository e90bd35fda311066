//! 病害情報（説明・症状・原因・対処法）の静的テーブル

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;

/// 同梱の病害情報テーブル
pub const DEFAULT_KNOWLEDGE_BASE: &str = include_str!("../data/disease_info.json");

/// 既知のクラス
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeafClass {
    AlgalLeafSpot,
    AllocaridaraAttack,
    HealthyLeaf,
    LeafBlight,
    PhomopsisLeafSpot,
}

impl LeafClass {
    pub const ALL: [LeafClass; 5] = [
        LeafClass::AlgalLeafSpot,
        LeafClass::AllocaridaraAttack,
        LeafClass::HealthyLeaf,
        LeafClass::LeafBlight,
        LeafClass::PhomopsisLeafSpot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeafClass::AlgalLeafSpot => "ALGAL_LEAF_SPOT",
            LeafClass::AllocaridaraAttack => "ALLOCARIDARA_ATTACK",
            LeafClass::HealthyLeaf => "HEALTHY_LEAF",
            LeafClass::LeafBlight => "LEAF_BLIGHT",
            LeafClass::PhomopsisLeafSpot => "PHOMOPSIS_LEAF_SPOT",
        }
    }

    /// ラベル文字列から変換（未知のラベルは `None`）
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl std::fmt::Display for LeafClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1クラス分の病害情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseRecord {
    pub description: String,
    pub symptoms: Vec<String>,
    pub causes: Vec<String>,
    pub recommendations: Vec<String>,
}

/// 病害情報テーブル
///
/// 読み込み時にキーを [`LeafClass`] として検証するため、
/// 知らないクラス名が含まれるファイルは起動時に弾かれます。
/// 全クラス分のレコードが揃っている必要はありません。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnowledgeBase {
    records: BTreeMap<LeafClass, DiseaseRecord>,
}

impl KnowledgeBase {
    /// 同梱テーブルを読み込む
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_json_str(DEFAULT_KNOWLEDGE_BASE)
    }

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
        let kb: KnowledgeBase = serde_json::from_str(json).map_err(|e| ConfigError::Malformed {
            what: "knowledge base",
            detail: e.to_string(),
        })?;

        if let Some((class, _)) = kb
            .records
            .iter()
            .find(|(_, record)| record.description.trim().is_empty())
        {
            return Err(ConfigError::Malformed {
                what: "knowledge base",
                detail: format!("{} has an empty description", class),
            });
        }

        Ok(kb)
    }

    pub fn get(&self, class: LeafClass) -> Option<&DiseaseRecord> {
        self.records.get(&class)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(LeafClass, DiseaseRecord)> for KnowledgeBase {
    fn from_iter<T: IntoIterator<Item = (LeafClass, DiseaseRecord)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// ラベルに対応する病害情報を引く
///
/// 見つからない場合は `None`（エラーではない）。表示側で「情報なし」を出す。
pub fn lookup<'a>(label: &str, knowledge_base: &'a KnowledgeBase) -> Option<&'a DiseaseRecord> {
    LeafClass::from_label(label).and_then(|class| knowledge_base.get(class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_table_covers_every_class() {
        let kb = KnowledgeBase::embedded().unwrap();
        assert_eq!(kb.len(), LeafClass::ALL.len());
        for class in LeafClass::ALL {
            let record = kb.get(class).unwrap();
            assert!(!record.symptoms.is_empty());
            assert!(!record.causes.is_empty());
            assert!(!record.recommendations.is_empty());
        }
    }

    #[test]
    fn test_lookup_hit() {
        let kb = KnowledgeBase::embedded().unwrap();
        let record = lookup("HEALTHY_LEAF", &kb).unwrap();
        assert_eq!(
            record.description,
            "The durian leaf is healthy with no sign of disease or pest damage."
        );
    }

    #[test]
    fn test_lookup_miss_is_none() {
        let kb = KnowledgeBase::embedded().unwrap();
        assert!(lookup("ROOT_ROT", &kb).is_none());
        assert!(lookup("UNKNOWN", &kb).is_none());
        assert!(lookup("healthy_leaf", &kb).is_none());
    }

    #[test]
    fn test_known_class_without_record_is_none() {
        let kb: KnowledgeBase = [(
            LeafClass::LeafBlight,
            DiseaseRecord {
                description: "blight".to_string(),
                symptoms: vec![],
                causes: vec![],
                recommendations: vec![],
            },
        )]
        .into_iter()
        .collect();

        assert!(lookup("LEAF_BLIGHT", &kb).is_some());
        assert!(lookup("HEALTHY_LEAF", &kb).is_none());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let json = r#"{"ROOT_ROT": {"description": "x", "symptoms": [], "causes": [], "recommendations": []}}"#;
        assert!(matches!(
            KnowledgeBase::from_json_str(json),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_empty_description_is_rejected() {
        let json = r#"{"LEAF_BLIGHT": {"description": "  ", "symptoms": [], "causes": [], "recommendations": []}}"#;
        assert!(matches!(
            KnowledgeBase::from_json_str(json),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_class_name_round_trip() {
        for class in LeafClass::ALL {
            assert_eq!(LeafClass::from_label(class.as_str()), Some(class));
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class.as_str()));
        }
    }
}
