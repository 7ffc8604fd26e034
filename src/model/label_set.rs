//! ラベルセット（クラス名とクラスインデックスの対応）
//!
//! 並び順がモデル出力層のクラスインデックスを決めます。
//! 学習時と推論時で同じ並び順を使わないと、予測結果が黙って別名で表示されます。

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeciesIdError};

/// 既定の18種
pub const DEFAULT_SPECIES: [&str; 18] = [
    "blue-mussel",
    "butter-clam",
    "california-mussel",
    "geoduck",
    "littleneck-clam",
    "manila-clam",
    "northern-abalone",
    "nuttalls-cockle",
    "olympia-oyster",
    "pacific-gaper",
    "pacific-oyster",
    "pink-scallop",
    "purple-scallop",
    "razor-clam",
    "softshell-clam",
    "spiny-scallop",
    "varnish-clam",
    "weathervane-scallop",
];

/// 順序付きのクラス名一覧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            labels: DEFAULT_SPECIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LabelSet {
    /// ラベル一覧から作成（空・重複はエラー）
    pub fn new(labels: Vec<String>) -> Result<Self> {
        let set = Self { labels };
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(SpeciesIdError::Config("ラベルセットが空です".to_string()));
        }
        for (i, label) in self.labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(SpeciesIdError::Config(format!("空のラベルがあります (index {})", i)));
            }
            if self.labels[..i].contains(label) {
                return Err(SpeciesIdError::Config(format!("ラベルが重複しています: {}", label)));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// クラスインデックスからクラス名を取得
    pub fn name(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// クラス名からクラスインデックスを取得
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == name)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// ディレクトリから検出したクラス名（ソート済み）がこのラベルセットと同じ並びか確認
    pub fn ensure_matches(&self, discovered: &[String]) -> Result<()> {
        if self.labels.as_slice() == discovered {
            return Ok(());
        }
        Err(SpeciesIdError::LabelMismatch {
            expected: self.labels.join(", "),
            found: discovered.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_18_species() {
        let labels = LabelSet::default();
        assert_eq!(labels.len(), 18);
        assert_eq!(labels.name(3), Some("geoduck"));
        assert_eq!(labels.index_of("weathervane-scallop"), Some(17));
        assert_eq!(labels.name(18), None);
    }

    #[test]
    fn test_default_is_sorted() {
        // 学習時のフォルダ検出順（名前順）と一致している必要がある
        let labels = LabelSet::default();
        let mut sorted = labels.as_slice().to_vec();
        sorted.sort();
        assert_eq!(sorted.as_slice(), labels.as_slice());
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(LabelSet::new(vec![]).is_err());
        assert!(LabelSet::new(vec!["geoduck".into(), "geoduck".into()]).is_err());
        assert!(LabelSet::new(vec!["geoduck".into(), " ".into()]).is_err());
    }

    #[test]
    fn test_ensure_matches() {
        let labels = LabelSet::new(vec!["a".into(), "b".into()]).unwrap();
        assert!(labels.ensure_matches(&["a".to_string(), "b".to_string()]).is_ok());
        assert!(matches!(
            labels.ensure_matches(&["b".to_string(), "a".to_string()]),
            Err(SpeciesIdError::LabelMismatch { .. })
        ));
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let labels = LabelSet::new(vec!["a".into(), "b".into()]).unwrap();
        let json = serde_json::to_string(&labels).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }
}
