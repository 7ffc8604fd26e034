//! モデルメタデータの定義と永続化
//!
//! 重みスナップショット（tar.gz）には重みと一緒にこのメタデータが保存されます。
//! 読み込み時はここに記録されたバックボーン・ラベルセットと、要求された構成を照合します。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::config::BackboneVariant;
use crate::model::label_set::LabelSet;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// バックボーンの種類
    pub variant: BackboneVariant,

    /// 学習時のクラス名一覧（並び順 = 出力層のインデックス）
    pub class_labels: LabelSet,

    /// 出力層のクラス数
    pub num_classes: usize,

    /// モデル入力サイズ（正方形）
    pub image_size: u32,

    /// 学習エポック数
    pub num_epochs: usize,

    /// モデルの保存時刻（RFC3339形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        variant: BackboneVariant,
        class_labels: LabelSet,
        image_size: u32,
        num_epochs: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();
        let num_classes = class_labels.len();

        Self {
            variant,
            class_labels,
            num_classes,
            image_size,
            num_epochs,
            trained_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 要求された構成との差分を説明する（一致すればNone）
    pub fn describe_mismatch(&self, variant: BackboneVariant, labels: &LabelSet) -> Option<String> {
        if self.variant != variant {
            return Some(format!("バックボーンが異なります (保存: {}, 要求: {})", self.variant, variant));
        }
        if self.num_classes != labels.len() {
            return Some(format!(
                "クラス数が異なります (保存: {}, 要求: {})",
                self.num_classes,
                labels.len()
            ));
        }
        if &self.class_labels != labels {
            return Some("ラベルの並び順が異なります".to_string());
        }
        None
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("バックボーン: {}", metadata.variant);
    println!("クラス数: {}", metadata.num_classes);
    println!("クラス: {}", metadata.class_labels.as_slice().join(", "));
    println!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!("学習エポック数: {}", metadata.num_epochs);
    println!("保存日時: {}", metadata.trained_at);
    println!("========================");
}
