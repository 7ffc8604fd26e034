//! 評価結果のCSVレポート
//!
//! 一括評価の行を保持し、実行の最後にまとめて1つのCSVファイルへ書き出します。

use std::path::Path;

use csv::WriterBuilder;

use crate::error::Result;
use crate::scoring::Prediction;

/// レポートのヘッダー
pub const REPORT_HEADER: [&str; 9] = [
    "image",
    "true_label",
    "model",
    "top1_class",
    "top1_confidence",
    "top2_class",
    "top2_confidence",
    "inference_time_ms",
    "correct",
];

/// 評価結果の1行（画像 x モデル）
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRow {
    /// 画像ファイル名
    pub image: String,
    pub true_label: String,
    /// モデル名（"MobileNetV3-Large" など）
    pub model: String,
    pub top1_class: String,
    pub top1_confidence: f32,
    pub top2_class: String,
    pub top2_confidence: f32,
    pub inference_time_ms: f64,
    pub correct: bool,
}

impl EvaluationRow {
    /// 予測結果から行を作成（correct は top1 と正解ラベルの一致）
    pub fn new(
        image: impl Into<String>,
        true_label: impl Into<String>,
        model: impl Into<String>,
        prediction: &Prediction,
        inference_time_ms: f64,
    ) -> Self {
        let true_label = true_label.into();
        let correct = prediction.top1.name == true_label;
        Self {
            image: image.into(),
            true_label,
            model: model.into(),
            top1_class: prediction.top1.name.clone(),
            top1_confidence: prediction.top1.confidence,
            top2_class: prediction.top2.name.clone(),
            top2_confidence: prediction.top2.confidence,
            inference_time_ms,
            correct,
        }
    }

    /// CSVの1レコードに変換（数値は小数2桁、correct は True/False）
    pub fn to_record(&self) -> [String; 9] {
        [
            self.image.clone(),
            self.true_label.clone(),
            self.model.clone(),
            self.top1_class.clone(),
            format!("{:.2}", self.top1_confidence),
            self.top2_class.clone(),
            format!("{:.2}", self.top2_confidence),
            format!("{:.2}", self.inference_time_ms),
            if self.correct { "True" } else { "False" }.to_string(),
        ]
    }
}

/// 全行をCSVファイルに書き出す（既存ファイルは上書き）
pub fn write_report(path: &Path, rows: &[EvaluationRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(REPORT_HEADER)?;
    for row in rows {
        writer.write_record(row.to_record())?;
    }
    writer.flush()?;
    Ok(())
}

/// モデルごとの集計
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSummary {
    pub model: String,
    pub images: usize,
    pub correct: usize,
    pub mean_inference_time_ms: f64,
}

impl EvaluationSummary {
    /// 正解率（%）
    pub fn accuracy(&self) -> f64 {
        if self.images == 0 {
            0.0
        } else {
            self.correct as f64 / self.images as f64 * 100.0
        }
    }

    /// 指定モデルの行を集計
    pub fn from_rows(model: &str, rows: &[EvaluationRow]) -> Self {
        let matching: Vec<&EvaluationRow> = rows.iter().filter(|r| r.model == model).collect();
        let images = matching.len();
        let correct = matching.iter().filter(|r| r.correct).count();
        let total_ms: f64 = matching.iter().map(|r| r.inference_time_ms).sum();
        Self {
            model: model.to_string(),
            images,
            correct,
            mean_inference_time_ms: if images == 0 { 0.0 } else { total_ms / images as f64 },
        }
    }
}
