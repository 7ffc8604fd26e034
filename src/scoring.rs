//! 確率計算と上位クラスの抽出
//!
//! ロジットからsoftmaxで確率を求め、上位2クラスを信頼度（%）付きで返します。

use serde::Serialize;

use crate::error::{Result, SpeciesIdError};
use crate::model::LabelSet;

/// 順位付けされたクラス
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedClass {
    pub index: usize,
    pub name: String,
    /// 信頼度（確率 × 100）
    pub confidence: f32,
}

/// 1枚の画像に対する予測結果（上位2件）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub top1: RankedClass,
    pub top2: RankedClass,
}

impl Prediction {
    /// 2行のレポート
    pub fn report_lines(&self) -> [String; 2] {
        [
            format!(
                "Top prediction: {} ({:.2}% confidence)",
                self.top1.name, self.top1.confidence
            ),
            format!(
                "Second best:   {} ({:.2}% confidence)",
                self.top2.name, self.top2.confidence
            ),
        ]
    }
}

/// 数値的に安定なsoftmax（最大値を引いてからexp）
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// 確率の高い順に k 個のインデックスを返す
///
/// 同じ確率のクラスはインデックスの小さい方が先になります。
pub fn top_k(probabilities: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    // 安定ソートなので同値は元の順（インデックス昇順）のまま
    indices.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    indices.truncate(k);
    indices
}

fn ranked(probabilities: &[f32], index: usize, labels: &LabelSet) -> Result<RankedClass> {
    let name = labels.name(index).ok_or_else(|| {
        SpeciesIdError::Inference(format!(
            "クラスインデックス {} はラベルセット（{}クラス）の範囲外です",
            index,
            labels.len()
        ))
    })?;
    Ok(RankedClass {
        index,
        name: name.to_string(),
        confidence: probabilities[index] * 100.0,
    })
}

/// 確率ベクトルから上位2件の予測を作成
///
/// クラスが1つしかない場合は同じクラスを2回返します。
pub fn rank(probabilities: &[f32], labels: &LabelSet) -> Result<Prediction> {
    if probabilities.len() != labels.len() {
        return Err(SpeciesIdError::Inference(format!(
            "出力の長さ {} がクラス数 {} と一致しません",
            probabilities.len(),
            labels.len()
        )));
    }

    let top = top_k(probabilities, 2);
    let first = *top
        .first()
        .ok_or_else(|| SpeciesIdError::Inference("出力が空です".to_string()))?;
    let second = top.get(1).copied().unwrap_or(first);

    Ok(Prediction {
        top1: ranked(probabilities, first, labels)?,
        top2: ranked(probabilities, second, labels)?,
    })
}
