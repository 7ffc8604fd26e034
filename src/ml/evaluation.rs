//! 一括評価
//!
//! ラベル名のサブフォルダを持つテストデータに対して、複数モデル（Large → Small の順）で推論し、
//! 正誤と推論時間をCSVレポートに記録します。
//!
//! - フォルダ・ファイルはどちらも名前順に処理
//! - 前処理は画像ごとに1回だけ行い、全モデルで共有
//! - 推論時間は順伝播 + softmax のみ（前処理と入力テンソルの転送は含まない）
//! - レポートは全画像の処理後にまとめて書き出す（途中で失敗した場合は書き出さない）

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::backend::Backend;

use crate::dataset::{discover_class_dirs, list_images};
use crate::error::Result;
use crate::ml::adapter::ModelAdapter;
use crate::ml::inference::InferenceEngine;
use crate::model::{AppConfig, BackboneVariant};
use crate::preprocess::Preprocessor;
use crate::report::{write_report, EvaluationRow, EvaluationSummary};
use crate::scoring;

/// 評価結果
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub rows: Vec<EvaluationRow>,
    pub summaries: Vec<EvaluationSummary>,
    pub report_path: PathBuf,
}

/// 一括評価器
pub struct BatchEvaluator<B: Backend> {
    preprocessor: Preprocessor,
    engines: Vec<InferenceEngine<B>>,
}

impl<B: Backend> BatchEvaluator<B> {
    pub fn new(preprocessor: Preprocessor, engines: Vec<InferenceEngine<B>>) -> Self {
        Self {
            preprocessor,
            engines,
        }
    }

    /// 両バックボーン（Large, Small の順）の学習済みモデルを読み込んで作成
    pub fn load(config: &AppConfig, device: B::Device) -> Result<Self> {
        let adapter = ModelAdapter::new(config);
        let engines = BackboneVariant::ALL
            .iter()
            .map(|&variant| {
                InferenceEngine::load(
                    &adapter,
                    &config.paths.model_path(variant),
                    variant,
                    device.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(Preprocessor::new(&config.preprocess), engines))
    }

    /// 全画像を評価して行を返す（ファイルには書き出さない）
    pub fn evaluate(&self, test_dir: &Path) -> Result<Vec<EvaluationRow>> {
        let mut rows = Vec::new();

        for class_dir in discover_class_dirs(test_dir)? {
            tracing::info!("評価中: {}", class_dir.name);

            for image_path in list_images(&class_dir.path)? {
                let tensor = self.preprocessor.preprocess(&image_path)?;
                let image_name = image_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();

                for engine in &self.engines {
                    let input = engine.to_input(&tensor);
                    let start = Instant::now();
                    let probabilities = engine.probabilities_from(input)?;
                    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

                    let prediction = scoring::rank(&probabilities, engine.labels())?;
                    let row = EvaluationRow::new(
                        image_name.clone(),
                        class_dir.name.clone(),
                        engine.variant().to_string(),
                        &prediction,
                        elapsed_ms,
                    );
                    tracing::debug!(
                        "  {} [{}] -> {} ({:.2}%), {:.2} ms",
                        row.image,
                        row.model,
                        row.top1_class,
                        row.top1_confidence,
                        row.inference_time_ms
                    );
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }

    /// 評価してレポートを書き出し、モデルごとの集計を記録
    pub fn run(&self, test_dir: &Path, report_path: &Path) -> Result<EvaluationOutcome> {
        let rows = self.evaluate(test_dir)?;
        write_report(report_path, &rows)?;
        tracing::info!(
            "評価結果を書き出しました: {} ({} 行)",
            report_path.display(),
            rows.len()
        );

        let summaries: Vec<EvaluationSummary> = self
            .engines
            .iter()
            .map(|engine| EvaluationSummary::from_rows(&engine.variant().to_string(), &rows))
            .collect();
        for summary in &summaries {
            tracing::info!(
                "{}: {}/{} 正解 ({:.2}%), 平均推論時間 {:.2} ms",
                summary.model,
                summary.correct,
                summary.images,
                summary.accuracy(),
                summary.mean_inference_time_ms
            );
        }

        Ok(EvaluationOutcome {
            rows,
            summaries,
            report_path: report_path.to_path_buf(),
        })
    }
}
