//! モデル推論機能
//!
//! 前処理済みテンソルを1枚ずつ受け取り、確率ベクトルと上位2件の予測を返します。
//! 推論時間の計測は呼び出し側で行います。

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{Result, SpeciesIdError};
use crate::ml::adapter::ModelAdapter;
use crate::ml::ml_model::SpeciesClassifier;
use crate::model::{BackboneVariant, LabelSet};
use crate::preprocess::ImageTensor;
use crate::scoring::{self, Prediction};

/// 推論エンジン
///
/// 推論専用（Autodiffなし）のバックエンド上のモデルを保持します。
/// ドロップアウトは無効、BatchNormは学習時の統計量を使います。
pub struct InferenceEngine<B: Backend> {
    model: SpeciesClassifier<B>,
    variant: BackboneVariant,
    labels: LabelSet,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    pub fn new(
        model: SpeciesClassifier<B>,
        variant: BackboneVariant,
        labels: LabelSet,
        device: B::Device,
    ) -> Result<Self> {
        if model.num_classes() != labels.len() {
            return Err(SpeciesIdError::Inference(format!(
                "モデルの出力数 {} がラベル数 {} と一致しません",
                model.num_classes(),
                labels.len()
            )));
        }
        Ok(Self {
            model,
            variant,
            labels,
            device,
        })
    }

    /// スナップショットを読み込んで推論エンジンを初期化
    pub fn load(
        adapter: &ModelAdapter,
        model_path: &Path,
        variant: BackboneVariant,
        device: B::Device,
    ) -> Result<Self> {
        let model = adapter.load::<B>(model_path, variant, &device)?;
        tracing::info!("{} を読み込みました: {}", variant, model_path.display());
        Self::new(model, variant, adapter.labels().clone(), device)
    }

    pub fn variant(&self) -> BackboneVariant {
        self.variant
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// 前処理済み画像を [1, 3, H, W] の入力テンソルとしてデバイスへ転送
    pub fn to_input(&self, image: &ImageTensor) -> Tensor<B, 4> {
        let size = image.size();
        Tensor::<B, 1>::from_floats(image.as_slice(), &self.device).reshape([1, 3, size, size])
    }

    /// 順伝播 + softmax（入力は転送済み）
    pub fn probabilities_from(&self, input: Tensor<B, 4>) -> Result<Vec<f32>> {
        let logits = self.model.forward(input);
        let logits = logits
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SpeciesIdError::Inference(format!("推論結果の取得エラー: {:?}", e)))?;

        Ok(scoring::softmax(&logits))
    }

    pub fn probabilities(&self, image: &ImageTensor) -> Result<Vec<f32>> {
        self.probabilities_from(self.to_input(image))
    }

    /// 上位2件の予測
    pub fn predict(&self, image: &ImageTensor) -> Result<Prediction> {
        let probabilities = self.probabilities(image)?;
        scoring::rank(&probabilities, &self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::ModelConfig;
    use crate::model::PreprocessSettings;
    use crate::preprocess::Preprocessor;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn labels(n: usize) -> LabelSet {
        LabelSet::new((0..n).map(|i| format!("species-{}", i)).collect()).unwrap()
    }

    fn test_image() -> ImageTensor {
        let preprocessor = Preprocessor::new(&PreprocessSettings {
            image_size: 32,
            ..PreprocessSettings::default()
        });
        let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 7) as u8, (y * 7) as u8, 60]));
        preprocessor.to_tensor(&img)
    }

    fn engine(num_classes: usize) -> InferenceEngine<TestBackend> {
        let device = NdArrayDevice::default();
        let model = ModelConfig::new(BackboneVariant::Small, num_classes).init::<TestBackend>(&device);
        InferenceEngine::new(model, BackboneVariant::Small, labels(num_classes), device).unwrap()
    }

    #[test]
    fn test_probabilities_form_distribution() {
        let engine = engine(18);
        let probs = engine.probabilities(&test_image()).unwrap();
        assert_eq!(probs.len(), 18);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let engine = engine(5);
        let image = test_image();
        let first = engine.predict(&image).unwrap();
        let second = engine.predict(&image).unwrap();
        assert_eq!(first.top1.index, second.top1.index);
        assert_eq!(first.top2.index, second.top2.index);
        assert_eq!(first.top1.confidence, second.top1.confidence);
        assert!(first.top1.confidence >= first.top2.confidence);
    }

    #[test]
    fn test_single_class_model() {
        let engine = engine(1);
        let prediction = engine.predict(&test_image()).unwrap();
        assert_eq!(prediction.top1, prediction.top2);
        assert!((prediction.top1.confidence - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_label_count_must_match_head() {
        let device = NdArrayDevice::default();
        let model = ModelConfig::new(BackboneVariant::Small, 3).init::<TestBackend>(&device);
        let result = InferenceEngine::new(model, BackboneVariant::Small, labels(4), device);
        assert!(matches!(result, Err(SpeciesIdError::Inference(_))));
    }

    #[test]
    fn test_prepared_input_matches_direct_probabilities() {
        let engine = engine(6);
        let image = test_image();
        let input = engine.to_input(&image);
        assert_eq!(input.dims(), [1, 3, 32, 32]);

        let from_input = engine.probabilities_from(input).unwrap();
        let direct = engine.probabilities(&image).unwrap();
        assert_eq!(from_input, direct);
    }
}
