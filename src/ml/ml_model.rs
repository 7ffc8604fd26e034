//! 種分類モデルの定義
//!
//! MobileNetV3 バックボーンに、クラス数に合わせた全結合層（ヘッド）を付けたモデルです。

use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

use crate::ml::mobilenet::{feature_width, MobileNetV3};
use crate::model::BackboneVariant;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// バックボーンの種類
    pub variant: BackboneVariant,
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率（分類層の直前）
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl ModelConfig {
    /// モデルを初期化（バックボーン・ヘッドともランダム初期化）
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpeciesClassifier<B> {
        let backbone = MobileNetV3::new(self.variant, self.dropout, device);
        let head = LinearConfig::new(feature_width(self.variant), self.num_classes).init(device);

        tracing::debug!(
            "[Model] {}: 特徴次元 {} -> {} クラス",
            self.variant,
            feature_width(self.variant),
            self.num_classes
        );

        SpeciesClassifier { backbone, head }
    }
}

/// 種分類モデル
///
/// # アーキテクチャ
/// - MobileNetV3 (Large / Small) 特徴抽出 -> [batch, feature_width]
/// - FC: feature_width -> num_classes
/// - Softmax (推論時、ホスト側で計算)
#[derive(Module, Debug)]
pub struct SpeciesClassifier<B: Backend> {
    backbone: MobileNetV3<B>,
    head: Linear<B>,
}

impl<B: Backend> SpeciesClassifier<B> {
    /// 既存のバックボーンから作成（ヘッドはランダム初期化）
    pub fn with_backbone(
        backbone: MobileNetV3<B>,
        variant: BackboneVariant,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        let head = LinearConfig::new(feature_width(variant), num_classes).init(device);
        Self { backbone, head }
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 分類層を新しいクラス数の層に差し替える（バックボーンはそのまま）
    pub fn replace_head(self, num_classes: usize) -> Self {
        let d_input = self.feature_width();
        let device = self.head.weight.device();
        Self {
            backbone: self.backbone,
            head: LinearConfig::new(d_input, num_classes).init(&device),
        }
    }

    /// 出力クラス数（ヘッドの重み [d_input, d_output] から取得）
    pub fn num_classes(&self) -> usize {
        self.head_dims()[1]
    }

    /// 入力特徴の次元
    pub fn feature_width(&self) -> usize {
        self.head_dims()[0]
    }

    /// ヘッドの重みの形状 [d_input, d_output]
    pub fn head_dims(&self) -> [usize; 2] {
        self.head.weight.dims()
    }

    /// 読み込んだレコードのヘッド形状 [d_input, d_output]
    pub fn record_head_dims(record: &SpeciesClassifierRecord<B>) -> [usize; 2] {
        record.head.weight.dims()
    }

    pub fn backbone(&self) -> &MobileNetV3<B> {
        &self.backbone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_output_shape() {
        let device = NdArrayDevice::default();
        let model = ModelConfig::new(BackboneVariant::Small, 18).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(images).dims(), [1, 18]);
        assert_eq!(model.num_classes(), 18);
        assert_eq!(model.feature_width(), 1024);
    }

    #[test]
    fn test_replace_head_changes_class_count() {
        let device = NdArrayDevice::default();
        let model = ModelConfig::new(BackboneVariant::Large, 1000).init::<TestBackend>(&device);
        let model = model.replace_head(5);
        assert_eq!(model.head_dims(), [1280, 5]);

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(images).dims(), [2, 5]);
    }

    #[test]
    fn test_forward_classification_loss_is_finite() {
        let device = NdArrayDevice::default();
        let model = ModelConfig::new(BackboneVariant::Small, 3).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 2], &device);

        let output = model.forward_classification(images, targets);
        let loss: f32 = output.loss.into_scalar();
        assert!(loss.is_finite());
    }
}
