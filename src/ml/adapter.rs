//! モデルの作成・保存・読み込み
//!
//! バックボーンの作成（事前学習済み重みがあれば読み込み）、分類層の差し替え、
//! 重みスナップショット（tar.gz）の保存と読み込みを担当します。
//! 読み込み時はメタデータと重みの形状を照合し、一致しなければ切り詰めや補完はせずにエラーにします。

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, DefaultFileRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::error::{Result, SpeciesIdError};
use crate::ml::mobilenet::{feature_width, MobileNetV3};
use crate::ml::ml_model::{ModelConfig, SpeciesClassifier};
use crate::model::{
    load_model_with_metadata, save_model_with_metadata, AppConfig, BackboneVariant, LabelSet,
    ModelMetadata,
};

/// モデルアダプター
#[derive(Debug, Clone)]
pub struct ModelAdapter {
    labels: LabelSet,
    image_size: u32,
    num_epochs: usize,
    pretrained_dir: Option<PathBuf>,
}

impl ModelAdapter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            labels: config.labels.clone(),
            image_size: config.preprocess.image_size,
            num_epochs: config.training.num_epochs,
            pretrained_dir: config.paths.pretrained_dir.clone(),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// 学習用のモデルを作成
    ///
    /// 事前学習済みバックボーンがあれば読み込み、なければランダム初期化のまま警告を出します。
    /// 分類層は常に新しく `num_classes` 出力で作成します。
    pub fn create<B: Backend>(
        &self,
        variant: BackboneVariant,
        num_classes: usize,
        device: &B::Device,
    ) -> Result<SpeciesClassifier<B>> {
        let model_config = ModelConfig::new(variant, num_classes);
        let backbone = MobileNetV3::new(variant, model_config.dropout, device);

        let backbone = match self.pretrained_path(variant) {
            Some(path) if path.exists() => {
                tracing::info!("事前学習済みバックボーンを読み込みます: {}", path.display());
                let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
                backbone
                    .load_file(&path, &recorder, device)
                    .map_err(|e| SpeciesIdError::Load {
                        path: path.clone(),
                        message: format!("{:?}", e),
                    })?
            }
            Some(path) => {
                tracing::warn!(
                    "事前学習済みバックボーンが見つかりません（ランダム初期化で学習します）: {}",
                    path.display()
                );
                backbone
            }
            None => {
                tracing::warn!("事前学習済みバックボーンの場所が未設定です（ランダム初期化で学習します）");
                backbone
            }
        };

        let model = SpeciesClassifier::with_backbone(backbone, variant, num_classes, device);
        let total_params = model.num_params();
        tracing::info!(
            "{} を作成しました: {} クラス, パラメータ数 {} ({:.2}M)",
            variant,
            num_classes,
            total_params,
            total_params as f64 / 1_000_000.0
        );
        Ok(model)
    }

    /// 分類層を差し替える
    pub fn replace_head<B: Backend>(
        &self,
        model: SpeciesClassifier<B>,
        num_classes: usize,
    ) -> SpeciesClassifier<B> {
        model.replace_head(num_classes)
    }

    /// 重みとメタデータをtar.gzに保存
    pub fn save<B: Backend>(
        &self,
        model: &SpeciesClassifier<B>,
        variant: BackboneVariant,
        path: &Path,
    ) -> Result<()> {
        if model.num_classes() != self.labels.len() {
            return Err(SpeciesIdError::ShapeMismatch {
                path: path.to_path_buf(),
                detail: format!(
                    "出力クラス数 {} がラベル数 {} と一致しません",
                    model.num_classes(),
                    self.labels.len()
                ),
            });
        }

        // f32精度で保存（半精度にしない）
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let model_binary = recorder
            .record(model.clone().into_record(), ())
            .map_err(|e| SpeciesIdError::Save {
                path: path.to_path_buf(),
                message: format!("モデル重みのシリアライズに失敗しました: {:?}", e),
            })?;

        let metadata = ModelMetadata::new(variant, self.labels.clone(), self.image_size, self.num_epochs);
        save_model_with_metadata(path, &metadata, &model_binary)?;

        tracing::info!(
            "モデルを保存しました: {} ({:.2} MB)",
            path.display(),
            model_binary.len() as f64 / 1024.0 / 1024.0
        );
        Ok(())
    }

    /// スナップショットから推論用モデルを読み込む
    pub fn load<B: Backend>(
        &self,
        path: &Path,
        variant: BackboneVariant,
        device: &B::Device,
    ) -> Result<SpeciesClassifier<B>> {
        let (metadata, model_binary) = load_model_with_metadata(path)?;

        if let Some(detail) = metadata.describe_mismatch(variant, &self.labels) {
            return Err(SpeciesIdError::ShapeMismatch {
                path: path.to_path_buf(),
                detail,
            });
        }
        if metadata.image_size != self.image_size {
            tracing::warn!(
                "学習時の入力サイズ {} と現在の設定 {} が異なります: {}",
                metadata.image_size,
                self.image_size,
                path.display()
            );
        }

        let model = ModelConfig::new(variant, self.labels.len()).init::<B>(device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, device)
            .map_err(|e| SpeciesIdError::Load {
                path: path.to_path_buf(),
                message: format!("モデル重みの読み込みエラー: {:?}", e),
            })?;

        // 重みそのものの形状も確認（メタデータと食い違っていれば拒否）
        let expected = [feature_width(variant), self.labels.len()];
        let actual = SpeciesClassifier::<B>::record_head_dims(&record);
        if actual != expected {
            return Err(SpeciesIdError::ShapeMismatch {
                path: path.to_path_buf(),
                detail: format!("分類層の形状 {:?} (期待: {:?})", actual, expected),
            });
        }
        let model = model.load_record(record);

        tracing::debug!("モデルを読み込みました: {} ({})", path.display(), variant);
        Ok(model)
    }

    fn pretrained_path(&self, variant: BackboneVariant) -> Option<PathBuf> {
        self.pretrained_dir
            .as_ref()
            .map(|dir| dir.join(variant.backbone_file_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn config_with_labels(names: &[&str], pretrained_dir: Option<PathBuf>) -> AppConfig {
        let mut config = AppConfig::default();
        config.labels = LabelSet::new(names.iter().map(|s| s.to_string()).collect()).unwrap();
        config.preprocess.image_size = 32;
        config.paths.pretrained_dir = pretrained_dir;
        config
    }

    #[test]
    fn test_create_without_pretrained_weights() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b", "c"], Some(dir.path().to_path_buf())));
        let device = NdArrayDevice::default();

        let model = adapter.create::<TestBackend>(BackboneVariant::Small, 3, &device).unwrap();
        assert_eq!(model.head_dims(), [1024, 3]);
    }

    #[test]
    fn test_create_loads_pretrained_backbone() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::default();

        let backbone = MobileNetV3::<TestBackend>::new(BackboneVariant::Small, 0.2, &device);
        let stem = dir.path().join("mobilenetv3_small_backbone");
        backbone
            .clone()
            .save_file(&stem, &DefaultFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b"], Some(dir.path().to_path_buf())));
        let model = adapter.create::<TestBackend>(BackboneVariant::Small, 2, &device).unwrap();

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = backbone.forward(images.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = model.backbone().forward(images).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_save_and_load_preserves_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mobilenetv3_small_model.tar.gz");
        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b", "c"], None));
        let device = NdArrayDevice::default();

        let model = adapter.create::<TestBackend>(BackboneVariant::Small, 3, &device).unwrap();
        adapter.save(&model, BackboneVariant::Small, &path).unwrap();
        let loaded = adapter.load::<TestBackend>(&path, BackboneVariant::Small, &device).unwrap();

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let before: Vec<f32> = model.forward(images.clone()).into_data().to_vec().unwrap();
        let after: Vec<f32> = loaded.forward(images).into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_with_different_label_count_is_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let device = NdArrayDevice::default();

        let three = ModelAdapter::new(&config_with_labels(&["a", "b", "c"], None));
        let model = three.create::<TestBackend>(BackboneVariant::Small, 3, &device).unwrap();
        three.save(&model, BackboneVariant::Small, &path).unwrap();

        let four = ModelAdapter::new(&config_with_labels(&["a", "b", "c", "d"], None));
        let result = four.load::<TestBackend>(&path, BackboneVariant::Small, &device);
        assert!(matches!(result, Err(SpeciesIdError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_load_with_other_variant_is_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let device = NdArrayDevice::default();

        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b"], None));
        let model = adapter.create::<TestBackend>(BackboneVariant::Small, 2, &device).unwrap();
        adapter.save(&model, BackboneVariant::Small, &path).unwrap();

        let result = adapter.load::<TestBackend>(&path, BackboneVariant::Large, &device);
        assert!(matches!(result, Err(SpeciesIdError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_head_weights_disagreeing_with_metadata_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let device = NdArrayDevice::default();

        // メタデータは2クラスだが、重みは5クラス分
        let model = ModelConfig::new(BackboneVariant::Small, 5).init::<TestBackend>(&device);
        let binary = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();
        let labels = LabelSet::new(vec!["a".into(), "b".into()]).unwrap();
        let metadata = ModelMetadata::new(BackboneVariant::Small, labels, 32, 1);
        save_model_with_metadata(&path, &metadata, &binary).unwrap();

        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b"], None));
        let result = adapter.load::<TestBackend>(&path, BackboneVariant::Small, &device);
        assert!(matches!(result, Err(SpeciesIdError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_save_rejects_wrong_head() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::default();
        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b"], None));

        let model = adapter.create::<TestBackend>(BackboneVariant::Small, 2, &device).unwrap();
        let model = adapter.replace_head(model, 7);
        let result = adapter.save(&model, BackboneVariant::Small, &dir.path().join("m.tar.gz"));
        assert!(matches!(result, Err(SpeciesIdError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_save_failure_is_not_reported_as_load() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::default();
        let adapter = ModelAdapter::new(&config_with_labels(&["a", "b"], None));
        let model = adapter.create::<TestBackend>(BackboneVariant::Small, 2, &device).unwrap();

        // 親がファイルなので書き込めない
        let blocker = dir.path().join("models");
        std::fs::write(&blocker, b"").unwrap();
        let result = adapter.save(&model, BackboneVariant::Small, &blocker.join("m.tar.gz"));
        assert!(matches!(result, Err(SpeciesIdError::Io(_))));
    }

    #[test]
    fn test_load_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ModelAdapter::new(&config_with_labels(&["a"], None));
        let result = adapter.load::<TestBackend>(
            &dir.path().join("mobilenetv3_large_model.tar.gz"),
            BackboneVariant::Large,
            &NdArrayDevice::default(),
        );
        assert!(matches!(result, Err(SpeciesIdError::PathNotFound(_))));
    }
}
