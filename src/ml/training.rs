//! モデル学習
//!
//! クラス名のサブフォルダを持つデータセットから、ミニバッチ単位で学習します。
//! 毎エポックでサンプル順をシャッフルし、全エポック終了後にスナップショットを保存します。
//! 途中経過の保存（チェックポイント）は行いません。

use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::dataset::{discover_class_dirs, list_images};
use crate::error::{Result, SpeciesIdError};
use crate::ml::adapter::ModelAdapter;
use crate::ml::ml_model::SpeciesClassifier;
use crate::model::{AppConfig, BackboneVariant, LabelSet};
use crate::preprocess::{Augmenter, Preprocessor};

/// 学習データセット（パスとクラスIDのみ保持）
pub struct SpeciesDataset {
    samples: Vec<SpeciesItem>,
    class_names: Vec<String>,
}

/// データセットアイテム
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeciesItem {
    pub path: PathBuf,
    pub label: usize,
}

impl SpeciesDataset {
    /// ディレクトリから読み込む
    ///
    /// サブフォルダ（名前順）がラベルセットと完全に一致しない場合はエラーです。
    /// 画像が1枚もないクラスがある場合もエラーにします。
    pub fn from_directory(data_dir: &Path, labels: &LabelSet) -> Result<Self> {
        let class_dirs = discover_class_dirs(data_dir)?;
        let names: Vec<String> = class_dirs.iter().map(|d| d.name.clone()).collect();
        labels.ensure_matches(&names)?;

        let mut samples = Vec::new();
        for (class_id, class_dir) in class_dirs.iter().enumerate() {
            let images = list_images(&class_dir.path)?;
            if images.is_empty() {
                return Err(SpeciesIdError::EmptyDataset(class_dir.path.clone()));
            }
            samples.extend(images.into_iter().map(|path| SpeciesItem {
                path,
                label: class_id,
            }));
        }

        Ok(Self {
            samples,
            class_names: names,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスごとのサンプル数
    pub fn class_counts(&self) -> Vec<(String, usize)> {
        self.class_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let count = self.samples.iter().filter(|s| s.label == i).count();
                (name.clone(), count)
            })
            .collect()
    }
}

impl Dataset<SpeciesItem> for SpeciesDataset {
    fn get(&self, index: usize) -> Option<SpeciesItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SpeciesBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// 画像の読み込みに失敗した場合はゼロ埋めせず、エラーで学習を中断します。
#[derive(Clone)]
pub struct SpeciesBatcher<B: Backend> {
    device: B::Device,
    preprocessor: Preprocessor,
    augmenter: Augmenter,
}

impl<B: Backend> SpeciesBatcher<B> {
    pub fn new(device: B::Device, preprocessor: Preprocessor, augmenter: Augmenter) -> Self {
        Self {
            device,
            preprocessor,
            augmenter,
        }
    }

    pub fn batch<R: Rng>(&self, items: &[SpeciesItem], rng: &mut R) -> Result<SpeciesBatch<B>> {
        let batch_size = items.len();
        let size = self.preprocessor.image_size() as usize;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            let tensor = self
                .preprocessor
                .preprocess_augmented(&item.path, &self.augmenter, rng)?;
            all_pixels.extend_from_slice(tensor.as_slice());
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        Ok(SpeciesBatch { images, targets })
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub variant: BackboneVariant,
    pub model_path: PathBuf,
    pub num_samples: usize,
    /// エポックごとの平均損失
    pub epoch_losses: Vec<f64>,
}

/// Adam（epsilon は 1e-8）
pub fn optimizer_config() -> AdamConfig {
    AdamConfig::new().with_epsilon(1e-8)
}

/// エポックごとにサンプル順をシャッフルし、バッチ単位に分割
///
/// 最後のバッチは `batch_size` より小さくなることがあります。
pub fn epoch_batches<R: Rng>(order: &mut [usize], batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
    order.shuffle(rng);
    order.chunks(batch_size.max(1)).map(|chunk| chunk.to_vec()).collect()
}

/// モデル学習を実行
///
/// 学習済みモデルは `{model_dir}/mobilenetv3_{variant}_model.tar.gz` に保存されます。
pub fn train_model<B: AutodiffBackend>(
    config: &AppConfig,
    variant: BackboneVariant,
    device: B::Device,
) -> Result<TrainingReport> {
    let settings = &config.training;
    let data_dir = &config.paths.train_dir;

    tracing::info!("学習データを読み込みます: {}", data_dir.display());
    let dataset = SpeciesDataset::from_directory(data_dir, &config.labels)?;
    if dataset.is_empty() {
        return Err(SpeciesIdError::EmptyDataset(data_dir.clone()));
    }

    tracing::info!(
        "{} 枚の画像, {} クラス",
        dataset.len(),
        dataset.num_classes()
    );
    for (i, (name, count)) in dataset.class_counts().iter().enumerate() {
        tracing::info!("  クラス {:2}: {} ({} 枚)", i, name, count);
    }

    let adapter = ModelAdapter::new(config);
    let mut model: SpeciesClassifier<B> =
        adapter.create::<B>(variant, config.labels.len(), &device)?;
    let mut optimizer = optimizer_config().init::<B, SpeciesClassifier<B>>();

    let batcher = SpeciesBatcher::<B>::new(
        device.clone(),
        Preprocessor::new(&config.preprocess),
        Augmenter::new(settings.augmentation.clone()),
    );
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut epoch_losses = Vec::with_capacity(settings.num_epochs);

    tracing::info!(
        "学習を開始します: {}, エポック数 {}, バッチサイズ {}, 学習率 {}",
        variant,
        settings.num_epochs,
        settings.batch_size,
        settings.learning_rate
    );

    for epoch in 1..=settings.num_epochs {
        let batches = epoch_batches(&mut order, settings.batch_size, &mut rng);

        let mut total_loss = 0.0;
        let mut num_batches = 0usize;

        for chunk in &batches {
            let items: Vec<SpeciesItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
            let batch = batcher.batch(&items, &mut rng)?;

            let output = model.forward_classification(batch.images, batch.targets);
            let loss_value = output.loss.clone().into_scalar().elem::<f64>();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(settings.learning_rate, model, grads);

            total_loss += loss_value;
            num_batches += 1;
            tracing::debug!("  バッチ {} - Loss: {:.4}", num_batches, loss_value);
        }

        let average = total_loss / num_batches.max(1) as f64;
        tracing::info!("Epoch {}/{} - Loss: {:.4}", epoch, settings.num_epochs, average);
        epoch_losses.push(average);
    }

    // 推論用（Autodiffなし）に変換して保存
    let model_path = config.paths.model_path(variant);
    adapter.save(&model.valid(), variant, &model_path)?;
    tracing::info!("学習完了: {} に保存しました", model_path.display());

    Ok(TrainingReport {
        variant,
        model_path,
        num_samples: dataset.len(),
        epoch_losses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{cpu_device, CpuBackend, CpuTrainBackend};
    use crate::ml::adapter::ModelAdapter;
    use image::{Rgb, RgbImage};
    use std::fs;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(40, 30, Rgb(color)).save(path).unwrap();
    }

    fn small_config(root: &Path, labels: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.labels = LabelSet::new(labels.iter().map(|s| s.to_string()).collect()).unwrap();
        config.preprocess.image_size = 32;
        config.training.num_epochs = 2;
        config.training.batch_size = 3;
        config.paths.train_dir = root.join("train");
        config.paths.model_dir = root.join("models");
        config.paths.pretrained_dir = None;
        config
    }

    fn make_dataset(root: &Path) {
        let train = root.join("train");
        for (name, color) in [("clam", [200, 180, 150]), ("oyster", [60, 70, 80])] {
            fs::create_dir_all(train.join(name)).unwrap();
            for i in 0..2 {
                write_image(&train.join(name).join(format!("{}_{}.png", name, i)), color);
            }
        }
    }

    #[test]
    fn test_dataset_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        let labels = LabelSet::new(vec!["clam".into(), "oyster".into()]).unwrap();

        let dataset = SpeciesDataset::from_directory(&dir.path().join("train"), &labels).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.get(0).unwrap().label, 0);
        assert_eq!(dataset.get(3).unwrap().label, 1);
        assert!(dataset.get(4).is_none());
        assert_eq!(
            dataset.class_counts(),
            vec![("clam".to_string(), 2), ("oyster".to_string(), 2)]
        );
    }

    #[test]
    fn test_dataset_rejects_unexpected_classes() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        fs::create_dir_all(dir.path().join("train").join("test_images")).unwrap();
        let labels = LabelSet::new(vec!["clam".into(), "oyster".into()]).unwrap();

        let result = SpeciesDataset::from_directory(&dir.path().join("train"), &labels);
        assert!(matches!(result, Err(SpeciesIdError::LabelMismatch { .. })));
    }

    #[test]
    fn test_dataset_rejects_empty_class() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        fs::create_dir_all(dir.path().join("train").join("scallop")).unwrap();
        let labels =
            LabelSet::new(vec!["clam".into(), "oyster".into(), "scallop".into()]).unwrap();

        let result = SpeciesDataset::from_directory(&dir.path().join("train"), &labels);
        assert!(matches!(result, Err(SpeciesIdError::EmptyDataset(_))));
    }

    #[test]
    fn test_batcher_shapes() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        let config = small_config(dir.path(), &["clam", "oyster"]);
        let dataset = SpeciesDataset::from_directory(&config.paths.train_dir, &config.labels).unwrap();

        let batcher = SpeciesBatcher::<CpuBackend>::new(
            cpu_device(),
            Preprocessor::new(&config.preprocess),
            Augmenter::new(config.training.augmentation.clone()),
        );
        let items: Vec<SpeciesItem> = (0..3).filter_map(|i| dataset.get(i)).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let batch = batcher.batch(&items, &mut rng).unwrap();
        assert_eq!(batch.images.dims(), [3, 3, 32, 32]);
        assert_eq!(batch.targets.dims(), [3]);
    }

    #[test]
    fn test_optimizer_epsilon() {
        let value = serde_json::to_value(optimizer_config()).unwrap();
        let epsilon = value["epsilon"].as_f64().unwrap();
        assert!((epsilon - 1e-8).abs() < 1e-12);
    }

    #[test]
    fn test_epoch_order_reshuffled_each_epoch() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut order: Vec<usize> = (0..10).collect();

        let first = epoch_batches(&mut order, 4, &mut rng);
        let second = epoch_batches(&mut order, 4, &mut rng);

        for batches in [&first, &second] {
            let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
            assert_eq!(sizes, vec![4, 4, 2]);
            let mut flat: Vec<usize> = batches.iter().flatten().copied().collect();
            flat.sort_unstable();
            assert_eq!(flat, (0..10).collect::<Vec<_>>());
        }

        let flatten = |b: &Vec<Vec<usize>>| b.iter().flatten().copied().collect::<Vec<_>>();
        assert_ne!(flatten(&first), flatten(&second));
    }

    #[test]
    fn test_train_saves_loadable_model() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        let config = small_config(dir.path(), &["clam", "oyster"]);

        let report =
            train_model::<CpuTrainBackend>(&config, BackboneVariant::Small, cpu_device()).unwrap();

        assert_eq!(report.num_samples, 4);
        assert_eq!(report.epoch_losses.len(), 2);
        assert!(report.epoch_losses.iter().all(|l| l.is_finite()));
        assert_eq!(
            report.model_path,
            dir.path().join("models").join("mobilenetv3_small_model.tar.gz")
        );

        let adapter = ModelAdapter::new(&config);
        let model = adapter
            .load::<CpuBackend>(&report.model_path, BackboneVariant::Small, &cpu_device())
            .unwrap();
        assert_eq!(model.num_classes(), 2);
    }

    #[test]
    fn test_corrupt_image_aborts_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        make_dataset(dir.path());
        fs::write(dir.path().join("train").join("clam").join("zz_broken.jpg"), b"garbage").unwrap();
        let config = small_config(dir.path(), &["clam", "oyster"]);

        let result = train_model::<CpuTrainBackend>(&config, BackboneVariant::Small, cpu_device());
        assert!(matches!(result, Err(SpeciesIdError::Decode { .. })));
        assert!(!config.paths.model_path(BackboneVariant::Small).exists());
    }
}
