//! アプリケーション設定管理モジュール
//!
//! ラベルセット・正規化定数・学習パラメータ・パスを1つの設定にまとめ、JSON形式で保存・読み込みします。
//! 学習・単一画像推論・一括評価はすべてこの設定を受け取り、定数を個別に持ちません。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SpeciesIdError};
use crate::model::label_set::LabelSet;

/// モデル入力の画像サイズ（正方形）
pub const IMAGE_SIZE: u32 = 224;

/// ImageNetの平均
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNetの標準偏差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = SpeciesIdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" | "ndarray" => Ok(DeviceType::Cpu),
            "wgpu" | "gpu" => Ok(DeviceType::Wgpu),
            other => Err(SpeciesIdError::Config(format!("不明なデバイス: {}", other))),
        }
    }
}

/// バックボーンの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackboneVariant {
    /// MobileNetV3-Large
    Large,
    /// MobileNetV3-Small
    Small,
}

impl BackboneVariant {
    /// 評価時の実行順
    pub const ALL: [BackboneVariant; 2] = [BackboneVariant::Large, BackboneVariant::Small];

    /// ファイル名に使う識別子
    pub fn file_stem(&self) -> &'static str {
        match self {
            BackboneVariant::Large => "mobilenetv3_large",
            BackboneVariant::Small => "mobilenetv3_small",
        }
    }

    /// 学習済みモデルの保存ファイル名
    pub fn model_file_name(&self) -> String {
        format!("{}_model.tar.gz", self.file_stem())
    }

    /// 事前学習済みバックボーンのファイル名
    pub fn backbone_file_name(&self) -> String {
        format!("{}_backbone.mpk", self.file_stem())
    }
}

impl std::fmt::Display for BackboneVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneVariant::Large => write!(f, "MobileNetV3-Large"),
            BackboneVariant::Small => write!(f, "MobileNetV3-Small"),
        }
    }
}

impl FromStr for BackboneVariant {
    type Err = SpeciesIdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "large" | "mobilenetv3-large" => Ok(BackboneVariant::Large),
            "small" | "mobilenetv3-small" => Ok(BackboneVariant::Small),
            other => Err(SpeciesIdError::Config(format!("不明なバックボーン: {}", other))),
        }
    }
}

/// 前処理設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// リサイズ後のサイズ（正方形、ピクセル）
    pub image_size: u32,
    /// チャネルごとの平均
    pub mean: [f32; 3],
    /// チャネルごとの標準偏差
    pub std: [f32; 3],
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// データ拡張設定（学習時のみ使用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationSettings {
    /// 左右反転の確率
    pub horizontal_flip_prob: f64,
    /// 回転角の最大値（±度）
    pub rotation_degrees: f32,
    /// 明るさ係数の幅（1.0 ± brightness）
    pub brightness: f32,
    /// コントラスト係数の幅
    pub contrast: f32,
    /// 彩度係数の幅
    pub saturation: f32,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_degrees: 10.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// データ拡張
    #[serde(default)]
    pub augmentation: AugmentationSettings,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 32,
            learning_rate: 5e-4,
            seed: 42,
            augmentation: AugmentationSettings::default(),
        }
    }
}

/// 入出力パス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// 学習データ（クラス名のサブフォルダを含む）
    pub train_dir: PathBuf,
    /// 評価データ（クラス名のサブフォルダを含む）
    pub test_dir: PathBuf,
    /// 学習済みモデルの保存先
    pub model_dir: PathBuf,
    /// 評価結果CSVの出力先
    pub report_path: PathBuf,
    /// 事前学習済みバックボーンの置き場所
    #[serde(default)]
    pub pretrained_dir: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("photos/train"),
            test_dir: PathBuf::from("photos/test_images"),
            model_dir: PathBuf::from("models"),
            report_path: PathBuf::from("results.csv"),
            pretrained_dir: Some(PathBuf::from("pretrained")),
        }
    }
}

impl PathSettings {
    /// バックボーン別の学習済みモデルのパス
    pub fn model_path(&self, variant: BackboneVariant) -> PathBuf {
        self.model_dir.join(variant.model_file_name())
    }

    /// バックボーン別の事前学習済み重みのパス（設定がなければNone）
    pub fn pretrained_path(&self, variant: BackboneVariant) -> Option<PathBuf> {
        self.pretrained_dir
            .as_ref()
            .map(|dir| dir.join(variant.backbone_file_name()))
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// クラス名一覧（並び順 = クラスインデックス）
    #[serde(default)]
    pub labels: LabelSet,
    /// 前処理設定
    #[serde(default)]
    pub preprocess: PreprocessSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// パス設定
    #[serde(default)]
    pub paths: PathSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            labels: LabelSet::default(),
            preprocess: PreprocessSettings::default(),
            training: TrainingSettings::default(),
            paths: PathSettings::default(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("species_id.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        SpeciesIdError::ensure_exists(path)?;
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 指定パスから読み込む。ファイルが存在しない場合はデフォルト設定を返す
    ///
    /// ファイルが存在して読み込めない場合はエラーを返します（黙ってデフォルトに戻すと定数がずれるため）。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!("設定ファイルを読み込みました: {}", path.display());
            Ok(config)
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の妥当性を確認
    pub fn validate(&self) -> Result<()> {
        self.labels.validate()?;

        if self.preprocess.image_size == 0 {
            return Err(SpeciesIdError::Config("image_size は1以上が必要です".to_string()));
        }
        if self.preprocess.std.iter().any(|s| !(*s > 0.0)) {
            return Err(SpeciesIdError::Config("std はすべて正の値が必要です".to_string()));
        }
        if self.training.num_epochs == 0 {
            return Err(SpeciesIdError::Config("num_epochs は1以上が必要です".to_string()));
        }
        if self.training.batch_size == 0 {
            return Err(SpeciesIdError::Config("batch_size は1以上が必要です".to_string()));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(SpeciesIdError::Config("learning_rate は正の値が必要です".to_string()));
        }
        let p = self.training.augmentation.horizontal_flip_prob;
        if !(0.0..=1.0).contains(&p) {
            return Err(SpeciesIdError::Config(format!("horizontal_flip_prob が範囲外です: {}", p)));
        }
        let aug = &self.training.augmentation;
        for (name, value) in [
            ("rotation_degrees", aug.rotation_degrees),
            ("brightness", aug.brightness),
            ("contrast", aug.contrast),
            ("saturation", aug.saturation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SpeciesIdError::Config(format!(
                    "{} は0以上の有限値が必要です: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("クラス数: {}", self.labels.len());
        for (i, name) in self.labels.iter().enumerate() {
            println!("  {:2}: {}", i, name);
        }
        println!("\n--- 前処理設定 ---");
        println!("画像サイズ: {}x{}", self.preprocess.image_size, self.preprocess.image_size);
        println!("平均: {:?}", self.preprocess.mean);
        println!("標準偏差: {:?}", self.preprocess.std);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("シード: {}", self.training.seed);
        println!("\n--- パス設定 ---");
        println!("学習データ: {}", self.paths.train_dir.display());
        println!("評価データ: {}", self.paths.test_dir.display());
        println!("モデル保存先: {}", self.paths.model_dir.display());
        println!("評価結果: {}", self.paths.report_path.display());
        if let Some(ref dir) = self.paths.pretrained_dir {
            println!("事前学習済み重み: {}", dir.display());
        }
        println!("========================\n");
    }
}
