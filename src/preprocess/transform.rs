//! 画像の前処理
//!
//! 手順（順序固定）:
//! 1. 3チャネルRGBとしてデコード
//! 2. 縦横比を保たずに image_size x image_size へリサイズ
//! 3. （学習時のみ）データ拡張
//! 4. [0, 1] の浮動小数点へ変換
//! 5. チャネルごとに (v - mean) / std で正規化

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, RgbImage};
use rand::Rng;

use crate::error::{Result, SpeciesIdError};
use crate::model::PreprocessSettings;
use crate::preprocess::augmentation::Augmenter;

/// 正規化済みの画像テンソル（CHW順で平坦化）
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    size: usize,
}

impl ImageTensor {
    /// [C, H, W]
    pub fn shape(&self) -> [usize; 3] {
        [3, self.size, self.size]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// チャネル c の (x, y) の値
    pub fn get(&self, c: usize, x: usize, y: usize) -> f32 {
        self.data[c * self.size * self.size + y * self.size + x]
    }
}

/// 前処理器
///
/// 学習・推論・評価で同じ設定から作成します。
#[derive(Debug, Clone)]
pub struct Preprocessor {
    image_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(settings: &PreprocessSettings) -> Self {
        Self {
            image_size: settings.image_size,
            mean: settings.mean,
            std: settings.std,
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// 推論・評価用（データ拡張なし）
    pub fn preprocess(&self, path: &Path) -> Result<ImageTensor> {
        let img = self.load_resized(path)?;
        Ok(self.to_tensor(&img))
    }

    /// 学習用（リサイズ後にデータ拡張を適用）
    pub fn preprocess_augmented<R: Rng>(
        &self,
        path: &Path,
        augmenter: &Augmenter,
        rng: &mut R,
    ) -> Result<ImageTensor> {
        let img = self.load_resized(path)?;
        let img = augmenter.augment(img, rng);
        Ok(self.to_tensor(&img))
    }

    /// デコードしてRGBに変換
    pub fn decode(&self, path: &Path) -> Result<RgbImage> {
        SpeciesIdError::ensure_exists(path)?;
        let img = image::open(path).map_err(|source| SpeciesIdError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        // グレースケールやアルファ付きもRGBに揃える
        Ok(img.to_rgb8())
    }

    fn load_resized(&self, path: &Path) -> Result<RgbImage> {
        let img = self.decode(path)?;
        let resized = self.resize(&img);
        let (width, height) = resized.dimensions();
        if width != self.image_size || height != self.image_size {
            return Err(SpeciesIdError::Shape {
                path: path.to_path_buf(),
                expected: self.image_size,
                actual_width: width,
                actual_height: height,
            });
        }
        Ok(resized)
    }

    /// 縦横比を保たずにリサイズ（バイリニア）
    pub fn resize(&self, img: &RgbImage) -> RgbImage {
        if img.dimensions() == (self.image_size, self.image_size) {
            return img.clone();
        }
        DynamicImage::ImageRgb8(img.clone())
            .resize_exact(self.image_size, self.image_size, FilterType::Triangle)
            .to_rgb8()
    }

    /// RGB画像をCHW順の正規化済みテンソルに変換
    pub fn to_tensor(&self, img: &RgbImage) -> ImageTensor {
        let (width, height) = img.dimensions();
        debug_assert_eq!(width, height);
        let num_pixels = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in img.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * num_pixels + i] = (value - self.mean[c]) / self.std[c];
            }
        }

        ImageTensor {
            data,
            size: width as usize,
        }
    }
}
