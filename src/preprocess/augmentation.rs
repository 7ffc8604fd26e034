//! 学習用データ拡張
//!
//! 左右反転、ランダム回転、明るさ・コントラスト・彩度のジッターを適用します。
//! 推論・評価の経路では使用しません。

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::AugmentationSettings;

/// カラージッターの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Jitter {
    Brightness,
    Contrast,
    Saturation,
}

/// ランダム変換を適用する拡張器
#[derive(Debug, Clone)]
pub struct Augmenter {
    settings: AugmentationSettings,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings) -> Self {
        Self { settings }
    }

    /// リサイズ済み画像に拡張を適用
    ///
    /// 呼び出しごとに新しい乱数を引くため、同じ画像でもエポックごとに結果が変わります。
    pub fn augment<R: Rng>(&self, img: RgbImage, rng: &mut R) -> RgbImage {
        let mut result = img;

        if rng.gen_bool(self.settings.horizontal_flip_prob) {
            result = image::imageops::flip_horizontal(&result);
        }

        if self.settings.rotation_degrees > 0.0 {
            let max = self.settings.rotation_degrees;
            let angle = rng.gen_range(-max..=max);
            result = rotate(&result, angle);
        }

        // ジッターの適用順もランダム
        let mut order = [Jitter::Brightness, Jitter::Contrast, Jitter::Saturation];
        order.shuffle(rng);
        for jitter in order {
            let delta = match jitter {
                Jitter::Brightness => self.settings.brightness,
                Jitter::Contrast => self.settings.contrast,
                Jitter::Saturation => self.settings.saturation,
            };
            if delta <= 0.0 {
                continue;
            }
            let factor = rng.gen_range((1.0 - delta).max(0.0)..=1.0 + delta);
            result = match jitter {
                Jitter::Brightness => adjust_brightness(&result, factor),
                Jitter::Contrast => adjust_contrast(&result, factor),
                Jitter::Saturation => adjust_saturation(&result, factor),
            };
        }

        result
    }
}

/// 中心回りに回転（最近傍補間、はみ出しは黒）
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    rotate_about_center(img, angle_degrees.to_radians(), Interpolation::Nearest, Rgb([0, 0, 0]))
}

fn gray(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

fn blend(value: u8, other: f32, factor: f32) -> u8 {
    (other + factor * (value as f32 - other)).round().clamp(0.0, 255.0) as u8
}

/// 明るさ: 画素値を factor 倍
fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    let mut output = img.clone();
    for pixel in output.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    output
}

/// コントラスト: 平均輝度を中心にスケール
fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() * img.height()).max(1) as f32;
    let mean = img.pixels().map(gray).sum::<f32>() / count;

    let mut output = img.clone();
    for pixel in output.pixels_mut() {
        for c in 0..3 {
            pixel[c] = blend(pixel[c], mean, factor);
        }
    }
    output
}

/// 彩度: 画素ごとのグレースケールとの間で補間
fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    let mut output = img.clone();
    for pixel in output.pixels_mut() {
        let g = gray(pixel);
        for c in 0..3 {
            pixel[c] = blend(pixel[c], g, factor);
        }
    }
    output
}
