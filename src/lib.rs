//! 貝類の種判別
//!
//! 写真から18種の貝を判別する画像分類器の学習・単一画像推論・一括評価を提供します。

pub mod dataset;
pub mod error;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod report;
pub mod scoring;

// 機械学習機能のモジュール
#[cfg(feature = "ml")]
pub mod backend;
#[cfg(feature = "ml")]
pub mod ml;

pub use error::{Result, SpeciesIdError};
