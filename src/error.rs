//! エラー型の定義
//!
//! 3つのワークフロー（学習・単一画像推論・一括評価）はいずれもエラーから回復しません。
//! どのエラーも実行全体を中断し、失敗したパスを含むメッセージを表示します。

use std::path::PathBuf;

use thiserror::Error;

/// ライブラリ全体のエラー型
#[derive(Error, Debug)]
pub enum SpeciesIdError {
    /// 画像として読み込めない（破損・未対応形式など）
    #[error("画像のデコードに失敗しました '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// リサイズ後の画像サイズが期待値と一致しない
    #[error("画像サイズが不正です '{path}': {actual_width}x{actual_height} (期待: {expected}x{expected})")]
    Shape {
        path: PathBuf,
        expected: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// 重みスナップショットが現在のアーキテクチャと一致しない
    #[error("重みスナップショットの形状が一致しません '{path}': {detail}")]
    ShapeMismatch { path: PathBuf, detail: String },

    /// データセット・重みファイル・テストフォルダが存在しない
    #[error("パスが見つかりません: {0}")]
    PathNotFound(PathBuf),

    /// スナップショットのアーカイブやレコードを復元できない
    #[error("モデルの読み込みに失敗しました '{path}': {message}")]
    Load { path: PathBuf, message: String },

    /// 重みをシリアライズできない
    #[error("モデルの保存に失敗しました '{path}': {message}")]
    Save { path: PathBuf, message: String },

    /// データセットのクラス構成がラベルセットと一致しない
    #[error("クラス構成がラベルセットと一致しません (期待: [{expected}], 検出: [{found}])")]
    LabelMismatch { expected: String, found: String },

    /// 画像が1枚も見つからない
    #[error("画像が見つかりません: {0}")]
    EmptyDataset(PathBuf),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("推論エラー: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpeciesIdError>;

impl SpeciesIdError {
    /// パスが存在しなければ `PathNotFound` を返す
    pub fn ensure_exists(path: &std::path::Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(Self::PathNotFound(path.to_path_buf()))
        }
    }
}
