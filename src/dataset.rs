//! データセットディレクトリの走査
//!
//! ルート直下のサブディレクトリ名がクラス名（正解ラベル）です。
//! 走査結果は常に名前順に並べ、実行ごとに同じ順序になるようにします。

use std::path::{Path, PathBuf};

use crate::error::{Result, SpeciesIdError};

/// 対象とする画像の拡張子（大文字小文字は区別しない）
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// ラベル付き画像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: String,
}

/// クラスディレクトリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDir {
    pub name: String,
    pub path: PathBuf,
}

/// 画像ファイルかどうか（拡張子で判定）
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// ルート直下のクラスディレクトリを名前順に列挙（ファイルは無視）
pub fn discover_class_dirs(root: &Path) -> Result<Vec<ClassDir>> {
    SpeciesIdError::ensure_exists(root)?;

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        dirs.push(ClassDir { name, path });
    }
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(dirs)
}

/// ディレクトリ内の画像ファイルを名前順に列挙
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// ルート以下のラベル付き画像をクラス順・ファイル名順に収集
pub fn scan_labeled_images(root: &Path) -> Result<Vec<LabeledImage>> {
    let mut samples = Vec::new();
    for class_dir in discover_class_dirs(root)? {
        for path in list_images(&class_dir.path)? {
            samples.push(LabeledImage {
                path,
                label: class_dir.name.clone(),
            });
        }
    }
    Ok(samples)
}
