//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（バックボーン、ラベルセットなど）
//! - model.bin       - モデルの重み（バイナリ）

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{Archive, Builder};

use crate::error::{Result, SpeciesIdError};
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

fn load_error(path: &Path, message: impl Into<String>) -> SpeciesIdError {
    SpeciesIdError::Load {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 親ディレクトリが存在しない場合は作成します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tar_gz_file = File::create(output_path)?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarとgzipの両方を閉じる
    let encoder = tar_builder.into_inner()?;
    encoder.finish()?;

    Ok(())
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    SpeciesIdError::ensure_exists(tar_gz_path)?;
    let tar_gz_file = File::open(tar_gz_path)?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    let entries = archive
        .entries()
        .map_err(|e| load_error(tar_gz_path, format!("tar.gz を展開できません: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| load_error(tar_gz_path, e.to_string()))?;
        let name = entry
            .path()
            .map_err(|e| load_error(tar_gz_path, e.to_string()))?
            .to_string_lossy()
            .to_string();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry
                    .read_to_string(&mut json_str)
                    .map_err(|e| load_error(tar_gz_path, e.to_string()))?;
                let metadata = ModelMetadata::from_json_string(&json_str)
                    .map_err(|e| load_error(tar_gz_path, format!("metadata.json: {}", e)))?;
                metadata_opt = Some(metadata);
            }
            MODEL_ENTRY => {
                let mut buffer = Vec::new();
                entry
                    .read_to_end(&mut buffer)
                    .map_err(|e| load_error(tar_gz_path, e.to_string()))?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(load_error(tar_gz_path, "metadata.json not found in tar.gz archive")),
        (_, None) => Err(load_error(tar_gz_path, "model.bin not found in tar.gz archive")),
    }
}

/// Tar.gzからモデルメタデータのみを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    load_model_with_metadata(tar_gz_path).map(|(metadata, _)| metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackboneVariant, LabelSet};

    #[test]
    fn test_save_and_load_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.tar.gz");
        let metadata = ModelMetadata::new(BackboneVariant::Large, LabelSet::default(), 224, 10);
        let binary = vec![1u8, 2, 3, 4, 5];

        save_model_with_metadata(&path, &metadata, &binary).unwrap();
        let (loaded_meta, loaded_bin) = load_model_with_metadata(&path).unwrap();

        assert_eq!(loaded_meta.variant, BackboneVariant::Large);
        assert_eq!(loaded_meta.num_classes, 18);
        assert_eq!(loaded_bin, binary);
        assert_eq!(load_metadata(&path).unwrap().trained_at, metadata.trained_at);
    }

    #[test]
    fn test_missing_file_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_model_with_metadata(&dir.path().join("absent.tar.gz"));
        assert!(matches!(result, Err(SpeciesIdError::PathNotFound(_))));
    }

    #[test]
    fn test_garbage_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");
        std::fs::write(&path, b"not an archive").unwrap();

        let result = load_model_with_metadata(&path);
        assert!(matches!(result, Err(SpeciesIdError::Load { .. })));
    }
}
