//! Model asset staging.
//!
//! The packaged model is copied once into a writable cache directory; a
//! staged copy that exists and is non-empty is reused as-is. An optional
//! SHA-256 pin turns a corrupt or swapped file into a load failure before any
//! frame is processed.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::model_load;

/// Location of a staged model and how it got there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedModel {
    pub path: PathBuf,
    /// `false` when an existing staged copy was reused.
    pub copied: bool,
    pub bytes: u64,
}

/// Copy `packaged` into `cache_dir` unless a non-empty copy is already there.
pub fn stage_model(packaged: &Path, cache_dir: &Path) -> Result<StagedModel> {
    let file_name = packaged.file_name().ok_or_else(|| {
        model_load(format!(
            "model path {} has no file name",
            packaged.display()
        ))
    })?;
    let staged = cache_dir.join(file_name);

    if let Ok(meta) = fs::metadata(&staged) {
        if meta.is_file() && meta.len() > 0 {
            log::debug!("model already staged at {}", staged.display());
            return Ok(StagedModel {
                path: staged,
                copied: false,
                bytes: meta.len(),
            });
        }
    }

    fs::create_dir_all(cache_dir).map_err(|e| {
        model_load(format!(
            "failed to create model cache dir {}: {}",
            cache_dir.display(),
            e
        ))
    })?;

    let mut source = File::open(packaged).map_err(|e| {
        model_load(format!(
            "failed to open packaged model {}: {}",
            packaged.display(),
            e
        ))
    })?;

    // Copy through a temporary name so an interrupted copy is never mistaken
    // for a staged model.
    let partial = staged.with_extension("partial");
    let bytes = copy_to(&mut source, &partial).map_err(|e| {
        let _ = fs::remove_file(&partial);
        model_load(format!(
            "failed to stage model {} -> {}: {}",
            packaged.display(),
            staged.display(),
            e
        ))
    })?;
    if bytes == 0 {
        let _ = fs::remove_file(&partial);
        return Err(model_load(format!(
            "packaged model {} is empty",
            packaged.display()
        )));
    }
    fs::rename(&partial, &staged).map_err(|e| {
        model_load(format!(
            "failed to move staged model into {}: {}",
            staged.display(),
            e
        ))
    })?;

    log::info!(
        "staged model {} -> {} ({} bytes)",
        packaged.display(),
        staged.display(),
        bytes
    );
    Ok(StagedModel {
        path: staged,
        copied: true,
        bytes,
    })
}

fn copy_to(source: &mut File, dest: &Path) -> io::Result<u64> {
    let mut out = File::create(dest)?;
    let bytes = io::copy(source, &mut out)?;
    out.flush()?;
    out.sync_all()?;
    Ok(bytes)
}

/// Hex-encoded SHA-256 of a file.
pub fn model_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| model_load(format!("failed to open model {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| model_load(format!("failed to read model {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fail with a model load error unless `path` hashes to `expected_hex`.
pub fn verify_model_digest(path: &Path, expected_hex: &str) -> Result<()> {
    let actual = model_digest(path)?;
    if !actual.eq_ignore_ascii_case(expected_hex.trim()) {
        return Err(model_load(format!(
            "model {} has sha256 {}, expected {}",
            path.display(),
            actual,
            expected_hex.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, PipelineErrorKind};

    #[test]
    fn digest_matches_known_vector() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("abc.bin");
        fs::write(&path, b"abc")?;
        assert_eq!(
            model_digest(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        verify_model_digest(
            &path,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD",
        )?;
        Ok(())
    }

    #[test]
    fn digest_mismatch_is_a_model_load_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.onnx");
        fs::write(&path, b"not the model you pinned")?;
        let err = verify_model_digest(&path, &"0".repeat(64)).unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(PipelineErrorKind::ModelLoad)
        );
        Ok(())
    }
}
