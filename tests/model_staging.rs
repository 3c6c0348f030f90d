use std::fs;

use night2day::error::{PipelineError, PipelineErrorKind};
use night2day::infer::{model_digest, stage_model, verify_model_digest};

fn kind(err: &anyhow::Error) -> Option<PipelineErrorKind> {
    PipelineError::kind_of(err)
}

#[test]
fn copies_packaged_model_into_cache() {
    let dir = tempfile::tempdir().expect("temp dir");
    let packaged = dir.path().join("assets").join("night2day.onnx");
    fs::create_dir_all(packaged.parent().unwrap()).unwrap();
    fs::write(&packaged, b"onnx-bytes").unwrap();
    let cache = dir.path().join("cache").join("models");

    let staged = stage_model(&packaged, &cache).expect("stage model");
    assert!(staged.copied);
    assert_eq!(staged.bytes, 10);
    assert_eq!(staged.path, cache.join("night2day.onnx"));
    assert_eq!(fs::read(&staged.path).unwrap(), b"onnx-bytes");
    assert!(!cache.join("night2day.partial").exists());
}

#[test]
fn existing_non_empty_copy_is_reused() {
    let dir = tempfile::tempdir().expect("temp dir");
    let packaged = dir.path().join("night2day.onnx");
    fs::write(&packaged, b"new model").unwrap();
    let cache = dir.path().join("cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("night2day.onnx"), b"old").unwrap();

    let staged = stage_model(&packaged, &cache).expect("stage model");
    assert!(!staged.copied);
    assert_eq!(staged.bytes, 3);
    assert_eq!(fs::read(&staged.path).unwrap(), b"old");
}

#[test]
fn empty_staged_copy_is_replaced() {
    let dir = tempfile::tempdir().expect("temp dir");
    let packaged = dir.path().join("night2day.onnx");
    fs::write(&packaged, b"model").unwrap();
    let cache = dir.path().join("cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("night2day.onnx"), b"").unwrap();

    let staged = stage_model(&packaged, &cache).expect("stage model");
    assert!(staged.copied);
    assert_eq!(fs::read(&staged.path).unwrap(), b"model");
}

#[test]
fn missing_or_empty_packaged_model_fails_to_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cache = dir.path().join("cache");

    let err = stage_model(&dir.path().join("absent.onnx"), &cache).unwrap_err();
    assert_eq!(kind(&err), Some(PipelineErrorKind::ModelLoad));

    let empty = dir.path().join("empty.onnx");
    fs::write(&empty, b"").unwrap();
    let err = stage_model(&empty, &cache).unwrap_err();
    assert_eq!(kind(&err), Some(PipelineErrorKind::ModelLoad));
    assert!(!cache.join("empty.onnx").exists());
}

#[test]
fn staged_model_digest_is_checked() {
    let dir = tempfile::tempdir().expect("temp dir");
    let packaged = dir.path().join("night2day.onnx");
    fs::write(&packaged, b"abc").unwrap();
    let staged = stage_model(&packaged, &dir.path().join("cache")).expect("stage model");

    let digest = model_digest(&staged.path).expect("digest");
    verify_model_digest(&staged.path, &digest).expect("matching digest");

    fs::write(&staged.path, b"abd").unwrap();
    let err = verify_model_digest(&staged.path, &digest).unwrap_err();
    assert_eq!(kind(&err), Some(PipelineErrorKind::ModelLoad));
}
