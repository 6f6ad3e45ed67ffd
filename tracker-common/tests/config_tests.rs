//! Configuration loading and override priority
//!
//! Tests that touch process environment are marked `#[serial]`.

use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use tracker_common::config::{StorageBackend, TrackerConfig};
use tracker_common::Error;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = TrackerConfig::default();
    assert_eq!(config.uploads.max_upload_bytes, 5 * 1024 * 1024);
    assert_eq!(
        config.uploads.allowed_extensions,
        vec![".pdf", ".doc", ".docx", ".eml", ".msg"]
    );
    assert_eq!(config.storage.backend, StorageBackend::Local);
    assert_eq!(config.storage.url_ttl_secs, 300);
    assert_eq!(config.uploads.staging_ttl_hours, 24);
    assert!(config.validate().is_ok());
}

#[test]
fn test_toml_partial_file_keeps_defaults() {
    let config = TrackerConfig::from_toml_str(
        r#"
        root_folder = "/srv/tracker"

        [uploads]
        allowed_extensions = ["PDF", "eml"]
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/tracker")));
    assert_eq!(config.uploads.allowed_extensions, vec![".pdf", ".eml"]);
    assert_eq!(config.uploads.max_upload_bytes, 5 * 1024 * 1024);
    assert_eq!(config.bind, "127.0.0.1:8000");
    assert_eq!(config.database_path(), PathBuf::from("/srv/tracker/tracker.db"));
    assert_eq!(config.media_root(), PathBuf::from("/srv/tracker/media"));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = TrackerConfig::from_toml_str("root_folder = [");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_env_overrides_toml() {
    let mut config = TrackerConfig::from_toml_str(
        r#"
        bind = "0.0.0.0:9000"
        [storage]
        backend = "local"
        "#,
    )
    .unwrap();

    config.apply_env(lookup(&[
        ("TRACKER_BIND", "127.0.0.1:7000"),
        ("TRACKER_MAX_UPLOAD_BYTES", "1024"),
        ("TRACKER_STAGING_TTL_HOURS", "6"),
        ("TRACKER_STORAGE_BACKEND", "OBJECT"),
        ("TRACKER_OBJECT_ENDPOINT", "http://objects.local"),
        ("TRACKER_OBJECT_BUCKET", "evidence"),
        ("TRACKER_URL_SIGNING_SECRET", "s3cret"),
        ("TRACKER_SUPERUSER_PASSWORD", "pw"),
    ]));

    assert_eq!(config.bind, "127.0.0.1:7000");
    assert_eq!(config.uploads.max_upload_bytes, 1024);
    assert_eq!(config.uploads.staging_ttl_hours, 6);
    assert_eq!(config.storage.backend, StorageBackend::Object);
    assert_eq!(config.bootstrap.superuser_password.as_deref(), Some("pw"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_bad_env_number_is_ignored() {
    let mut config = TrackerConfig::default();
    config.apply_env(lookup(&[("TRACKER_MAX_UPLOAD_BYTES", "lots")]));
    assert_eq!(config.uploads.max_upload_bytes, 5 * 1024 * 1024);
}

#[test]
fn test_staging_ttl_must_be_positive() {
    let mut config = TrackerConfig::default();
    config.uploads.staging_ttl_hours = 0;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("uploads.staging_ttl_hours"));
}

#[test]
fn test_object_backend_requires_endpoint_and_bucket() {
    let mut config = TrackerConfig::default();
    config.storage.backend = StorageBackend::Object;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("storage.endpoint"));
    assert!(err.contains("storage.bucket"));
    assert!(err.contains("storage.signing_secret"));

    config.storage.endpoint = Some("http://objects.local".to_string());
    config.storage.bucket = Some("evidence".to_string());
    config.storage.public_urls = true;
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_load_explicit_file_with_process_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "root_folder = \"/from/toml\"\n").unwrap();

    env::set_var("TRACKER_ROOT_FOLDER", "/from/env");
    let config = TrackerConfig::load(Some(&path)).unwrap();
    env::remove_var("TRACKER_ROOT_FOLDER");

    assert_eq!(config.root_folder(), PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_load_missing_explicit_file_fails() {
    env::remove_var("TRACKER_ROOT_FOLDER");
    let result = TrackerConfig::load(Some(&PathBuf::from("/nonexistent/tracker.toml")));
    assert!(matches!(result, Err(Error::Config(_))));
}
