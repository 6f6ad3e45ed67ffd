//! Configuration loading and root folder resolution
//!
//! Resolution priority:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`TRACKER_*`)
//! 3. TOML config file
//! 4. Compiled defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the per-user configuration directory and default data folder
pub const APP_DIR_NAME: &str = "risk-tracker";

/// File name of the SQLite database inside the root folder
pub const DATABASE_FILE: &str = "tracker.db";

/// Extensions accepted for evidentiary files unless configured otherwise
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".eml", ".msg"];

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Folder holding the database and local media (OS default when unset)
    pub root_folder: Option<PathBuf>,

    /// HTTP listen address
    pub bind: String,

    pub uploads: UploadConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub bootstrap: BootstrapConfig,
}

/// Upload acceptance rules
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Lower-case extensions including the leading dot
    pub allowed_extensions: Vec<String>,

    /// Largest single file accepted into staging
    pub max_upload_bytes: u64,

    /// Largest multipart request body accepted by the HTTP layer
    pub max_request_bytes: usize,

    /// Staged batches older than this are treated as abandoned and purged
    pub staging_ttl_hours: i64,
}

/// Which blob storage backend is active process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under `<root>/media`, streamed by the service
    #[default]
    Local,
    /// HTTP object store, downloads redirected to (signed) object URLs
    Object,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Local media folder override (defaults to `<root>/media`)
    pub media_root: Option<PathBuf>,

    /// Object store base URL, e.g. `https://objects.example.com`
    pub endpoint: Option<String>,
    pub bucket: Option<String>,

    /// Bearer credential for object store writes
    pub access_key: Option<String>,

    /// Secret used to sign download URLs
    pub signing_secret: Option<String>,

    /// Lifetime of a signed download URL
    pub url_ttl_secs: u64,

    /// Objects are publicly readable; URLs are not signed
    pub public_urls: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

/// Superuser created or refreshed at startup when a password is configured
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub superuser_username: String,
    pub superuser_email: String,
    pub superuser_password: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind: "127.0.0.1:8000".to_string(),
            uploads: UploadConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_upload_bytes: 5 * 1024 * 1024,
            max_request_bytes: 64 * 1024 * 1024,
            staging_ttl_hours: 24,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            media_root: None,
            endpoint: None,
            bucket: None,
            access_key: None,
            signing_secret: None,
            url_ttl_secs: 300,
            public_urls: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_hours: 12 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            superuser_username: "admin".to_string(),
            superuser_email: "admin@example.com".to_string(),
            superuser_password: None,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from TOML (explicit path or default locations),
    /// then apply environment overrides and validate.
    ///
    /// A missing default config file is not an error: defaults are used.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read config {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => match default_config_path() {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    info!("Loaded configuration from {}", path.display());
                    Self::from_toml_str(&content)?
                }
                None => {
                    warn!("No configuration file found, using built-in defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.normalize();
        Ok(config)
    }

    /// Apply `TRACKER_*` overrides using the given variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRACKER_ROOT_FOLDER") {
            self.root_folder = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TRACKER_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("TRACKER_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("TRACKER_MAX_UPLOAD_BYTES") {
            match v.parse() {
                Ok(bytes) => self.uploads.max_upload_bytes = bytes,
                Err(_) => warn!("Ignoring invalid TRACKER_MAX_UPLOAD_BYTES '{}'", v),
            }
        }
        if let Some(v) = lookup("TRACKER_STAGING_TTL_HOURS") {
            match v.parse() {
                Ok(hours) => self.uploads.staging_ttl_hours = hours,
                Err(_) => warn!("Ignoring invalid TRACKER_STAGING_TTL_HOURS '{}'", v),
            }
        }
        if let Some(v) = lookup("TRACKER_ALLOWED_EXTENSIONS") {
            self.uploads.allowed_extensions = v.split(',').map(|s| s.to_string()).collect();
        }
        if let Some(v) = lookup("TRACKER_STORAGE_BACKEND") {
            match v.to_ascii_lowercase().as_str() {
                "local" => self.storage.backend = StorageBackend::Local,
                "object" => self.storage.backend = StorageBackend::Object,
                other => warn!("Ignoring unknown TRACKER_STORAGE_BACKEND '{}'", other),
            }
        }
        if let Some(v) = lookup("TRACKER_OBJECT_ENDPOINT") {
            self.storage.endpoint = Some(v);
        }
        if let Some(v) = lookup("TRACKER_OBJECT_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = lookup("TRACKER_OBJECT_ACCESS_KEY") {
            self.storage.access_key = Some(v);
        }
        if let Some(v) = lookup("TRACKER_URL_SIGNING_SECRET") {
            self.storage.signing_secret = Some(v);
        }
        if let Some(v) = lookup("TRACKER_SUPERUSER_USERNAME") {
            self.bootstrap.superuser_username = v;
        }
        if let Some(v) = lookup("TRACKER_SUPERUSER_EMAIL") {
            self.bootstrap.superuser_email = v;
        }
        if let Some(v) = lookup("TRACKER_SUPERUSER_PASSWORD") {
            self.bootstrap.superuser_password = Some(v);
        }
    }

    /// Lower-case extensions and make sure each carries its leading dot
    fn normalize(&mut self) {
        self.uploads.allowed_extensions = self
            .uploads
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| if ext.starts_with('.') { ext } else { format!(".{}", ext) })
            .collect();
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.uploads.allowed_extensions.is_empty() {
            return Err(Error::Config("uploads.allowed_extensions is empty".to_string()));
        }
        if self.uploads.max_upload_bytes == 0 {
            return Err(Error::Config("uploads.max_upload_bytes must be positive".to_string()));
        }
        if self.uploads.staging_ttl_hours <= 0 {
            return Err(Error::Config("uploads.staging_ttl_hours must be positive".to_string()));
        }
        if self.session.ttl_hours <= 0 {
            return Err(Error::Config("session.ttl_hours must be positive".to_string()));
        }
        if self.storage.backend == StorageBackend::Object {
            let missing: Vec<&str> = [
                ("storage.endpoint", self.storage.endpoint.is_none()),
                ("storage.bucket", self.storage.bucket.is_none()),
                (
                    "storage.signing_secret",
                    self.storage.signing_secret.is_none() && !self.storage.public_urls,
                ),
            ]
            .into_iter()
            .filter(|(_, is_missing)| *is_missing)
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                return Err(Error::Config(format!(
                    "Object storage requires: {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Root folder: configured value or the OS default
    pub fn root_folder(&self) -> PathBuf {
        self.root_folder.clone().unwrap_or_else(default_root_folder)
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder().join(DATABASE_FILE)
    }

    /// Local media folder used by the filesystem backend
    pub fn media_root(&self) -> PathBuf {
        self.storage
            .media_root
            .clone()
            .unwrap_or_else(|| self.root_folder().join("media"))
    }
}

/// First existing config file: `~/.config/risk-tracker/config.toml`, then
/// `/etc/risk-tracker/config.toml` (Linux only)
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./tracker_data"))
}

/// Create the root folder (and media folder) if missing
pub fn ensure_directories(config: &TrackerConfig) -> Result<()> {
    let root = config.root_folder();
    std::fs::create_dir_all(&root)
        .map_err(|e| Error::Config(format!("Cannot create {}: {}", root.display(), e)))?;
    if config.storage.backend == StorageBackend::Local {
        std::fs::create_dir_all(config.media_root())?;
    }
    Ok(())
}
