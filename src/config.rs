use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub imgproxy: ImgproxyConfig,
    pub firebase_project_id: String,
    /// Allowed CORS origin. Any origin is allowed when unset.
    pub frontend_url: Option<String>,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    /// Bytes each user may store, counting deduplicated files in full
    pub storage_limit: u64,
    /// Upper bound on object store and identity provider calls
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Where uploads are spooled while they are hashed
    pub spool_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// First segment of every object key
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct ImgproxyConfig {
    pub base_url: String,
    /// Hex-encoded signing key and salt. URLs are unsigned without both.
    pub key: Option<String>,
    pub salt: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            local_storage_path: "./files".to_string(),
            endpoint: "http://minio:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "changeme-minio-secret".to_string(),
            bucket: "openupload".to_string(),
            region: "us-east-1".to_string(),
            key_prefix: "uploads".to_string(),
        }
    }
}

impl Default for ImgproxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://imgproxy:8080".to_string(),
            key: None,
            salt: None,
        }
    }
}

/// First non-empty variable among `names`.
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let spool_dir = env_any(&["SPOOL_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = env_parse("MAX_UPLOAD_SIZE").unwrap_or(50 * 1024 * 1024); // 50MB

        let storage_limit = env_parse("STORAGE_LIMIT").unwrap_or(50 * 1024 * 1024 * 1024); // 50GB

        let request_timeout =
            Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(10));

        let defaults = StorageConfig::default();
        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            _ => StorageBackend::S3,
        };

        let storage = StorageConfig {
            backend,
            local_storage_path: std::env::var("LOCAL_STORAGE_PATH")
                .unwrap_or(defaults.local_storage_path),
            endpoint: env_any(&["S3_ENDPOINT", "MINIO_ENDPOINT"]).unwrap_or(defaults.endpoint),
            access_key: env_any(&["MINIO_ROOT_USER", "MINIO_ACCESS_KEY"])
                .unwrap_or(defaults.access_key),
            secret_key: env_any(&["MINIO_ROOT_PASSWORD", "MINIO_SECRET_KEY"])
                .unwrap_or(defaults.secret_key),
            bucket: env_any(&["MINIO_BUCKET"]).unwrap_or(defaults.bucket),
            region: env_any(&["MINIO_REGION"]).unwrap_or(defaults.region),
            key_prefix: std::env::var("STORAGE_PREFIX").unwrap_or(defaults.key_prefix),
        };

        let imgproxy = ImgproxyConfig {
            base_url: env_any(&["IMGPROXY_URL"]).unwrap_or(ImgproxyConfig::default().base_url),
            key: env_any(&["IMGPROXY_KEY"]),
            salt: env_any(&["IMGPROXY_SALT"]),
        };

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
                spool_dir,
            },
            storage,
            imgproxy,
            firebase_project_id: std::env::var("FIREBASE_PROJECT_ID").unwrap_or_default(),
            frontend_url: env_any(&["FRONTEND_URL"]),
            test_mode,
            max_upload_size,
            storage_limit,
            request_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.firebase_project_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "FIREBASE_PROJECT_ID is required".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "MINIO_BUCKET cannot be empty".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        match (&self.imgproxy.key, &self.imgproxy.salt) {
            (Some(key), Some(salt)) => {
                if hex::decode(key).is_err() || hex::decode(salt).is_err() {
                    return Err(ConfigError::ValidationError(
                        "IMGPROXY_KEY and IMGPROXY_SALT must be hex encoded".to_string(),
                    ));
                }
            }
            (None, None) => {
                tracing::warn!("IMGPROXY_KEY/IMGPROXY_SALT not set, image URLs will be unsigned");
            }
            _ => {
                return Err(ConfigError::ValidationError(
                    "IMGPROXY_KEY and IMGPROXY_SALT must be set together".to_string(),
                ));
            }
        }

        Ok(())
    }
}
