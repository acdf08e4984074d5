use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{AuthError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "configs/foodgate.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String { "127.0.0.1:3001".to_string() }
fn default_max_upload() -> usize { 10 * 1024 * 1024 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind(), max_upload_bytes: default_max_upload() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Signing secret for session tokens. Generated per process when absent.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: u32,
    #[serde(default)]
    pub require_face_on_signup: bool,
}

fn default_token_ttl() -> u32 { 24 * 7 }

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: default_token_ttl(),
            require_face_on_signup: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaceBackendKind {
    #[default]
    Mock,
    Remote,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaceConfig {
    #[serde(default)]
    pub backend: FaceBackendKind,
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_face_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Minimum fingerprint similarity for the mock backend to report a match.
    #[serde(default = "default_mock_threshold")]
    pub mock_match_threshold: f32,
    /// Where the mock backend keeps registered faces. Defaults to the data
    /// directory so faces persist alongside file-stored users.
    #[serde(default)]
    pub mock_references: Option<PathBuf>,
}

fn default_service_url() -> String { "http://localhost:5000".to_string() }
fn default_face_timeout() -> u64 { 10_000 }
fn default_max_retries() -> u32 { 2 }
fn default_retry_backoff() -> u64 { 250 }
fn default_mock_threshold() -> f32 { 0.9 }

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            backend: FaceBackendKind::default(),
            service_url: default_service_url(),
            timeout_ms: default_face_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            mock_match_threshold: default_mock_threshold(),
            mock_references: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    #[serde(default = "default_detect_interval")]
    pub detect_interval_ms: u64,
    #[serde(default = "default_face_wait")]
    pub face_wait_seconds: u32,
}

fn default_width() -> u32 { 320 }
fn default_height() -> u32 { 240 }
fn default_warmup_delay() -> u64 { 50 }
fn default_detect_interval() -> u64 { 500 }
fn default_face_wait() -> u32 { 15 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            warmup_frames: 0,
            warmup_delay_ms: default_warmup_delay(),
            detect_interval_ms: default_detect_interval(),
            face_wait_seconds: default_face_wait(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Overrides the dev/system data directory for the file backend.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

fn default_api_url() -> String { "http://localhost:3001".to_string() }

impl Default for ClientConfig {
    fn default() -> Self {
        Self { api_url: default_api_url(), session_dir: None }
    }
}

impl Config {
    /// Loads the default config file, or built-in defaults when it is absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AuthError::Config(format!(
                "Config file not found: {}. Please create it from configs/foodgate.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(AuthError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(AuthError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.detect_interval_ms < 50 || self.camera.detect_interval_ms > 10_000 {
            return Err(AuthError::Config(format!(
                "Detection interval must be between 50 and 10000 ms, got {}",
                self.camera.detect_interval_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.face.mock_match_threshold) {
            return Err(AuthError::Config(format!(
                "Mock match threshold must be between 0.0 and 1.0, got {}",
                self.face.mock_match_threshold
            )));
        }
        if self.face.timeout_ms == 0 || self.face.timeout_ms > 120_000 {
            return Err(AuthError::Config(format!(
                "Face service timeout must be between 1 and 120000 ms, got {}",
                self.face.timeout_ms
            )));
        }
        if self.face.retry_backoff_ms > 60_000 {
            return Err(AuthError::Config(format!(
                "Face service retry backoff must be at most 60000 ms, got {}",
                self.face.retry_backoff_ms
            )));
        }
        if self.face.max_retries > 10 {
            return Err(AuthError::Config(format!(
                "Face service retries must be at most 10, got {}", self.face.max_retries
            )));
        }
        if self.face.backend == FaceBackendKind::Remote && !is_http_url(&self.face.service_url) {
            return Err(AuthError::Config(format!(
                "Face service URL must start with http:// or https://, got {}",
                self.face.service_url
            )));
        }
        if !is_http_url(&self.client.api_url) {
            return Err(AuthError::Config(format!(
                "API URL must start with http:// or https://, got {}", self.client.api_url
            )));
        }

        if self.auth.token_ttl_hours == 0 {
            return Err(AuthError::Config("Token TTL must be at least one hour".into()));
        }
        if let Some(secret) = &self.auth.jwt_secret {
            if secret.len() < 16 {
                return Err(AuthError::Config(
                    "JWT secret must be at least 16 characters".into(),
                ));
            }
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.camera.detect_interval_ms, 500);
        assert_eq!(config.face.backend, FaceBackendKind::Mock);
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
        assert_eq!(config.auth.token_ttl_hours, 168);
        assert!(!config.auth.require_face_on_signup);
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_toml(
            r#"
            [face]
            backend = "remote"
            service_url = "http://faces.internal:5000"
            max_retries = 4

            [storage]
            backend = "file"
            data_dir = "/tmp/foodgate-users"

            [camera]
            device_index = 2
            detect_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.face.backend, FaceBackendKind::Remote);
        assert_eq!(config.face.max_retries, 4);
        assert_eq!(config.storage.backend, StorageBackendKind::File);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/foodgate-users")));
        assert_eq!(config.camera.device_index, 2);
        assert_eq!(config.camera.width, 320);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Config::from_toml("[camera]\nwidth = 0").is_err());
        assert!(Config::from_toml("[face]\nmock_match_threshold = 1.5").is_err());
        assert!(Config::from_toml("[face]\nbackend = \"remote\"\nservice_url = \"ftp://x\"").is_err());
        assert!(Config::from_toml("[auth]\njwt_secret = \"short\"").is_err());
        assert!(Config::from_toml("[camera]\ndetect_interval_ms = 5").is_err());
        assert!(Config::from_toml("[face]\nretry_backoff_ms = 600000").is_err());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/foodgate.toml")).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = Config::from_toml(include_str!("../../configs/foodgate.toml")).unwrap();
        assert_eq!(config.storage.backend, StorageBackendKind::File);
        assert_eq!(config.server.bind, "127.0.0.1:3001");
    }
}
