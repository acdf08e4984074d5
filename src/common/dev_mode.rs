use std::path::PathBuf;
use std::fs;
use directories::ProjectDirs;
use crate::common::error::{AuthError, Result};

/// Resolves where users, sessions and captures live.
///
/// Dev mode keeps everything under `./dev_data` so a checkout can be tested
/// without touching the user's real data directories.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            ProjectDirs::from("com", "foodgate", "Foodgate")
                .ok_or_else(|| AuthError::Storage("Failed to get project dirs".into()))?
                .data_dir()
                .to_path_buf()
        };

        Self::with_base_dir(enabled, base_dir)
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(base_dir.join("users"))?;
        fs::create_dir_all(base_dir.join("session"))?;
        fs::create_dir_all(base_dir.join("captures"))?;

        if enabled {
            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("users")
    }

    pub fn session_dir(&self) -> PathBuf {
        self.base_dir.join("session")
    }

    /// Registered faces of the mock backend, kept beside the user records.
    pub fn face_references_path(&self) -> PathBuf {
        self.base_dir.join("face_references.bincode")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.base_dir.join("captures")
    }

    pub fn get_capture_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.captures_dir().join(format!("{}_{}.png", prefix, timestamp))
    }
}
