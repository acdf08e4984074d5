pub mod password;
pub mod user_store;

pub use user_store::{CredentialStore, FileUserStore, MemoryUserStore};

use crate::common::config::{StorageBackendKind, StorageConfig};
use crate::common::{DevMode, Result};
use std::sync::Arc;

/// Builds the store selected by `[storage] backend`.
pub fn open_store(config: &StorageConfig, dev_mode: &DevMode) -> Result<Arc<dyn CredentialStore>> {
    match config.backend {
        StorageBackendKind::Memory => {
            tracing::info!("Using in-memory credential store");
            Ok(Arc::new(MemoryUserStore::new()))
        }
        StorageBackendKind::File => {
            let dir = config.data_dir.clone().unwrap_or_else(|| dev_mode.data_dir());
            tracing::info!("Using file credential store at {}", dir.display());
            Ok(Arc::new(FileUserStore::open(dir)?))
        }
    }
}
