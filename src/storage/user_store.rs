use crate::common::{AuthError, Result};
use crate::core::{normalize_email, UserRecord};
use crate::storage::password;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const STORAGE_VERSION: u32 = 1;

/// Owner of user identity and password-hash records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Fails with `EmailAlreadyRegistered` without touching the store when the
    /// email is taken.
    async fn create(&self, record: UserRecord) -> Result<UserRecord>;

    fn verify_password(&self, record: &UserRecord, candidate: &str) -> bool {
        match &record.password_hash {
            Some(hash) => password::verify_password(candidate, hash),
            None => false,
        }
    }
}

fn poisoned<T>(_: T) -> AuthError {
    AuthError::Storage("User table lock poisoned".into())
}

/// In-process table keyed by normalized email.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|users| users.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(&normalize_email(email)).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.values().find(|u| u.id == id).cloned())
    }

    async fn create(&self, record: UserRecord) -> Result<UserRecord> {
        let key = normalize_email(&record.email);
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(&key) {
            return Err(AuthError::EmailAlreadyRegistered(record.email));
        }
        users.insert(key, record.clone());
        Ok(record)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredUser {
    version: u32,
    record: UserRecord,
}

/// One bincode file per user, indexed by email in memory at open.
pub struct FileUserStore {
    data_dir: PathBuf,
    index: RwLock<HashMap<String, UserRecord>>,
}

impl FileUserStore {
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;

        let mut index = HashMap::new();
        for entry in fs::read_dir(&data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bincode") {
                continue;
            }
            let record = Self::read_user(&path)?;
            index.insert(normalize_email(&record.email), record);
        }

        tracing::debug!("Loaded {} user(s) from {:?}", index.len(), data_dir);
        Ok(Self { data_dir, index: RwLock::new(index) })
    }

    fn read_user(path: &Path) -> Result<UserRecord> {
        let data = fs::read(path)?;
        let mut stored: StoredUser = bincode::deserialize(&data)
            .map_err(|e| AuthError::Storage(format!("Failed to deserialize {:?}: {}", path, e)))?;

        // Handle version migration if needed
        if stored.version < STORAGE_VERSION {
            stored.version = STORAGE_VERSION;
        }

        Ok(stored.record)
    }

    fn user_file(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.bincode", id))
    }

    fn save_user(&self, record: &UserRecord) -> Result<()> {
        let stored = StoredUser { version: STORAGE_VERSION, record: record.clone() };
        let encoded = bincode::serialize(&stored)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize: {}", e)))?;

        // Write then rename so a crash never leaves a half-written record.
        let final_path = self.user_file(&record.id);
        let tmp_path = final_path.with_extension("bincode.tmp");
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.get(&normalize_email(email)).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.values().find(|u| u.id == id).cloned())
    }

    async fn create(&self, record: UserRecord) -> Result<UserRecord> {
        let key = normalize_email(&record.email);
        let mut index = self.index.write().map_err(poisoned)?;
        if index.contains_key(&key) {
            return Err(AuthError::EmailAlreadyRegistered(record.email));
        }

        self.save_user(&record)?;
        index.insert(key, record.clone());
        tracing::debug!("Stored user {} at {:?}", record.id, self.user_file(&record.id));
        Ok(record)
    }
}
