//! 密钥环保险库持久化
//!
//! 保险库内容：bcrypt 密码哈希（锁屏校验）、PBKDF2 盐值与迭代次数、
//! 以及每个密钥环一段 AES-256-GCM 密文（base64）。

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KeyringError, Result};

pub const VAULT_FORMAT_VERSION: u32 = 1;

/// 保险库文件内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultBlob {
    pub version: u32,
    /// bcrypt 哈希
    pub password_hash: String,
    /// PBKDF2 盐值（base64）
    pub salt: String,
    pub kdf_iterations: u32,
    /// 每个密钥环一段密文（base64，nonce + ciphertext）
    pub keyrings: Vec<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// 保险库存储接口
#[async_trait]
pub trait VaultStore: Send + Sync {
    async fn load(&self) -> Result<Option<VaultBlob>>;
    async fn save(&self, blob: &VaultBlob) -> Result<()>;
}

/// 文件存储（先写临时文件再 rename）
pub struct FileVaultStore {
    path: PathBuf,
}

impl FileVaultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VaultStore for FileVaultStore {
    async fn load(&self) -> Result<Option<VaultBlob>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyringError::Vault(format!(
                "Failed to read vault {:?}: {}",
                self.path, e
            ))),
        }
    }

    async fn save(&self, blob: &VaultBlob) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KeyringError::Vault(format!("Failed to create vault dir: {}", e)))?;
        }

        let bytes = serde_json::to_vec_pretty(blob)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| KeyringError::Vault(format!("Failed to write vault: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| KeyringError::Vault(format!("Failed to replace vault: {}", e)))?;

        tracing::debug!(path = ?self.path, keyrings = blob.keyrings.len(), "Vault persisted");
        Ok(())
    }
}

/// 内存存储，记录写入次数
#[derive(Default)]
pub struct InMemoryVaultStore {
    blob: Mutex<Option<VaultBlob>>,
    writes: AtomicUsize,
}

impl InMemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<VaultBlob> {
        self.blob.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl VaultStore for InMemoryVaultStore {
    async fn load(&self) -> Result<Option<VaultBlob>> {
        Ok(self.snapshot())
    }

    async fn save(&self, blob: &VaultBlob) -> Result<()> {
        let mut guard = self
            .blob
            .lock()
            .map_err(|_| KeyringError::Vault("vault store poisoned".into()))?;
        *guard = Some(blob.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> VaultBlob {
        VaultBlob {
            version: VAULT_FORMAT_VERSION,
            password_hash: "$2b$04$hash".into(),
            salt: "c2FsdA==".into(),
            kdf_iterations: 1000,
            keyrings: vec!["AAAA".into()],
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVaultStore::new(dir.path().join("nested").join("vault.json"));

        assert!(store.load().await.unwrap().is_none());

        let blob = sample_blob();
        store.save(&blob).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_memory_store_counts_writes() {
        let store = InMemoryVaultStore::new();
        store.save(&sample_blob()).await.unwrap();
        store.save(&sample_blob()).await.unwrap();
        assert_eq!(store.write_count(), 2);
        assert!(store.load().await.unwrap().is_some());
    }
}
