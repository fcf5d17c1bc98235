//! 锁屏密码校验
//! 使用 bcrypt 哈希；导出助记词/私钥前必须通过 `ensure_valid_password`

use bcrypt::{hash, verify};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyringError, Result};

/// 密码包装器（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// 哈希密码
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    hash(password, cost).map_err(|e| KeyringError::Vault(format!("Failed to hash password: {}", e)))
}

/// 验证密码
///
/// 如果密码匹配返回true，否则返回false
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    verify(password, hash)
        .map_err(|e| KeyringError::Vault(format!("Failed to verify password: {}", e)))
}

/// 密码不匹配时返回 `InvalidPassword`
pub fn ensure_valid_password(password: &str, hash: &str) -> Result<()> {
    if verify_password(password, hash)? {
        Ok(())
    } else {
        Err(KeyringError::InvalidPassword)
    }
}
