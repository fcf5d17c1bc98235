//! PBKDF2 密钥派生模块
//! 从锁屏密码派生保险库加密密钥

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::{
    error::{KeyringError, Result},
    infrastructure::encryption::EncryptionKey,
};

/// PBKDF2 密钥派生参数
pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const SALT_LENGTH: usize = 16; // 16字节盐值
const KEY_LENGTH: usize = 32; // 32字节密钥（AES-256）

/// 生成随机盐值
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// 从密码和盐值派生密钥
pub fn derive_key_with_salt(password: &str, salt: &[u8], iterations: u32) -> Result<EncryptionKey> {
    if salt.len() != SALT_LENGTH {
        return Err(KeyringError::Vault(format!(
            "Salt must be {} bytes",
            SALT_LENGTH
        )));
    }

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);

    Ok(EncryptionKey::new(key))
}
