//! AES-256-GCM 加密/解密模块
//! 用于密钥环保险库的整体加密

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyringError, Result};

const NONCE_LENGTH: usize = 12;

/// 加密密钥（使用Zeroize保护）
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(KeyringError::Vault("Key must be 32 bytes for AES-256".into()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

/// 加密数据
///
/// # Returns
/// 返回加密后的数据（nonce + ciphertext）
pub fn encrypt_data(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| KeyringError::Vault(format!("Invalid key: {}", e)))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| KeyringError::Vault(format!("Encryption failed: {}", e)))?;

    // 将 nonce (12字节) 和 ciphertext 组合
    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// 解密数据
///
/// 认证失败（密钥错误或数据被篡改）统一返回 `InvalidPassword`。
pub fn decrypt_data(encrypted: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if encrypted.len() < NONCE_LENGTH {
        return Err(KeyringError::Vault("Encrypted data too short".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| KeyringError::Vault(format!("Invalid key: {}", e)))?;

    // 提取 nonce（前12字节）
    let nonce = Nonce::from_slice(&encrypted[..NONCE_LENGTH]);
    let ciphertext = &encrypted[NONCE_LENGTH..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| KeyringError::InvalidPassword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = EncryptionKey::from_slice(b"01234567890123456789012345678901").unwrap();
        let data = b"Hello, World!";

        let encrypted = encrypt_data(data, &key).unwrap();
        assert_ne!(encrypted, data);

        let decrypted = decrypt_data(&encrypted, &key).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_wrong_key_is_invalid_password() {
        let key = EncryptionKey::new([7u8; 32]);
        let other = EncryptionKey::new([8u8; 32]);
        let encrypted = encrypt_data(b"secret", &key).unwrap();
        assert!(matches!(
            decrypt_data(&encrypted, &other),
            Err(KeyringError::InvalidPassword)
        ));
    }
}
