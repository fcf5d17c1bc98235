//! 密钥派生与签名原语
//!
//! secp256k1 / Ethereum 系：BIP39 助记词 → 种子 → BIP32 路径 → 地址；
//! 以及原始私钥解析、哈希签名与签名恢复。

use bip39::{Language, Mnemonic};
use coins_bip32::path::DerivationPath;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::{
    domain::account::Address,
    error::{KeyringError, Result},
};

/// HD 派生路径类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HdPathType {
    /// BIP44: m/44'/60'/0'/0/{index}
    #[default]
    Bip44,
    /// Ledger Live: m/44'/60'/{index}'/0/0
    LedgerLive,
    /// Legacy (MEW/MyCrypto): m/44'/60'/0'/{index}
    Legacy,
}

impl HdPathType {
    pub fn path(&self, index: u32) -> String {
        match self {
            Self::Bip44 => format!("m/44'/60'/0'/0/{}", index),
            Self::LedgerLive => format!("m/44'/60'/{}'/0/0", index),
            Self::Legacy => format!("m/44'/60'/0'/{}", index),
        }
    }
}

/// 派生出的地址（index 从 1 开始，便于展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub address: Address,
    pub index: u32,
}

/// 助记词 → 种子
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}

/// 解析并规范化助记词
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    Mnemonic::parse_in(Language::English, normalized.as_str())
        .map_err(|e| KeyringError::InvalidCredential(format!("invalid mnemonic: {}", e)))
}

/// 按路径从种子派生签名密钥
pub fn derive_signing_key(seed: &[u8], path: &str) -> Result<SigningKey> {
    use coins_bip32::prelude::*;

    let derivation_path = path
        .parse::<DerivationPath>()
        .map_err(|e| KeyringError::InvalidCredential(format!("invalid derivation path: {}", e)))?;

    let master_key = XPriv::root_from_seed(seed, None)
        .map_err(|e| KeyringError::InvalidCredential(format!("master key: {}", e)))?;

    let derived_key = master_key
        .derive_path(&derivation_path)
        .map_err(|e| KeyringError::InvalidCredential(format!("derive {}: {}", path, e)))?;

    // XPriv 实现 AsRef<SigningKey>
    let signing_key: &SigningKey = derived_key.as_ref();
    Ok(signing_key.clone())
}

/// 公钥 → Ethereum 地址
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let public_key = key.to_encoded_point(false); // 未压缩格式
    let hash = Keccak256::digest(&public_key.as_bytes()[1..]); // 去掉 0x04 前缀
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]); // 取后 20 字节
    Address::from_bytes(&bytes)
}

pub fn address_from_signing_key(key: &SigningKey) -> Address {
    address_from_verifying_key(key.verifying_key())
}

/// 解析 hex 私钥（可带 0x 前缀）
pub fn parse_private_key(raw: &str) -> Result<SigningKey> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 64 {
        return Err(KeyringError::InvalidCredential(
            "private key must be 32 bytes".into(),
        ));
    }
    let bytes = Zeroizing::new(
        hex::decode(hex_part)
            .map_err(|_| KeyringError::InvalidCredential("private key is not hex".into()))?,
    );
    SigningKey::from_slice(&bytes)
        .map_err(|_| KeyringError::InvalidCredential("private key out of range".into()))
}

/// EIP-191 personal_sign 哈希
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// 对 32 字节哈希签名，返回 r || s || v（v = 27 + recid）
pub fn sign_hash(key: &SigningKey, hash: &[u8; 32]) -> Result<Vec<u8>> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| KeyringError::InvalidSignature(e.to_string()))?;

    let mut out = signature.to_bytes().to_vec();
    out.push(27 + recovery_id.to_byte());
    Ok(out)
}

/// 从 65 字节签名恢复签名者地址（v 取 27/28 或 0/1）
pub fn recover_address(hash: &[u8; 32], signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(KeyringError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }

    let v = signature[64];
    let recid = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recid)
        .ok_or_else(|| KeyringError::InvalidSignature(format!("bad recovery id {}", v)))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| KeyringError::InvalidSignature(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|e| KeyringError::InvalidSignature(e.to_string()))?;
    Ok(address_from_verifying_key(&key))
}
