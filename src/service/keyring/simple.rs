//! 私钥密钥环（单个 secp256k1 私钥）

use std::sync::Mutex;

use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{lock_state, KeyringIdentity};
use crate::{
    domain::{
        account::Address,
        derivation::{
            address_from_signing_key, hash_personal_message, parse_private_key, sign_hash,
            DerivedAddress,
        },
    },
    error::{KeyringError, Result},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleSerialized {
    pub private_keys: Vec<String>,
}

pub struct SimpleKeyring {
    keys: Mutex<Vec<(Address, SigningKey)>>,
}

impl SimpleKeyring {
    /// 解析 hex 私钥，格式错误返回 `InvalidCredential`
    pub fn new(private_key: &str) -> Result<Self> {
        let key = parse_private_key(private_key)?;
        Ok(Self {
            keys: Mutex::new(vec![(address_from_signing_key(&key), key)]),
        })
    }

    pub fn restore(serialized: SimpleSerialized) -> Result<Self> {
        let keys = serialized
            .private_keys
            .iter()
            .map(|raw| {
                let key = parse_private_key(raw)?;
                Ok((address_from_signing_key(&key), key))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            keys: Mutex::new(keys),
        })
    }

    pub fn serialize(&self) -> Result<SimpleSerialized> {
        let keys = lock_state(&self.keys)?;
        Ok(SimpleSerialized {
            private_keys: keys
                .iter()
                .map(|(_, key)| hex::encode(key.to_bytes()))
                .collect(),
        })
    }

    pub fn identity(&self) -> Result<KeyringIdentity> {
        let keys = lock_state(&self.keys)?;
        keys.first()
            .map(|(address, _)| KeyringIdentity::Simple(address.clone()))
            .ok_or_else(|| KeyringError::InvalidState("empty private key keyring".into()))
    }

    pub fn accounts(&self) -> Result<Vec<Address>> {
        Ok(lock_state(&self.keys)?
            .iter()
            .map(|(address, _)| address.clone())
            .collect())
    }

    /// 与 HD 预览保持同样的返回形状
    pub fn get_addresses(&self, start: u32, end: u32) -> Result<Vec<DerivedAddress>> {
        let keys = lock_state(&self.keys)?;
        Ok(keys
            .iter()
            .enumerate()
            .filter(|(i, _)| (start..end).contains(&(*i as u32)))
            .map(|(i, (address, _))| DerivedAddress {
                address: address.clone(),
                index: i as u32 + 1,
            })
            .collect())
    }

    pub fn remove_account(&self, address: &Address) -> Result<bool> {
        let mut keys = lock_state(&self.keys)?;
        let before = keys.len();
        keys.retain(|(a, _)| a != address);
        Ok(keys.len() != before)
    }

    fn with_key<T>(&self, address: &Address, f: impl FnOnce(&SigningKey) -> Result<T>) -> Result<T> {
        let keys = lock_state(&self.keys)?;
        let (_, key) = keys
            .iter()
            .find(|(a, _)| a == address)
            .ok_or_else(|| KeyringError::NotFoundKeyring(address.to_string()))?;
        f(key)
    }

    pub fn sign_hash(&self, address: &Address, hash: &[u8; 32]) -> Result<Vec<u8>> {
        self.with_key(address, |key| sign_hash(key, hash))
    }

    pub fn sign_personal_message(&self, address: &Address, message: &[u8]) -> Result<Vec<u8>> {
        self.sign_hash(address, &hash_personal_message(message))
    }

    pub fn private_key(&self, address: &Address) -> Result<Zeroizing<String>> {
        self.with_key(address, |key| Ok(Zeroizing::new(hex::encode(key.to_bytes()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_import_and_export() {
        let keyring = SimpleKeyring::new(KEY).unwrap();
        let accounts = keyring.accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(
            keyring.private_key(&accounts[0]).unwrap().as_str(),
            KEY.trim_start_matches("0x")
        );
        assert_eq!(keyring.get_addresses(0, 1).unwrap()[0].index, 1);
    }

    #[test]
    fn test_malformed_key() {
        for bad in ["", "0x1234", "zz83a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"] {
            assert!(matches!(
                SimpleKeyring::new(bad),
                Err(KeyringError::InvalidCredential(_))
            ));
        }
    }

    #[test]
    fn test_remove_account() {
        let keyring = SimpleKeyring::new(KEY).unwrap();
        let address = keyring.accounts().unwrap().remove(0);
        assert!(keyring.remove_account(&address).unwrap());
        assert!(keyring.accounts().unwrap().is_empty());
        assert!(!keyring.remove_account(&address).unwrap());
    }
}
