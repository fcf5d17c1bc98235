//! HD 助记词密钥环
//!
//! BIP39 助记词 + 可选 passphrase，按 BIP44 路径派生账户。
//! 身份取 index 0 的地址，因此同一助记词配不同 passphrase 是两个密钥环。

use std::{collections::HashMap, sync::Mutex};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{lock_state, next_index_range, KeyringIdentity};
use crate::{
    domain::{
        account::Address,
        derivation::{
            address_from_signing_key, derive_signing_key, hash_personal_message, mnemonic_to_seed,
            sign_hash, DerivedAddress, HdPathType,
        },
    },
    error::{KeyringError, Result},
};

/// 持久化形式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HdSerialized {
    pub mnemonic: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub hd_path_type: HdPathType,
    pub active_indexes: Vec<u32>,
}

struct HdState {
    mnemonic: Zeroizing<String>,
    passphrase: Zeroizing<String>,
    seed: Zeroizing<[u8; 64]>,
    path_type: HdPathType,
    /// 已激活的派生索引（激活顺序）
    active: Vec<u32>,
    cache: HashMap<u32, Address>,
}

impl HdState {
    fn address_at(&mut self, index: u32) -> Result<Address> {
        if let Some(address) = self.cache.get(&index) {
            return Ok(address.clone());
        }
        let key = derive_signing_key(&self.seed[..], &self.path_type.path(index))?;
        let address = address_from_signing_key(&key);
        self.cache.insert(index, address.clone());
        Ok(address)
    }

    fn index_of(&mut self, address: &Address) -> Result<Option<u32>> {
        for index in self.active.clone() {
            if self.address_at(index)? == *address {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn activate(&mut self, indexes: &[u32]) -> Result<Vec<Address>> {
        let mut added = Vec::new();
        for &index in indexes {
            if self.active.contains(&index) {
                continue;
            }
            let address = self.address_at(index)?;
            self.active.push(index);
            added.push(address);
        }
        Ok(added)
    }
}

pub struct HdKeyring {
    state: Mutex<HdState>,
}

impl HdKeyring {
    pub fn new(mnemonic: &str, passphrase: &str) -> Result<Self> {
        Self::with_path_type(mnemonic, passphrase, HdPathType::default())
    }

    pub fn with_path_type(mnemonic: &str, passphrase: &str, path_type: HdPathType) -> Result<Self> {
        let normalized = mnemonic.split_whitespace().collect::<Vec<_>>().join(" ");
        let seed = mnemonic_to_seed(&normalized, passphrase)?;
        Ok(Self {
            state: Mutex::new(HdState {
                mnemonic: Zeroizing::new(normalized),
                passphrase: Zeroizing::new(passphrase.to_string()),
                seed,
                path_type,
                active: Vec::new(),
                cache: HashMap::new(),
            }),
        })
    }

    pub fn restore(serialized: HdSerialized) -> Result<Self> {
        let keyring = Self::with_path_type(
            &serialized.mnemonic,
            &serialized.passphrase,
            serialized.hd_path_type,
        )?;
        keyring.activate_indexes(&serialized.active_indexes)?;
        Ok(keyring)
    }

    pub fn serialize(&self) -> Result<HdSerialized> {
        let state = lock_state(&self.state)?;
        Ok(HdSerialized {
            mnemonic: state.mnemonic.to_string(),
            passphrase: state.passphrase.to_string(),
            hd_path_type: state.path_type,
            active_indexes: state.active.clone(),
        })
    }

    /// 身份 = index 0 地址
    pub fn identity(&self) -> Result<KeyringIdentity> {
        let mut state = lock_state(&self.state)?;
        Ok(KeyringIdentity::Hd(state.address_at(0)?))
    }

    /// 预览 `[start, end)` 区间的地址（不激活）
    pub fn get_addresses(&self, start: u32, end: u32) -> Result<Vec<DerivedAddress>> {
        let mut state = lock_state(&self.state)?;
        (start..end)
            .map(|i| {
                Ok(DerivedAddress {
                    address: state.address_at(i)?,
                    index: i + 1,
                })
            })
            .collect()
    }

    pub fn accounts(&self) -> Result<Vec<Address>> {
        let mut state = lock_state(&self.state)?;
        let active = state.active.clone();
        active.into_iter().map(|i| state.address_at(i)).collect()
    }

    pub fn active_indexes(&self) -> Result<Vec<u32>> {
        Ok(lock_state(&self.state)?.active.clone())
    }

    /// 在当前最大索引之后继续激活 `count` 个账户
    pub fn add_accounts(&self, count: u32) -> Result<Vec<Address>> {
        let mut state = lock_state(&self.state)?;
        let indexes: Vec<u32> = next_index_range(state.active.iter().max().copied(), count)?.collect();
        state.activate(&indexes)
    }

    pub fn activate_indexes(&self, indexes: &[u32]) -> Result<Vec<Address>> {
        lock_state(&self.state)?.activate(indexes)
    }

    pub fn remove_account(&self, address: &Address) -> Result<bool> {
        let mut state = lock_state(&self.state)?;
        match state.index_of(address)? {
            Some(index) => {
                state.active.retain(|i| *i != index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn sign_hash(&self, address: &Address, hash: &[u8; 32]) -> Result<Vec<u8>> {
        let mut state = lock_state(&self.state)?;
        let index = state
            .index_of(address)?
            .ok_or_else(|| KeyringError::NotFoundKeyring(address.to_string()))?;
        let key = derive_signing_key(&state.seed[..], &state.path_type.path(index))?;
        sign_hash(&key, hash)
    }

    pub fn sign_personal_message(&self, address: &Address, message: &[u8]) -> Result<Vec<u8>> {
        self.sign_hash(address, &hash_personal_message(message))
    }

    pub fn mnemonic(&self) -> Result<Zeroizing<String>> {
        Ok(lock_state(&self.state)?.mnemonic.clone())
    }

    pub fn private_key(&self, address: &Address) -> Result<Zeroizing<String>> {
        let mut state = lock_state(&self.state)?;
        let index = state
            .index_of(address)?
            .ok_or_else(|| KeyringError::NotFoundKeyring(address.to_string()))?;
        let key = derive_signing_key(&state.seed[..], &state.path_type.path(index))?;
        Ok(Zeroizing::new(hex::encode(key.to_bytes())))
    }
}
