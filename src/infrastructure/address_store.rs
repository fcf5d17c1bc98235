//! 地址维度的派生数据
//!
//! 余额缓存、头像、别名、白名单、置顶标记与交易历史，全部以小写地址为键。
//! 最后一个持有该地址的密钥环账户被移除时，注册表通过 `AddressScopedStore::remove` 级联清理。

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::account::Address,
    error::{KeyringError, Result},
};

/// 支持按地址删除的存储
#[async_trait]
pub trait AddressScopedStore: Send + Sync {
    fn name(&self) -> &'static str;
    async fn remove(&self, address: &Address) -> Result<()>;
}

/// 置顶地址（地址 + 品牌）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedAddress {
    pub address: Address,
    pub brand_name: String,
}

/// 交易历史条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub tx_hash: String,
    pub network: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct AddressData {
    balances: HashMap<String, Decimal>,
    avatars: HashMap<String, String>,
    aliases: HashMap<String, String>,
    whitelist: HashSet<String>,
    pinned: Vec<PinnedAddress>,
    history: HashMap<String, Vec<HistoryEntry>>,
}

/// 内存实现
#[derive(Debug, Default)]
pub struct AddressDataStore {
    inner: RwLock<AddressData>,
}

impl AddressDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&AddressData) -> T) -> Result<T> {
        let guard = self
            .inner
            .read()
            .map_err(|_| KeyringError::InvalidState("address store poisoned".into()))?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut AddressData) -> T) -> Result<T> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| KeyringError::InvalidState("address store poisoned".into()))?;
        Ok(f(&mut guard))
    }

    pub fn set_balance(&self, address: &Address, usd_value: Decimal) -> Result<()> {
        self.write(|d| {
            d.balances.insert(address.as_str().to_string(), usd_value);
        })
    }

    pub fn balance(&self, address: &Address) -> Result<Option<Decimal>> {
        self.read(|d| d.balances.get(address.as_str()).copied())
    }

    pub fn set_avatar(&self, address: &Address, avatar: impl Into<String>) -> Result<()> {
        let avatar = avatar.into();
        self.write(|d| {
            d.avatars.insert(address.as_str().to_string(), avatar);
        })
    }

    pub fn avatar(&self, address: &Address) -> Result<Option<String>> {
        self.read(|d| d.avatars.get(address.as_str()).cloned())
    }

    pub fn set_alias(&self, address: &Address, alias: impl Into<String>) -> Result<()> {
        let alias = alias.into();
        self.write(|d| {
            d.aliases.insert(address.as_str().to_string(), alias);
        })
    }

    pub fn alias(&self, address: &Address) -> Result<Option<String>> {
        self.read(|d| d.aliases.get(address.as_str()).cloned())
    }

    pub fn add_whitelist(&self, address: &Address) -> Result<()> {
        self.write(|d| {
            d.whitelist.insert(address.as_str().to_string());
        })
    }

    pub fn is_whitelisted(&self, address: &Address) -> Result<bool> {
        self.read(|d| d.whitelist.contains(address.as_str()))
    }

    pub fn pin(&self, address: &Address, brand_name: impl Into<String>) -> Result<()> {
        let entry = PinnedAddress {
            address: address.clone(),
            brand_name: brand_name.into(),
        };
        self.write(|d| {
            if !d.pinned.contains(&entry) {
                d.pinned.push(entry);
            }
        })
    }

    pub fn unpin(&self, address: &Address, brand_name: &str) -> Result<()> {
        self.write(|d| {
            d.pinned
                .retain(|p| !(p.address == *address && p.brand_name == brand_name));
        })
    }

    pub fn pinned(&self) -> Result<Vec<PinnedAddress>> {
        self.read(|d| d.pinned.clone())
    }

    pub fn is_pinned(&self, address: &Address, brand_name: &str) -> Result<bool> {
        self.read(|d| {
            d.pinned
                .iter()
                .any(|p| p.address == *address && p.brand_name == brand_name)
        })
    }

    pub fn add_history(&self, address: &Address, entry: HistoryEntry) -> Result<()> {
        self.write(|d| {
            d.history
                .entry(address.as_str().to_string())
                .or_default()
                .push(entry);
        })
    }

    pub fn history(&self, address: &Address) -> Result<Vec<HistoryEntry>> {
        self.read(|d| d.history.get(address.as_str()).cloned().unwrap_or_default())
    }

    /// 是否仍有任何与该地址关联的数据
    pub fn has_any_data(&self, address: &Address) -> Result<bool> {
        let key = address.as_str();
        self.read(|d| {
            d.balances.contains_key(key)
                || d.avatars.contains_key(key)
                || d.aliases.contains_key(key)
                || d.whitelist.contains(key)
                || d.pinned.iter().any(|p| p.address == *address)
                || d.history.contains_key(key)
        })
    }
}

#[async_trait]
impl AddressScopedStore for AddressDataStore {
    fn name(&self) -> &'static str {
        "address-data"
    }

    async fn remove(&self, address: &Address) -> Result<()> {
        let key = address.as_str();
        self.write(|d| {
            d.balances.remove(key);
            d.avatars.remove(key);
            d.aliases.remove(key);
            d.whitelist.remove(key);
            d.pinned.retain(|p| p.address != *address);
            d.history.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_remove_clears_every_category() {
        let store = AddressDataStore::new();
        let a = addr("0x742d35cc6634c0532925a3b844bc9e7595f0beb0");
        let b = addr("0x9858effd232b4033e47d90003d23ec58e053e11f");

        for target in [&a, &b] {
            store.set_balance(target, Decimal::new(1250, 2)).unwrap();
            store.set_avatar(target, "avatar.png").unwrap();
            store.set_alias(target, "alias").unwrap();
            store.add_whitelist(target).unwrap();
            store.pin(target, "HD Key Tree").unwrap();
            store
                .add_history(
                    target,
                    HistoryEntry {
                        tx_hash: "0x01".into(),
                        network: "1".into(),
                        created_at: chrono::Utc::now(),
                    },
                )
                .unwrap();
        }

        store.remove(&a).await.unwrap();

        assert!(!store.has_any_data(&a).unwrap());
        assert!(store.has_any_data(&b).unwrap());
        assert_eq!(store.balance(&b).unwrap(), Some(Decimal::new(1250, 2)));
        assert!(store.is_pinned(&b, "HD Key Tree").unwrap());
    }

    #[test]
    fn test_pin_is_idempotent() {
        let store = AddressDataStore::new();
        let a = addr("0x742d35cc6634c0532925a3b844bc9e7595f0beb0");
        store.pin(&a, "Ledger").unwrap();
        store.pin(&a, "Ledger").unwrap();
        assert_eq!(store.pinned().unwrap().len(), 1);
        store.unpin(&a, "Ledger").unwrap();
        assert!(store.pinned().unwrap().is_empty());
    }
}
