//! 观察地址密钥环：只有地址，没有任何签名能力

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::lock_state;
use crate::{domain::account::Address, error::Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchSerialized {
    pub accounts: Vec<Address>,
}

#[derive(Default)]
pub struct WatchKeyring {
    accounts: Mutex<Vec<Address>>,
}

impl WatchKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(serialized: WatchSerialized) -> Self {
        Self {
            accounts: Mutex::new(serialized.accounts),
        }
    }

    pub fn serialize(&self) -> Result<WatchSerialized> {
        Ok(WatchSerialized {
            accounts: self.accounts()?,
        })
    }

    pub fn accounts(&self) -> Result<Vec<Address>> {
        Ok(lock_state(&self.accounts)?.clone())
    }

    /// 返回新增的地址
    pub fn add_addresses(&self, addresses: &[Address]) -> Result<Vec<Address>> {
        let mut accounts = lock_state(&self.accounts)?;
        let mut added = Vec::new();
        for address in addresses {
            if !accounts.contains(address) {
                accounts.push(address.clone());
                added.push(address.clone());
            }
        }
        Ok(added)
    }

    pub fn remove_account(&self, address: &Address) -> Result<bool> {
        let mut accounts = lock_state(&self.accounts)?;
        let before = accounts.len();
        accounts.retain(|a| a != address);
        Ok(accounts.len() != before)
    }
}
