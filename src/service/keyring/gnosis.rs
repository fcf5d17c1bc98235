//! 多签（Safe）密钥环
//!
//! 只记录 Safe 地址及其所在网络，不持有私钥；签名由各 owner 的密钥环完成。

use std::{collections::BTreeMap, sync::Mutex};

use serde::{Deserialize, Serialize};

use super::lock_state;
use crate::{
    domain::account::Address,
    error::{KeyringError, Result},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GnosisSerialized {
    pub accounts: Vec<Address>,
    /// 小写地址 → 网络标识列表
    pub network_ids_map: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct GnosisKeyring {
    state: Mutex<GnosisSerialized>,
}

impl GnosisKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(serialized: GnosisSerialized) -> Self {
        Self {
            state: Mutex::new(serialized),
        }
    }

    pub fn serialize(&self) -> Result<GnosisSerialized> {
        Ok(lock_state(&self.state)?.clone())
    }

    pub fn accounts(&self) -> Result<Vec<Address>> {
        Ok(lock_state(&self.state)?.accounts.clone())
    }

    pub fn contains(&self, address: &Address) -> Result<bool> {
        Ok(lock_state(&self.state)?.accounts.contains(address))
    }

    pub fn add_addresses(&self, addresses: &[Address]) -> Result<Vec<Address>> {
        let mut state = lock_state(&self.state)?;
        let mut added = Vec::new();
        for address in addresses {
            if !state.accounts.contains(address) {
                state.accounts.push(address.clone());
                added.push(address.clone());
            }
        }
        Ok(added)
    }

    pub fn remove_account(&self, address: &Address) -> Result<bool> {
        let mut state = lock_state(&self.state)?;
        let before = state.accounts.len();
        state.accounts.retain(|a| a != address);
        state.network_ids_map.remove(address.as_str());
        Ok(state.accounts.len() != before)
    }

    pub fn set_network_ids(&self, address: &Address, network_ids: Vec<String>) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state
            .network_ids_map
            .insert(address.as_str().to_string(), network_ids);
        Ok(())
    }

    /// 未记录的地址返回 `NotFoundKeyring`
    pub fn get_network_ids(&self, address: &Address) -> Result<Vec<String>> {
        lock_state(&self.state)?
            .network_ids_map
            .get(address.as_str())
            .cloned()
            .ok_or_else(|| KeyringError::NotFoundKeyring(format!("{} is not in keyring", address)))
    }

    /// 记录的网络（可能为空），不存在时返回 None
    pub fn recorded_network_ids(&self, address: &Address) -> Result<Option<Vec<String>>> {
        Ok(lock_state(&self.state)?
            .network_ids_map
            .get(address.as_str())
            .cloned())
    }

    pub fn network_ids_map(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(lock_state(&self.state)?.network_ids_map.clone())
    }
}
