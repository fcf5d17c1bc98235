//! 密钥环
//!
//! 五种凭证来源统一成一个 `Keyring` 枚举，调用方通过封闭的 `KeyringOp`
//! 操作集驱动密钥环；某种密钥环不支持的操作返回 `UnsupportedOperation`。

pub mod gnosis;
pub mod hardware;
pub mod hd;
pub mod simple;
pub mod watch;

use std::{
    ops::Range,
    sync::{Mutex, MutexGuard},
};

use ethers::types::Bytes;
use serde::{Deserialize, Serialize};

pub use gnosis::{GnosisKeyring, GnosisSerialized};
pub use hardware::{
    DeviceEvent, HardwareAccount, HardwareKeyring, HardwareSerialized, HardwareTransport,
    TransportFactories, TransportFactory,
};
pub use hd::{HdKeyring, HdSerialized};
pub use simple::{SimpleKeyring, SimpleSerialized};
pub use watch::{WatchKeyring, WatchSerialized};

use crate::{
    domain::{
        account::{Account, Address, KeyringType},
        derivation::{DerivedAddress, HdPathType},
    },
    error::{KeyringError, Result},
};

pub(crate) fn lock_state<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| KeyringError::InvalidState("keyring state poisoned".into()))
}

/// 紧接在已激活最大索引之后的 `count` 个索引
pub(crate) fn next_index_range(max_active: Option<u32>, count: u32) -> Result<Range<u32>> {
    let overflow = || KeyringError::InvalidState(format!("cannot add {} more accounts", count));
    let next = match max_active {
        Some(max) => max.checked_add(1).ok_or_else(overflow)?,
        None => 0,
    };
    let end = next.checked_add(count).ok_or_else(overflow)?;
    Ok(next..end)
}

/// 密钥环身份：提交暂存区时用于判断"是否已存在"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyringIdentity {
    /// HD：index 0 地址（区分 passphrase）
    Hd(Address),
    Simple(Address),
    /// 单例类型按类型区分
    Singleton(KeyringType),
}

/// 密钥环操作
#[derive(Debug, Clone)]
pub enum KeyringOp {
    GetAddresses { start: u32, end: u32 },
    GetAccounts,
    AddAccounts { count: u32 },
    ActivateIndexes { indexes: Vec<u32> },
    AddAddresses { addresses: Vec<Address> },
    SetHdPath { path_type: HdPathType },
    Unlock,
    IsConnected { address: Address },
    SignHash { address: Address, hash: [u8; 32] },
    SignPersonalMessage { address: Address, message: Vec<u8> },
    SetNetworkIds { address: Address, network_ids: Vec<String> },
    GetNetworkIds { address: Address },
}

impl KeyringOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAddresses { .. } => "getAddresses",
            Self::GetAccounts => "getAccounts",
            Self::AddAccounts { .. } => "addAccounts",
            Self::ActivateIndexes { .. } => "activeAccounts",
            Self::AddAddresses { .. } => "addAddresses",
            Self::SetHdPath { .. } => "setHdPath",
            Self::Unlock => "unlock",
            Self::IsConnected { .. } => "isConnected",
            Self::SignHash { .. } => "signHash",
            Self::SignPersonalMessage { .. } => "signPersonalMessage",
            Self::SetNetworkIds { .. } => "setNetworkIds",
            Self::GetNetworkIds { .. } => "getNetworkIds",
        }
    }

    /// 是否会改变账户列表
    pub fn mutates_accounts(&self) -> bool {
        matches!(
            self,
            Self::AddAccounts { .. } | Self::ActivateIndexes { .. } | Self::AddAddresses { .. }
        )
    }
}

/// 操作结果
#[derive(Debug, Clone, PartialEq)]
pub enum KeyringReply {
    Addresses(Vec<DerivedAddress>),
    Accounts(Vec<Address>),
    Unlocked { device_id: String },
    Connected(bool),
    Signature(Bytes),
    NetworkIds(Vec<String>),
    Done,
}

impl KeyringReply {
    pub fn into_addresses(self) -> Result<Vec<DerivedAddress>> {
        match self {
            Self::Addresses(addresses) => Ok(addresses),
            other => Err(unexpected_reply("addresses", &other)),
        }
    }

    pub fn into_accounts(self) -> Result<Vec<Address>> {
        match self {
            Self::Accounts(accounts) => Ok(accounts),
            other => Err(unexpected_reply("accounts", &other)),
        }
    }

    pub fn into_signature(self) -> Result<Bytes> {
        match self {
            Self::Signature(signature) => Ok(signature),
            other => Err(unexpected_reply("signature", &other)),
        }
    }
}

fn unexpected_reply(expected: &str, reply: &KeyringReply) -> KeyringError {
    KeyringError::InvalidState(format!("expected {} reply, got {:?}", expected, reply))
}

/// 持久化形式（每个密钥环单独加密）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SerializedKeyring {
    Hd(HdSerialized),
    Simple(SimpleSerialized),
    Hardware(HardwareSerialized),
    Watch(WatchSerialized),
    Gnosis(GnosisSerialized),
}

pub enum Keyring {
    Hd(HdKeyring),
    Simple(SimpleKeyring),
    Hardware(HardwareKeyring),
    Watch(WatchKeyring),
    Gnosis(GnosisKeyring),
}

impl Keyring {
    pub fn keyring_type(&self) -> KeyringType {
        match self {
            Self::Hd(_) => KeyringType::Hd,
            Self::Simple(_) => KeyringType::Simple,
            Self::Hardware(k) => k.keyring_type(),
            Self::Watch(_) => KeyringType::Watch,
            Self::Gnosis(_) => KeyringType::Gnosis,
        }
    }

    pub fn brand_name(&self) -> &'static str {
        self.keyring_type().default_brand()
    }

    pub fn accounts(&self) -> Result<Vec<Address>> {
        match self {
            Self::Hd(k) => k.accounts(),
            Self::Simple(k) => k.accounts(),
            Self::Hardware(k) => k.accounts(),
            Self::Watch(k) => k.accounts(),
            Self::Gnosis(k) => k.accounts(),
        }
    }

    /// 账户（带类型与品牌）
    pub fn account_list(&self) -> Result<Vec<Account>> {
        let keyring_type = self.keyring_type();
        let brand = self.brand_name();
        Ok(self
            .accounts()?
            .into_iter()
            .map(|address| Account::new(address, keyring_type, brand))
            .collect())
    }

    pub fn has_account(&self, address: &Address) -> Result<bool> {
        Ok(self.accounts()?.contains(address))
    }

    pub fn remove_account(&self, address: &Address) -> Result<bool> {
        match self {
            Self::Hd(k) => k.remove_account(address),
            Self::Simple(k) => k.remove_account(address),
            Self::Hardware(k) => k.remove_account(address),
            Self::Watch(k) => k.remove_account(address),
            Self::Gnosis(k) => k.remove_account(address),
        }
    }

    pub fn identity(&self) -> Result<KeyringIdentity> {
        match self {
            Self::Hd(k) => k.identity(),
            Self::Simple(k) => k.identity(),
            other => Ok(KeyringIdentity::Singleton(other.keyring_type())),
        }
    }

    pub fn as_hd(&self) -> Option<&HdKeyring> {
        match self {
            Self::Hd(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_hardware(&self) -> Option<&HardwareKeyring> {
        match self {
            Self::Hardware(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_gnosis(&self) -> Option<&GnosisKeyring> {
        match self {
            Self::Gnosis(k) => Some(k),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Result<SerializedKeyring> {
        Ok(match self {
            Self::Hd(k) => SerializedKeyring::Hd(k.serialize()?),
            Self::Simple(k) => SerializedKeyring::Simple(k.serialize()?),
            Self::Hardware(k) => SerializedKeyring::Hardware(k.serialize()?),
            Self::Watch(k) => SerializedKeyring::Watch(k.serialize()?),
            Self::Gnosis(k) => SerializedKeyring::Gnosis(k.serialize()?),
        })
    }

    /// 反序列化；硬件密钥环重新绑定传输工厂
    pub fn restore(serialized: SerializedKeyring, factories: &TransportFactories) -> Result<Self> {
        Ok(match serialized {
            SerializedKeyring::Hd(s) => Self::Hd(HdKeyring::restore(s)?),
            SerializedKeyring::Simple(s) => Self::Simple(SimpleKeyring::restore(s)?),
            SerializedKeyring::Hardware(s) => {
                let factory = factories.get(&s.brand).cloned().ok_or_else(|| {
                    KeyringError::InvalidState(format!("no transport factory for {:?}", s.brand))
                })?;
                Self::Hardware(HardwareKeyring::restore(s, factory)?)
            }
            SerializedKeyring::Watch(s) => Self::Watch(WatchKeyring::restore(s)),
            SerializedKeyring::Gnosis(s) => Self::Gnosis(GnosisKeyring::restore(s)),
        })
    }

    /// 把同一身份的暂存密钥环并入本实例，返回新增地址
    pub fn merge_from(&self, other: &Keyring) -> Result<Vec<Address>> {
        match (self, other) {
            (Self::Hd(target), Self::Hd(source)) => {
                target.activate_indexes(&source.active_indexes()?)
            }
            (Self::Simple(_), Self::Simple(_)) => Ok(Vec::new()),
            (Self::Hardware(target), Self::Hardware(source)) => {
                target.add_known_accounts(source.hardware_accounts()?)
            }
            (Self::Watch(target), Self::Watch(source)) => target.add_addresses(&source.accounts()?),
            (Self::Gnosis(target), Self::Gnosis(source)) => {
                let added = target.add_addresses(&source.accounts()?)?;
                for (address, network_ids) in source.network_ids_map()? {
                    let address = Address::parse(&address)?;
                    target.set_network_ids(&address, network_ids)?;
                }
                Ok(added)
            }
            (target, source) => Err(KeyringError::InvalidState(format!(
                "cannot merge {} into {}",
                source.keyring_type(),
                target.keyring_type()
            ))),
        }
    }

    pub async fn invoke(&self, op: KeyringOp) -> Result<KeyringReply> {
        let name = op.name();
        match (self, op) {
            (_, KeyringOp::GetAccounts) => Ok(KeyringReply::Accounts(self.accounts()?)),

            (Self::Hd(k), KeyringOp::GetAddresses { start, end }) => {
                Ok(KeyringReply::Addresses(k.get_addresses(start, end)?))
            }
            (Self::Simple(k), KeyringOp::GetAddresses { start, end }) => {
                Ok(KeyringReply::Addresses(k.get_addresses(start, end)?))
            }
            (Self::Hardware(k), KeyringOp::GetAddresses { start, end }) => {
                Ok(KeyringReply::Addresses(k.get_addresses(start, end).await?))
            }

            (Self::Hd(k), KeyringOp::AddAccounts { count }) => {
                Ok(KeyringReply::Accounts(k.add_accounts(count)?))
            }
            (Self::Hardware(k), KeyringOp::AddAccounts { count }) => {
                Ok(KeyringReply::Accounts(k.add_accounts(count).await?))
            }
            (Self::Hd(k), KeyringOp::ActivateIndexes { indexes }) => {
                Ok(KeyringReply::Accounts(k.activate_indexes(&indexes)?))
            }
            (Self::Hardware(k), KeyringOp::ActivateIndexes { indexes }) => {
                Ok(KeyringReply::Accounts(k.activate_indexes(&indexes).await?))
            }
            (Self::Watch(k), KeyringOp::AddAddresses { addresses }) => {
                Ok(KeyringReply::Accounts(k.add_addresses(&addresses)?))
            }
            (Self::Gnosis(k), KeyringOp::AddAddresses { addresses }) => {
                Ok(KeyringReply::Accounts(k.add_addresses(&addresses)?))
            }

            (Self::Hardware(k), KeyringOp::SetHdPath { path_type }) => {
                k.set_hd_path_type(path_type)?;
                Ok(KeyringReply::Done)
            }
            (Self::Hardware(k), KeyringOp::Unlock) => Ok(KeyringReply::Unlocked {
                device_id: k.unlock().await?,
            }),
            (Self::Hardware(k), KeyringOp::IsConnected { address }) => {
                Ok(KeyringReply::Connected(k.is_connected(&address)?))
            }

            (Self::Hd(k), KeyringOp::SignHash { address, hash }) => {
                Ok(KeyringReply::Signature(k.sign_hash(&address, &hash)?.into()))
            }
            (Self::Simple(k), KeyringOp::SignHash { address, hash }) => {
                Ok(KeyringReply::Signature(k.sign_hash(&address, &hash)?.into()))
            }
            (Self::Hardware(k), KeyringOp::SignHash { address, hash }) => {
                Ok(KeyringReply::Signature(k.sign_hash(&address, hash).await?.into()))
            }
            (Self::Hd(k), KeyringOp::SignPersonalMessage { address, message }) => Ok(
                KeyringReply::Signature(k.sign_personal_message(&address, &message)?.into()),
            ),
            (Self::Simple(k), KeyringOp::SignPersonalMessage { address, message }) => Ok(
                KeyringReply::Signature(k.sign_personal_message(&address, &message)?.into()),
            ),
            (Self::Hardware(k), KeyringOp::SignPersonalMessage { address, message }) => Ok(
                KeyringReply::Signature(k.sign_personal_message(&address, message).await?.into()),
            ),

            (Self::Gnosis(k), KeyringOp::SetNetworkIds { address, network_ids }) => {
                k.set_network_ids(&address, network_ids)?;
                Ok(KeyringReply::Done)
            }
            (Self::Gnosis(k), KeyringOp::GetNetworkIds { address }) => {
                Ok(KeyringReply::NetworkIds(k.get_network_ids(&address)?))
            }

            (keyring, _) => Err(KeyringError::unsupported(keyring.keyring_type(), name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[tokio::test]
    async fn test_watch_cannot_sign() {
        let keyring = Keyring::Watch(WatchKeyring::new());
        let address = Address::parse("0x742d35cc6634c0532925a3b844bc9e7595f0beb0").unwrap();
        keyring
            .invoke(KeyringOp::AddAddresses {
                addresses: vec![address.clone()],
            })
            .await
            .unwrap();

        let err = keyring
            .invoke(KeyringOp::SignPersonalMessage {
                address,
                message: b"hi".to_vec(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KeyringError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn test_simple_sign_through_invoke() {
        let keyring = Keyring::Simple(SimpleKeyring::new(KEY).unwrap());
        let address = keyring.accounts().unwrap().remove(0);
        let signature = keyring
            .invoke(KeyringOp::SignHash {
                address,
                hash: [7u8; 32],
            })
            .await
            .unwrap()
            .into_signature()
            .unwrap();
        assert_eq!(signature.len(), 65);
    }

    #[test]
    fn test_serialized_round_trip_keeps_type() {
        let keyring = Keyring::Simple(SimpleKeyring::new(KEY).unwrap());
        let json = serde_json::to_string(&keyring.serialize().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"Simple\""));

        let restored =
            Keyring::restore(serde_json::from_str(&json).unwrap(), &TransportFactories::new())
                .unwrap();
        assert_eq!(restored.accounts().unwrap(), keyring.accounts().unwrap());
        assert_eq!(restored.identity().unwrap(), keyring.identity().unwrap());
    }
}
