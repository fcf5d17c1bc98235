//! 账户身份模型
//!
//! `(address, keyring_type, brand_name)` 三元组标识一个签名者，不包含任何密钥材料。
//! 地址比较大小写不敏感：内部统一存储小写形式。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{KeyringError, Result},
    utils::address_validator::AddressValidator,
};

/// EVM 地址（小写规范化存储）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !AddressValidator::validate_evm_address(trimmed) {
            return Err(KeyringError::InvalidAddress(trimmed.to_string()));
        }
        Ok(Self(format!("0x{}", trimmed[2..].to_lowercase())))
    }

    /// 从 20 字节构造
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// 小写形式
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_checksum(&self) -> String {
        AddressValidator::to_checksum(&self.0)
    }

    pub fn to_h160(&self) -> ethers::types::Address {
        let mut bytes = [0u8; 20];
        // 构造时已校验为 40 位 hex
        if let Ok(decoded) = hex::decode(&self.0[2..]) {
            bytes.copy_from_slice(&decoded);
        }
        ethers::types::Address::from(bytes)
    }

    pub fn from_h160(address: ethers::types::Address) -> Self {
        Self::from_bytes(address.as_fixed_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl TryFrom<String> for Address {
    type Error = KeyringError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl std::str::FromStr for Address {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// 硬件钱包厂商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HardwareBrand {
    Ledger,
    Trezor,
    OneKey,
    Keystone,
}

impl HardwareBrand {
    pub const ALL: [HardwareBrand; 4] = [Self::Ledger, Self::Trezor, Self::OneKey, Self::Keystone];

    pub fn keyring_type(&self) -> KeyringType {
        match self {
            Self::Ledger => KeyringType::Ledger,
            Self::Trezor => KeyringType::Trezor,
            Self::OneKey => KeyringType::OneKey,
            Self::Keystone => KeyringType::Keystone,
        }
    }
}

/// 密钥环类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyringType {
    #[serde(rename = "HD Key Tree")]
    Hd,
    #[serde(rename = "Simple Key Pair")]
    Simple,
    #[serde(rename = "Ledger Hardware")]
    Ledger,
    #[serde(rename = "Trezor Hardware")]
    Trezor,
    #[serde(rename = "Onekey Hardware")]
    OneKey,
    #[serde(rename = "QR Hardware Wallet Device")]
    Keystone,
    #[serde(rename = "Watch Address")]
    Watch,
    #[serde(rename = "Gnosis")]
    Gnosis,
    #[serde(rename = "WalletConnect")]
    WalletConnect,
}

impl KeyringType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hd => "HD Key Tree",
            Self::Simple => "Simple Key Pair",
            Self::Ledger => "Ledger Hardware",
            Self::Trezor => "Trezor Hardware",
            Self::OneKey => "Onekey Hardware",
            Self::Keystone => "QR Hardware Wallet Device",
            Self::Watch => "Watch Address",
            Self::Gnosis => "Gnosis",
            Self::WalletConnect => "WalletConnect",
        }
    }

    pub fn hardware_brand(&self) -> Option<HardwareBrand> {
        match self {
            Self::Ledger => Some(HardwareBrand::Ledger),
            Self::Trezor => Some(HardwareBrand::Trezor),
            Self::OneKey => Some(HardwareBrand::OneKey),
            Self::Keystone => Some(HardwareBrand::Keystone),
            _ => None,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.hardware_brand().is_some()
    }

    /// 每种类型在注册表中只允许一个实例
    pub fn is_singleton(&self) -> bool {
        !matches!(self, Self::Hd | Self::Simple)
    }

    /// 默认品牌名（与类型名一致）
    pub fn default_brand(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for KeyringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 账户
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    pub brand_name: String,
}

impl Account {
    pub fn new(address: Address, keyring_type: KeyringType, brand_name: impl Into<String>) -> Self {
        Self {
            address,
            keyring_type,
            brand_name: brand_name.into(),
        }
    }

    /// 品牌名默认等于类型名
    pub fn with_default_brand(address: Address, keyring_type: KeyringType) -> Self {
        Self::new(address, keyring_type, keyring_type.default_brand())
    }

    /// 唯一性键 `(lowercase address, type, brand)`
    pub fn identity(&self) -> (String, KeyringType, String) {
        (
            self.address.as_str().to_string(),
            self.keyring_type,
            self.brand_name.clone(),
        )
    }

    /// 展示去重键 `(lowercase address, type)`
    pub fn display_key(&self) -> (String, KeyringType) {
        (self.address.as_str().to_string(), self.keyring_type)
    }

    pub fn is_mine(&self) -> bool {
        is_my_account(self.keyring_type)
    }

    pub fn is_hardware(&self) -> bool {
        is_hardware_account(self.keyring_type)
    }

    pub fn is_directly_signable(&self) -> bool {
        is_directly_signable_account(self.keyring_type)
    }

    pub fn classify(&self) -> AccountClass {
        classify(self)
    }
}

/// 分类谓词结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClass {
    pub mine: bool,
    pub hardware: bool,
    pub directly_signable: bool,
}

/// 观察钱包、多签、WalletConnect 中继都不算"我的"
pub fn is_my_account(keyring_type: KeyringType) -> bool {
    !matches!(
        keyring_type,
        KeyringType::Watch | KeyringType::Gnosis | KeyringType::WalletConnect
    )
}

pub fn is_hardware_account(keyring_type: KeyringType) -> bool {
    keyring_type.is_hardware()
}

/// 本地持有软件密钥，无需外部设备或中继
pub fn is_directly_signable_account(keyring_type: KeyringType) -> bool {
    matches!(keyring_type, KeyringType::Hd | KeyringType::Simple)
}

pub fn classify(account: &Account) -> AccountClass {
    AccountClass {
        mine: is_my_account(account.keyring_type),
        hardware: is_hardware_account(account.keyring_type),
        directly_signable: is_directly_signable_account(account.keyring_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_case_insensitive() {
        let a = Address::parse("0x9858EfFD232B4033E47d90003D23EC58E053e11f").unwrap();
        let b = Address::parse("0x9858effd232b4033e47d90003d23ec58e053e11f").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0x9858effd232b4033e47d90003d23ec58e053e11f");
        assert_eq!(a.to_string(), "0x9858EfFD232B4033E47d90003D23EC58E053e11f");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("hello").is_err());
    }

    #[test]
    fn test_classify() {
        let addr = Address::parse("0x742d35cc6634c0532925a3b844bc9e7595f0beb0").unwrap();

        let hd = Account::with_default_brand(addr.clone(), KeyringType::Hd);
        assert_eq!(
            hd.classify(),
            AccountClass {
                mine: true,
                hardware: false,
                directly_signable: true
            }
        );

        let ledger = Account::new(addr.clone(), KeyringType::Ledger, "Ledger");
        assert!(ledger.is_mine());
        assert!(ledger.is_hardware());
        assert!(!ledger.is_directly_signable());

        for t in [KeyringType::Watch, KeyringType::Gnosis, KeyringType::WalletConnect] {
            let acc = Account::with_default_brand(addr.clone(), t);
            assert!(!acc.is_mine());
            assert!(!acc.is_directly_signable());
        }
    }

    #[test]
    fn test_account_serde_shape() {
        let addr = Address::parse("0x742d35cc6634c0532925a3b844bc9e7595f0beb0").unwrap();
        let acc = Account::with_default_brand(addr, KeyringType::Hd);
        let json = serde_json::to_value(&acc).unwrap();
        assert_eq!(json["type"], "HD Key Tree");
        assert_eq!(json["brandName"], "HD Key Tree");
        assert_eq!(json["address"], "0x742d35cc6634c0532925a3b844bc9e7595f0beb0");
    }
}
