//! 多签提案模型
//!
//! 状态机 Idle → Built → Collecting → Ready → Executing → Executed/Failed，
//! 以及 Safe 合约的 EIP-712 哈希与签名打包规则。

use std::{collections::BTreeMap, fmt};

use ethers::{
    abi::{encode, Token},
    types::{Bytes, U256},
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::domain::{account::Address, derivation::hash_personal_message, derivation::keccak256};

static DOMAIN_TYPEHASH: Lazy<[u8; 32]> =
    Lazy::new(|| keccak256(b"EIP712Domain(uint256 chainId,address verifyingContract)"));

/// 1.3.0 之前的合约 domain 不含 chainId
static LEGACY_DOMAIN_TYPEHASH: Lazy<[u8; 32]> =
    Lazy::new(|| keccak256(b"EIP712Domain(address verifyingContract)"));

static SAFE_TX_TYPEHASH: Lazy<[u8; 32]> = Lazy::new(|| {
    keccak256(
        b"SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)",
    )
});

static SAFE_MSG_TYPEHASH: Lazy<[u8; 32]> = Lazy::new(|| keccak256(b"SafeMessage(bytes message)"));

/// 多签提案状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// 无提案
    Idle,
    /// 已构建，尚无签名
    Built,
    /// 收集签名中
    Collecting,
    /// 签名数已达阈值
    Ready,
    /// 执行交易已提交
    Executing,
    /// 已执行
    Executed,
    /// 执行失败（签名保留，可重试执行）
    Failed,
}

impl ProposalStatus {
    /// 是否允许追加签名
    pub fn accepts_signatures(&self) -> bool {
        matches!(self, Self::Built | Self::Collecting | Self::Ready)
    }

    /// 验证状态转换合法性
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use ProposalStatus::*;

        match (self, target) {
            // clear() 可从任意状态回到 Idle
            (_, Idle) => true,

            (Idle, Built) => true,

            // 首个签名即可能满足阈值（threshold = 1）
            (Built, Collecting) | (Built, Ready) => true,
            (Collecting, Collecting) | (Collecting, Ready) => true,
            (Ready, Ready) | (Ready, Executing) => true,

            (Executing, Executed) | (Executing, Failed) => true,

            // 执行失败后仅重试执行
            (Failed, Executing) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Built => "built",
            Self::Collecting => "collecting",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SafeOperation {
    #[default]
    Call,
    DelegateCall,
}

impl SafeOperation {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Call => 0,
            Self::DelegateCall => 1,
        }
    }
}

/// Safe 交易数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransactionData {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: SafeOperation,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: U256,
}

impl SafeTransactionData {
    /// 普通调用，gas 退款字段全部置零
    pub fn call(to: Address, value: U256, data: Bytes, nonce: U256) -> Self {
        Self {
            to,
            value,
            data,
            operation: SafeOperation::Call,
            safe_tx_gas: U256::zero(),
            base_gas: U256::zero(),
            gas_price: U256::zero(),
            gas_token: zero_address(),
            refund_receiver: zero_address(),
            nonce,
        }
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        keccak256(&encode(&[
            Token::FixedBytes(SAFE_TX_TYPEHASH.to_vec()),
            Token::Address(self.to.to_h160()),
            Token::Uint(self.value),
            Token::FixedBytes(keccak256(&self.data).to_vec()),
            Token::Uint(U256::from(self.operation.as_u8())),
            Token::Uint(self.safe_tx_gas),
            Token::Uint(self.base_gas),
            Token::Uint(self.gas_price),
            Token::Address(self.gas_token.to_h160()),
            Token::Address(self.refund_receiver.to_h160()),
            Token::Uint(self.nonce),
        ]))
    }
}

/// Safe 消息（EIP-191 文本）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeMessage {
    pub message: String,
}

impl SafeMessage {
    pub fn message_hash(&self) -> [u8; 32] {
        hash_personal_message(self.message.as_bytes())
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        keccak256(&encode(&[
            Token::FixedBytes(SAFE_MSG_TYPEHASH.to_vec()),
            Token::FixedBytes(keccak256(&self.message_hash()).to_vec()),
        ]))
    }
}

/// 提案载荷：交易或消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ProposalPayload {
    Transaction(SafeTransactionData),
    Message(SafeMessage),
}

impl ProposalPayload {
    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message(_))
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        match self {
            Self::Transaction(tx) => tx.struct_hash(),
            Self::Message(msg) => msg.struct_hash(),
        }
    }
}

pub fn zero_address() -> Address {
    Address::from_bytes(&[0u8; 20])
}

/// 解析 "1.3.0" / "1.3.0+L2" 形式的版本号
pub fn parse_safe_version(version: &str) -> (u32, u32, u32) {
    let core = version.split(['+', '-']).next().unwrap_or_default();
    let mut parts = core.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Safe 合约 EIP-712 domain separator
pub fn domain_separator(version: &str, chain_id: u64, safe: &Address) -> [u8; 32] {
    if parse_safe_version(version) >= (1, 3, 0) {
        keccak256(&encode(&[
            Token::FixedBytes(DOMAIN_TYPEHASH.to_vec()),
            Token::Uint(U256::from(chain_id)),
            Token::Address(safe.to_h160()),
        ]))
    } else {
        keccak256(&encode(&[
            Token::FixedBytes(LEGACY_DOMAIN_TYPEHASH.to_vec()),
            Token::Address(safe.to_h160()),
        ]))
    }
}

/// 提案哈希 = keccak256(0x19 0x01 || domainSeparator || structHash)
pub fn proposal_hash(
    payload: &ProposalPayload,
    version: &str,
    chain_id: u64,
    safe: &Address,
) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(&domain_separator(version, chain_id, safe));
    preimage.extend_from_slice(&payload.struct_hash());
    keccak256(&preimage)
}

/// 按签名者地址升序拼接签名（Safe 合约要求）
pub fn pack_signatures(signatures: &BTreeMap<Address, Bytes>) -> Bytes {
    let mut packed = Vec::with_capacity(signatures.len() * 65);
    for signature in signatures.values() {
        packed.extend_from_slice(signature);
    }
    Bytes::from(packed)
}

/// 多签提案
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigProposal {
    pub target_account_address: Address,
    pub network: String,
    pub version: String,
    pub payload: ProposalPayload,
    pub proposal_hash: [u8; 32],
    /// 签名者 → 签名（BTreeMap 保证地址升序）
    pub signatures: BTreeMap<Address, Bytes>,
    /// 构建时读取的阈值（仅展示用，执行前会重新读取）
    pub threshold: usize,
    pub status: ProposalStatus,
    pub execution_tx_hash: Option<String>,
}

impl MultisigProposal {
    pub fn proposal_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.proposal_hash))
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn packed_signatures(&self) -> Bytes {
        pack_signatures(&self.signatures)
    }
}
