//! Domain 模块
//!
//! 纯值类型：账户身份、网络、派生与多签提案

pub mod account;
pub mod derivation;
pub mod network;
pub mod proposal;

// 重新导出常用类型
pub use account::{classify, Account, AccountClass, Address, HardwareBrand, KeyringType};
pub use derivation::{DerivedAddress, HdPathType};
pub use network::{Network, NetworkRegistry};
pub use proposal::{
    MultisigProposal, ProposalPayload, ProposalStatus, SafeMessage, SafeOperation,
    SafeTransactionData,
};
