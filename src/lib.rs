//! IronKeyring - 钱包密钥环编排与多签协调
//!
//! 统一管理助记词、私钥、硬件钱包、观察地址与多签账户，
//! 串行化硬件设备访问，并驱动多签提案的签名收集与执行

pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::{ContextDeps, KeyringContext};
pub use error::{KeyringError, KeyringErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::{ContextDeps, KeyringContext},
        domain::{Account, Address, HardwareBrand, KeyringType, ProposalStatus},
        error::{KeyringError, KeyringErrorCode, Result},
        infrastructure::event_bus::{AccountEvent, ImportScene},
        service::{KeyringOp, KeyringRegistry, KeyringTarget},
    };
}
