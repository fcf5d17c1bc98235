//! 统一错误类型
//!
//! 密钥环编排层的错误分类：
//! - 终止型（重复导入）由调用方转换为 `false`，不会重试
//! - 传输层断开可重试，重试前需要尽力断开设备
//! - 前置条件类错误（找不到密钥环/提案）直接抛给调用方

use thiserror::Error;

/// 密钥环错误码（供上层展示/埋点使用，保持稳定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyringErrorCode {
    DuplicateImport,
    TransportDisconnected,
    InvalidCredential,
    NotFoundKeyring,
    NotFoundGnosisKeyring,
    NoCurrentProposal,
    ThresholdNotMet,
    NetworkFetchFailure,
    InvalidPassword,
    Locked,
    NotOwner,
    InvalidSignature,
    UnsupportedOperation,
    InvalidAddress,
    InvalidState,
    StashEntryNotFound,
    QueueCleared,
    Vault,
    Chain,
    Internal,
}

impl KeyringErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateImport => "DUPLICATE_IMPORT",
            Self::TransportDisconnected => "TRANSPORT_DISCONNECTED",
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::NotFoundKeyring => "NOT_FOUND_KEYRING",
            Self::NotFoundGnosisKeyring => "NOT_FOUND_GNOSIS_KEYRING",
            Self::NoCurrentProposal => "NO_CURRENT_PROPOSAL",
            Self::ThresholdNotMet => "THRESHOLD_NOT_MET",
            Self::NetworkFetchFailure => "NETWORK_FETCH_FAILURE",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::Locked => "LOCKED",
            Self::NotOwner => "NOT_OWNER",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::InvalidState => "INVALID_STATE",
            Self::StashEntryNotFound => "STASH_ENTRY_NOT_FOUND",
            Self::QueueCleared => "QUEUE_CLEARED",
            Self::Vault => "VAULT_ERROR",
            Self::Chain => "CHAIN_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for KeyringErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum KeyringError {
    /// 凭证已导入（终止型、良性）
    #[error("The address you're trying to import is a duplicate: {address}")]
    DuplicateImport { address: String },

    #[error("Hardware transport disconnected: {0}")]
    TransportDisconnected(String),

    /// 私钥或助记词格式错误
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("No keyring found for {0}")]
    NotFoundKeyring(String),

    #[error("No multisig keyring found")]
    NotFoundGnosisKeyring,

    #[error("No multisig proposal in progress")]
    NoCurrentProposal,

    #[error("Threshold not met: {collected} of {threshold} signatures")]
    ThresholdNotMet { collected: usize, threshold: usize },

    #[error("Network {network} fetch failed: {reason}")]
    NetworkFetchFailure { network: String, reason: String },

    #[error("Incorrect password")]
    InvalidPassword,

    #[error("Keyring vault is locked")]
    Locked,

    #[error("{signer} is not an owner of {safe}")]
    NotOwner { signer: String, safe: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Operation {operation} is not supported by {keyring_type} keyring")]
    UnsupportedOperation {
        keyring_type: String,
        operation: String,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stash entry {0} not found")]
    StashEntryNotFound(u64),

    /// 排队中的传输任务被 `clear()` 丢弃
    #[error("Queued hardware task dropped by clear()")]
    QueueCleared,

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = KeyringError> = std::result::Result<T, E>;

impl KeyringError {
    pub fn code(&self) -> KeyringErrorCode {
        match self {
            Self::DuplicateImport { .. } => KeyringErrorCode::DuplicateImport,
            Self::TransportDisconnected(_) => KeyringErrorCode::TransportDisconnected,
            Self::InvalidCredential(_) => KeyringErrorCode::InvalidCredential,
            Self::NotFoundKeyring(_) => KeyringErrorCode::NotFoundKeyring,
            Self::NotFoundGnosisKeyring => KeyringErrorCode::NotFoundGnosisKeyring,
            Self::NoCurrentProposal => KeyringErrorCode::NoCurrentProposal,
            Self::ThresholdNotMet { .. } => KeyringErrorCode::ThresholdNotMet,
            Self::NetworkFetchFailure { .. } => KeyringErrorCode::NetworkFetchFailure,
            Self::InvalidPassword => KeyringErrorCode::InvalidPassword,
            Self::Locked => KeyringErrorCode::Locked,
            Self::NotOwner { .. } => KeyringErrorCode::NotOwner,
            Self::InvalidSignature(_) => KeyringErrorCode::InvalidSignature,
            Self::UnsupportedOperation { .. } => KeyringErrorCode::UnsupportedOperation,
            Self::InvalidAddress(_) => KeyringErrorCode::InvalidAddress,
            Self::InvalidState(_) => KeyringErrorCode::InvalidState,
            Self::StashEntryNotFound(_) => KeyringErrorCode::StashEntryNotFound,
            Self::QueueCleared => KeyringErrorCode::QueueCleared,
            Self::Vault(_) => KeyringErrorCode::Vault,
            Self::Chain(_) => KeyringErrorCode::Chain,
            Self::Internal(_) => KeyringErrorCode::Internal,
        }
    }

    /// 是否为"已导入"类终止错误
    pub fn is_duplicate_import(&self) -> bool {
        matches!(self, Self::DuplicateImport { .. })
    }

    /// 导入重试分类
    ///
    /// 凭证错误、前置条件错误、密码错误都是确定性的，重试没有意义；
    /// 被 `clear()` 丢弃的任务已被新的导入取代，同样不重试。
    /// 传输断开、网络、链上读取及未分类的内部错误按瞬时故障处理。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DuplicateImport { .. }
            | Self::InvalidCredential(_)
            | Self::NotFoundKeyring(_)
            | Self::NotFoundGnosisKeyring
            | Self::NoCurrentProposal
            | Self::ThresholdNotMet { .. }
            | Self::InvalidPassword
            | Self::Locked
            | Self::NotOwner { .. }
            | Self::InvalidSignature(_)
            | Self::UnsupportedOperation { .. }
            | Self::InvalidAddress(_)
            | Self::StashEntryNotFound(_)
            | Self::QueueCleared => false,
            Self::TransportDisconnected(_)
            | Self::NetworkFetchFailure { .. }
            | Self::InvalidState(_)
            | Self::Vault(_)
            | Self::Chain(_)
            | Self::Internal(_) => true,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::TransportDisconnected(_))
    }

    pub fn unsupported(keyring_type: impl ToString, operation: impl ToString) -> Self {
        Self::UnsupportedOperation {
            keyring_type: keyring_type.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn network_fetch(network: impl ToString, reason: impl ToString) -> Self {
        Self::NetworkFetchFailure {
            network: network.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for KeyringError {
    fn from(err: serde_json::Error) -> Self {
        Self::Vault(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_import_is_terminal() {
        let err = KeyringError::DuplicateImport {
            address: "0xabc".into(),
        };
        assert!(err.is_duplicate_import());
        assert!(!err.is_retryable());
        assert_eq!(err.code().as_str(), "DUPLICATE_IMPORT");
    }

    #[test]
    fn test_retry_classification() {
        assert!(KeyringError::TransportDisconnected("usb".into()).is_retryable());
        assert!(!KeyringError::InvalidCredential("bad".into()).is_retryable());
        assert!(!KeyringError::NotFoundGnosisKeyring.is_retryable());
        assert!(!KeyringError::QueueCleared.is_retryable());
        assert!(KeyringError::Internal(anyhow::anyhow!("boom")).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = KeyringError::ThresholdNotMet {
            collected: 1,
            threshold: 2,
        };
        assert_eq!(err.to_string(), "Threshold not met: 1 of 2 signatures");
        assert_eq!(
            KeyringError::unsupported("Watch Address", "sign").to_string(),
            "Operation sign is not supported by Watch Address keyring"
        );
    }
}
