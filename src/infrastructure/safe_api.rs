//! 多签交易服务客户端
//!
//! 远程 Safe Transaction Service（每个网络一个实例）的 HTTP API：
//! 待执行交易、待确认消息的查询，以及提案/签名的上报。

use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::{
    config::MultisigConfig,
    domain::{account::Address, network::Network},
    error::{KeyringError, Result},
};

/// 分页响应
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

/// 单个 owner 的确认
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeConfirmation {
    pub owner: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub submission_date: Option<String>,
}

/// 待执行的多签交易
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransactionItem {
    pub safe: String,
    pub to: String,
    pub value: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub operation: u8,
    pub nonce: u64,
    pub safe_tx_hash: String,
    #[serde(default)]
    pub confirmations_required: Option<u64>,
    #[serde(default)]
    pub confirmations: Vec<SafeConfirmation>,
    #[serde(default)]
    pub is_executed: bool,
    #[serde(default)]
    pub submission_date: Option<String>,
}

/// 多签消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeMessageItem {
    pub message_hash: String,
    /// 文本或 EIP-712 结构
    pub message: serde_json::Value,
    #[serde(default)]
    pub confirmations: Vec<SafeConfirmation>,
    #[serde(default)]
    pub prepared_signature: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// 上报交易提案的请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeTransactionRequest {
    pub to: String,
    pub value: String,
    pub data: Option<String>,
    pub operation: u8,
    pub safe_tx_gas: String,
    pub base_gas: String,
    pub gas_price: String,
    pub gas_token: String,
    pub refund_receiver: String,
    pub nonce: String,
    pub contract_transaction_hash: String,
    pub sender: String,
    pub signature: String,
    pub origin: Option<String>,
}

/// 上报消息的请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeMessageRequest {
    pub message: String,
    pub signature: String,
}

#[async_trait]
pub trait SafeTransactionService: Send + Sync {
    /// nonce >= `current_nonce` 且未执行的交易
    async fn pending_transactions(
        &self,
        network: &Network,
        safe: &Address,
        current_nonce: U256,
    ) -> Result<Vec<SafeTransactionItem>>;

    async fn messages(&self, network: &Network, safe: &Address) -> Result<Vec<SafeMessageItem>>;

    async fn propose_transaction(
        &self,
        network: &Network,
        safe: &Address,
        request: &ProposeTransactionRequest,
    ) -> Result<()>;

    async fn propose_message(
        &self,
        network: &Network,
        safe: &Address,
        request: &ProposeMessageRequest,
    ) -> Result<()>;

    async fn add_message_signature(
        &self,
        network: &Network,
        message_hash: &str,
        signature: &str,
    ) -> Result<()>;
}

/// reqwest 实现
pub struct SafeServiceClient {
    client: reqwest::Client,
}

impl SafeServiceClient {
    pub fn new(config: &MultisigConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| KeyringError::Internal(anyhow::anyhow!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn base_url<'a>(&self, network: &'a Network) -> Result<&'a str> {
        network
            .safe_service_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| {
                KeyringError::network_fetch(&network.network_id, "multisig service unavailable")
            })
    }

    async fn get_page<T>(&self, network: &Network, url: String) -> Result<Page<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| KeyringError::network_fetch(&network.network_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(network = %network.network_id, %status, body = %body, "Safe service returned error");
            return Err(KeyringError::network_fetch(
                &network.network_id,
                format!("HTTP {}", status),
            ));
        }

        response
            .json::<Page<T>>()
            .await
            .map_err(|e| KeyringError::network_fetch(&network.network_id, e.to_string()))
    }

    async fn post_json<B: Serialize + Sync>(&self, network: &Network, url: String, body: &B) -> Result<()> {
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| KeyringError::network_fetch(&network.network_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(network = %network.network_id, %status, body = %body, "Safe service rejected request");
            return Err(KeyringError::network_fetch(
                &network.network_id,
                format!("HTTP {}", status),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SafeTransactionService for SafeServiceClient {
    async fn pending_transactions(
        &self,
        network: &Network,
        safe: &Address,
        current_nonce: U256,
    ) -> Result<Vec<SafeTransactionItem>> {
        let url = format!(
            "{}/api/v1/safes/{}/multisig-transactions/?executed=false&nonce__gte={}",
            self.base_url(network)?,
            safe.to_checksum(),
            current_nonce
        );
        let page = self.get_page::<SafeTransactionItem>(network, url).await?;
        Ok(page.results)
    }

    async fn messages(&self, network: &Network, safe: &Address) -> Result<Vec<SafeMessageItem>> {
        let url = format!(
            "{}/api/v1/safes/{}/messages/",
            self.base_url(network)?,
            safe.to_checksum()
        );
        let page = self.get_page::<SafeMessageItem>(network, url).await?;
        Ok(page.results)
    }

    async fn propose_transaction(
        &self,
        network: &Network,
        safe: &Address,
        request: &ProposeTransactionRequest,
    ) -> Result<()> {
        let url = format!(
            "{}/api/v1/safes/{}/multisig-transactions/",
            self.base_url(network)?,
            safe.to_checksum()
        );
        self.post_json(network, url, request).await?;
        tracing::info!(
            network = %network.network_id,
            safe_tx_hash = %request.contract_transaction_hash,
            "Multisig transaction proposed"
        );
        Ok(())
    }

    async fn propose_message(
        &self,
        network: &Network,
        safe: &Address,
        request: &ProposeMessageRequest,
    ) -> Result<()> {
        let url = format!(
            "{}/api/v1/safes/{}/messages/",
            self.base_url(network)?,
            safe.to_checksum()
        );
        self.post_json(network, url, request).await
    }

    async fn add_message_signature(
        &self,
        network: &Network,
        message_hash: &str,
        signature: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/api/v1/messages/{}/signatures/",
            self.base_url(network)?,
            message_hash
        );
        self.post_json(network, url, &serde_json::json!({ "signature": signature }))
            .await
    }
}
