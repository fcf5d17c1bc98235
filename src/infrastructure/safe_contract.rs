//! Safe 合约链上读写
//!
//! 读取 owner 列表、阈值、版本与 nonce，组装 execTransaction 并广播签名后的交易。
//! 节点不持有任何私钥：执行交易由执行账户所在的密钥环签名。
//! 每个网络懒加载一个 HTTP provider。

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use ethers::{
    contract::abigen,
    providers::{Http, Middleware, Provider},
    types::{transaction::eip2718::TypedTransaction, Bytes, U256},
};

use crate::{
    domain::{account::Address, network::Network, proposal::SafeTransactionData},
    error::{KeyringError, Result},
    infrastructure::log_redact::redact_address,
};

abigen!(
    GnosisSafeContract,
    r#"[
        function getOwners() external view returns (address[])
        function getThreshold() external view returns (uint256)
        function nonce() external view returns (uint256)
        function VERSION() external view returns (string)
        function execTransaction(address to, uint256 value, bytes data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, bytes signatures) external payable returns (bool)
    ]"#
);

#[async_trait]
pub trait SafeChainClient: Send + Sync {
    async fn get_owners(&self, network: &Network, safe: &Address) -> Result<Vec<Address>>;
    async fn get_threshold(&self, network: &Network, safe: &Address) -> Result<usize>;
    async fn get_version(&self, network: &Network, safe: &Address) -> Result<String>;
    async fn get_nonce(&self, network: &Network, safe: &Address) -> Result<U256>;

    /// 组装未签名的 execTransaction 交易，nonce、gas、费用与 chainId 已填好
    async fn prepare_execution(
        &self,
        network: &Network,
        safe: &Address,
        tx: &SafeTransactionData,
        signatures: Bytes,
        executor: &Address,
    ) -> Result<TypedTransaction>;

    /// 广播已签名的交易，返回交易哈希
    async fn send_raw_transaction(&self, network: &Network, raw: Bytes) -> Result<String>;
}

/// ethers 实现
#[derive(Default)]
pub struct EthersSafeClient {
    providers: Mutex<HashMap<String, Arc<Provider<Http>>>>,
}

impl EthersSafeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn provider(&self, network: &Network) -> Result<Arc<Provider<Http>>> {
        let mut providers = self
            .providers
            .lock()
            .map_err(|_| KeyringError::InvalidState("provider cache poisoned".into()))?;

        if let Some(provider) = providers.get(&network.network_id) {
            return Ok(provider.clone());
        }

        let provider = Provider::<Http>::try_from(network.rpc_url.as_str()).map_err(|e| {
            KeyringError::Chain(format!("invalid RPC url for {}: {}", network.network_id, e))
        })?;
        let provider = Arc::new(provider);
        providers.insert(network.network_id.clone(), provider.clone());
        Ok(provider)
    }

    fn contract(
        &self,
        network: &Network,
        safe: &Address,
    ) -> Result<GnosisSafeContract<Provider<Http>>> {
        Ok(GnosisSafeContract::new(safe.to_h160(), self.provider(network)?))
    }
}

fn chain_err(network: &Network, call: &str, err: impl std::fmt::Display) -> KeyringError {
    KeyringError::Chain(format!("{} on {} failed: {}", call, network.network_id, err))
}

#[async_trait]
impl SafeChainClient for EthersSafeClient {
    async fn get_owners(&self, network: &Network, safe: &Address) -> Result<Vec<Address>> {
        let owners = self
            .contract(network, safe)?
            .get_owners()
            .call()
            .await
            .map_err(|e| chain_err(network, "getOwners", e))?;
        Ok(owners.into_iter().map(Address::from_h160).collect())
    }

    async fn get_threshold(&self, network: &Network, safe: &Address) -> Result<usize> {
        let threshold = self
            .contract(network, safe)?
            .get_threshold()
            .call()
            .await
            .map_err(|e| chain_err(network, "getThreshold", e))?;
        Ok(threshold.as_usize())
    }

    async fn get_version(&self, network: &Network, safe: &Address) -> Result<String> {
        self.contract(network, safe)?
            .version()
            .call()
            .await
            .map_err(|e| chain_err(network, "VERSION", e))
    }

    async fn get_nonce(&self, network: &Network, safe: &Address) -> Result<U256> {
        self.contract(network, safe)?
            .nonce()
            .call()
            .await
            .map_err(|e| chain_err(network, "nonce", e))
    }

    async fn prepare_execution(
        &self,
        network: &Network,
        safe: &Address,
        tx: &SafeTransactionData,
        signatures: Bytes,
        executor: &Address,
    ) -> Result<TypedTransaction> {
        let provider = self.provider(network)?;
        let contract = GnosisSafeContract::new(safe.to_h160(), provider.clone());
        let call = contract.exec_transaction(
            tx.to.to_h160(),
            tx.value,
            tx.data.clone(),
            tx.operation.as_u8(),
            tx.safe_tx_gas,
            tx.base_gas,
            tx.gas_price,
            tx.gas_token.to_h160(),
            tx.refund_receiver.to_h160(),
            signatures,
        );

        let mut typed = call.tx;
        typed.set_from(executor.to_h160());
        typed.set_chain_id(network.chain_id);
        provider
            .fill_transaction(&mut typed, None)
            .await
            .map_err(|e| chain_err(network, "execTransaction estimate", e))?;

        tracing::debug!(
            network = %network.network_id,
            safe = %redact_address(safe.as_str()),
            executor = %redact_address(executor.as_str()),
            "Multisig execution prepared"
        );
        Ok(typed)
    }

    async fn send_raw_transaction(&self, network: &Network, raw: Bytes) -> Result<String> {
        let provider = self.provider(network)?;
        let pending = provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| chain_err(network, "sendRawTransaction", e))?;
        let tx_hash = format!("{:?}", pending.tx_hash());

        tracing::info!(
            network = %network.network_id,
            tx_hash = %tx_hash,
            "Signed transaction broadcast"
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(rpc_url: &str) -> Network {
        Network {
            network_id: "1".into(),
            chain_id: 1,
            name: "Ethereum".into(),
            symbol: "ETH".into(),
            rpc_url: rpc_url.into(),
            safe_service_url: None,
            is_testnet: false,
        }
    }

    #[test]
    fn test_provider_is_cached_per_network() {
        let client = EthersSafeClient::new();
        let net = network("http://127.0.0.1:8545");
        let a = client.provider(&net).unwrap();
        let b = client.provider(&net).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalid_rpc_url() {
        let client = EthersSafeClient::new();
        assert!(matches!(
            client.provider(&network("not a url")),
            Err(KeyringError::Chain(_))
        ));
    }
}
