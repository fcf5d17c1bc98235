//! 网络注册表
//!
//! 将网络标识（EIP-155 chain id 的十进制字符串）解析为 RPC 端点与多签服务地址

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::NetworksConfig,
    error::{KeyringError, Result},
};

/// 网络配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// 网络标识（"1"、"56"、"137" ...）
    pub network_id: String,
    /// 链 ID (EIP-155)
    pub chain_id: u64,
    /// 网络名称
    pub name: String,
    /// 原生币符号
    pub symbol: String,
    /// RPC 端点
    pub rpc_url: String,
    /// 多签交易服务地址，None 表示该网络不支持多签
    pub safe_service_url: Option<String>,
    /// 是否为测试网
    pub is_testnet: bool,
}

impl Network {
    pub fn supports_safe(&self) -> bool {
        self.safe_service_url.is_some()
    }
}

/// 网络注册表
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: HashMap<String, Network>,
    order: Vec<String>,
}

impl NetworkRegistry {
    /// 创建预配置的注册表
    pub fn new(config: &NetworksConfig) -> Self {
        let mut registry = Self::default();
        registry.register_default_networks(config);
        registry
    }

    /// 由给定网络列表构造（测试或自定义部署）
    pub fn from_networks(networks: impl IntoIterator<Item = Network>) -> Self {
        let mut registry = Self::default();
        for network in networks {
            registry.register(network);
        }
        registry
    }

    fn register_default_networks(&mut self, config: &NetworksConfig) {
        let defaults: [(u64, &str, &str, &str, &str); 8] = [
            (1, "Ethereum", "ETH", config.eth_rpc_url.as_str(), "mainnet"),
            (56, "BNB Smart Chain", "BNB", config.bsc_rpc_url.as_str(), "bsc"),
            (137, "Polygon", "POL", config.polygon_rpc_url.as_str(), "polygon"),
            (42161, "Arbitrum One", "ETH", config.arbitrum_rpc_url.as_str(), "arbitrum"),
            (10, "Optimism", "ETH", config.optimism_rpc_url.as_str(), "optimism"),
            (43114, "Avalanche C-Chain", "AVAX", config.avalanche_rpc_url.as_str(), "avalanche"),
            (100, "Gnosis Chain", "XDAI", config.gnosis_rpc_url.as_str(), "gnosis-chain"),
            (8453, "Base", "ETH", config.base_rpc_url.as_str(), "base"),
        ];

        for (chain_id, name, symbol, rpc_url, service) in defaults {
            self.register(Network {
                network_id: chain_id.to_string(),
                chain_id,
                name: name.to_string(),
                symbol: symbol.to_string(),
                rpc_url: rpc_url.to_string(),
                safe_service_url: Some(format!("https://safe-transaction-{}.safe.global", service)),
                is_testnet: false,
            });
        }
    }

    /// 注册网络（重复注册覆盖旧值，保持原顺序）
    pub fn register(&mut self, network: Network) {
        if !self.networks.contains_key(&network.network_id) {
            self.order.push(network.network_id.clone());
        }
        self.networks.insert(network.network_id.clone(), network);
    }

    pub fn get(&self, network_id: &str) -> Option<&Network> {
        self.networks.get(network_id)
    }

    pub fn require(&self, network_id: &str) -> Result<&Network> {
        self.get(network_id)
            .ok_or_else(|| KeyringError::Chain(format!("unsupported network {}", network_id)))
    }

    /// 支持多签的网络（注册顺序）
    pub fn safe_networks(&self) -> Vec<&Network> {
        self.order
            .iter()
            .filter_map(|id| self.networks.get(id))
            .filter(|n| n.supports_safe())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_networks() {
        let registry = NetworkRegistry::new(&NetworksConfig::default());
        assert_eq!(registry.len(), 8);

        let eth = registry.get("1").unwrap();
        assert_eq!(eth.chain_id, 1);
        assert_eq!(
            eth.safe_service_url.as_deref(),
            Some("https://safe-transaction-mainnet.safe.global")
        );

        assert!(registry.get("999999").is_none());
        assert!(registry.require("999999").is_err());
    }

    #[test]
    fn test_safe_networks_keep_order() {
        let registry = NetworkRegistry::new(&NetworksConfig::default());
        let ids: Vec<_> = registry
            .safe_networks()
            .iter()
            .map(|n| n.network_id.clone())
            .collect();
        assert_eq!(ids[0], "1");
        assert_eq!(ids[1], "56");
        assert_eq!(ids[2], "137");
    }
}
