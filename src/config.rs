//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub stash: StashConfig,
    #[serde(default)]
    pub multisig: MultisigConfig,
    #[serde(default)]
    pub networks: NetworksConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 加密保险库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// 保险库文件路径
    pub path: String,
    /// PBKDF2 迭代次数
    pub kdf_iterations: u32,
    /// bcrypt cost（锁屏密码校验）
    pub bcrypt_cost: u32,
}

/// 硬件钱包配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// importFirstAddress 的最大尝试次数
    pub import_retry_count: u32,
    /// 两次尝试之间的等待（毫秒）
    pub retry_backoff_ms: u64,
}

/// 导入暂存区配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashConfig {
    /// 未提交条目的最长存活时间（秒），0 表示不过期
    pub max_age_secs: u64,
}

/// 多签配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigConfig {
    /// 限速窗口（毫秒）
    pub pending_interval_ms: u64,
    /// 每个窗口内最多启动的请求数
    pub pending_interval_cap: usize,
    /// 并发上限
    pub pending_concurrency: usize,
    /// 远程多签服务请求超时（秒）
    pub request_timeout_secs: u64,
}

/// 各网络 RPC 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworksConfig {
    pub eth_rpc_url: String,
    pub bsc_rpc_url: String,
    pub polygon_rpc_url: String,
    pub arbitrum_rpc_url: String,
    pub optimism_rpc_url: String,
    pub avalanche_rpc_url: String,
    pub gnosis_rpc_url: String,
    pub base_rpc_url: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: std::env::var("VAULT_PATH").unwrap_or_else(|_| "./data/vault.json".into()),
            kdf_iterations: env_or("VAULT_KDF_ITERATIONS", 100_000),
            bcrypt_cost: env_or("VAULT_BCRYPT_COST", bcrypt::DEFAULT_COST),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            import_retry_count: env_or("HARDWARE_IMPORT_RETRY_COUNT", 3),
            retry_backoff_ms: env_or("HARDWARE_RETRY_BACKOFF_MS", 500),
        }
    }
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            max_age_secs: env_or("STASH_MAX_AGE_SECS", 1800),
        }
    }
}

impl Default for MultisigConfig {
    fn default() -> Self {
        Self {
            pending_interval_ms: env_or("SAFE_QUEUE_INTERVAL_MS", 1000),
            pending_interval_cap: env_or("SAFE_QUEUE_INTERVAL_CAP", 5),
            pending_concurrency: env_or("SAFE_QUEUE_CONCURRENCY", 2),
            request_timeout_secs: env_or("SAFE_REQUEST_TIMEOUT_SECS", 15),
        }
    }
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self {
            eth_rpc_url: std::env::var("ETH_RPC_URL")
                .unwrap_or_else(|_| "https://ethereum-rpc.publicnode.com".into()),
            bsc_rpc_url: std::env::var("BSC_RPC_URL")
                .unwrap_or_else(|_| "https://bsc-dataseed.binance.org".into()),
            polygon_rpc_url: std::env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| "https://polygon-rpc.com".into()),
            arbitrum_rpc_url: std::env::var("ARBITRUM_RPC_URL")
                .unwrap_or_else(|_| "https://arb1.arbitrum.io/rpc".into()),
            optimism_rpc_url: std::env::var("OPTIMISM_RPC_URL")
                .unwrap_or_else(|_| "https://mainnet.optimism.io".into()),
            avalanche_rpc_url: std::env::var("AVALANCHE_RPC_URL")
                .unwrap_or_else(|_| "https://api.avax.network/ext/bc/C/rpc".into()),
            gnosis_rpc_url: std::env::var("GNOSIS_RPC_URL")
                .unwrap_or_else(|_| "https://rpc.gnosischain.com".into()),
            base_rpc_url: std::env::var("BASE_RPC_URL")
                .unwrap_or_else(|_| "https://mainnet.base.org".into()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            vault: VaultConfig::default(),
            hardware: HardwareConfig::default(),
            stash: StashConfig::default(),
            multisig: MultisigConfig::default(),
            networks: NetworksConfig::default(),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self::default())
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.vault.kdf_iterations == 0 {
            anyhow::bail!("VAULT_KDF_ITERATIONS must be positive");
        }

        if !(4..=31).contains(&self.vault.bcrypt_cost) {
            anyhow::bail!("VAULT_BCRYPT_COST must be within 4..=31");
        }

        if self.hardware.import_retry_count == 0 {
            anyhow::bail!("HARDWARE_IMPORT_RETRY_COUNT must be at least 1");
        }

        if self.multisig.pending_interval_cap == 0 || self.multisig.pending_concurrency == 0 {
            anyhow::bail!("SAFE_QUEUE_INTERVAL_CAP and SAFE_QUEUE_CONCURRENCY must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().unwrap();
        assert!(config.multisig.pending_interval_cap > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[vault]
path = "/tmp/ironkeyring-vault.json"
kdf_iterations = 2000
bcrypt_cost = 4

[multisig]
pending_interval_ms = 1000
pending_interval_cap = 5
pending_concurrency = 2
request_timeout_secs = 10
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.vault.kdf_iterations, 2000);
        assert_eq!(config.multisig.pending_concurrency, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::from_env().unwrap();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = Config::from_env().unwrap();
        config.multisig.pending_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
