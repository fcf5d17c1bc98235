use std::sync::Arc;

use crate::{
    config::Config,
    domain::network::NetworkRegistry,
    error::Result,
    infrastructure::{
        address_store::{AddressDataStore, AddressScopedStore},
        event_bus::AccountEventBus,
        safe_api::{SafeServiceClient, SafeTransactionService},
        safe_contract::{EthersSafeClient, SafeChainClient},
        task_pool::RateLimitedPool,
        vault_store::{FileVaultStore, VaultStore},
    },
    service::{
        accounts::AccountService,
        import::ImportService,
        keyring::TransportFactories,
        multisig::MultisigCoordinator,
        registry::KeyringRegistry,
        retry::{RetryConfig, RetryController},
    },
};

/// 外部协作方（平台或测试提供）
pub struct ContextDeps {
    pub vault_store: Arc<dyn VaultStore>,
    pub transport_factories: TransportFactories,
    pub chain: Arc<dyn SafeChainClient>,
    pub safe_service: Arc<dyn SafeTransactionService>,
    pub networks: NetworkRegistry,
    /// 除内置地址数据外需要级联清理的存储
    pub extra_address_stores: Vec<Arc<dyn AddressScopedStore>>,
}

/// 应用上下文
/// 由应用根持有，注册表、暂存区与各服务都从这里取
#[derive(Clone)]
pub struct KeyringContext {
    pub config: Arc<Config>,
    pub events: Arc<AccountEventBus>,
    pub address_data: Arc<AddressDataStore>,
    pub networks: Arc<NetworkRegistry>,
    pub registry: Arc<KeyringRegistry>,
    pub imports: Arc<ImportService>,
    pub accounts: Arc<AccountService>,
    pub multisig: Arc<MultisigCoordinator>,
}

impl KeyringContext {
    pub fn new(config: Config, deps: ContextDeps) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(AccountEventBus::new());
        let address_data = Arc::new(AddressDataStore::new());
        let networks = Arc::new(deps.networks);

        let mut address_stores: Vec<Arc<dyn AddressScopedStore>> = vec![address_data.clone()];
        address_stores.extend(deps.extra_address_stores);

        let registry = Arc::new(KeyringRegistry::new(
            deps.vault_store,
            config.vault.clone(),
            &config.stash,
            deps.transport_factories,
            address_stores,
            events.clone(),
        ));

        let imports = Arc::new(ImportService::new(
            registry.clone(),
            RetryController::new(RetryConfig::from(&config.hardware)),
        ));
        let accounts = Arc::new(AccountService::new(registry.clone(), address_data.clone()));
        let multisig = Arc::new(MultisigCoordinator::new(
            registry.clone(),
            networks.clone(),
            deps.chain,
            deps.safe_service,
            RateLimitedPool::from_config(&config.multisig),
        ));

        Self {
            config,
            events,
            address_data,
            networks,
            registry,
            imports,
            accounts,
            multisig,
        }
    }

    /// 生产依赖：文件保险库、ethers 链上读取、HTTP 多签服务
    pub fn from_config(config: Config, transport_factories: TransportFactories) -> Result<Self> {
        let deps = ContextDeps {
            vault_store: Arc::new(FileVaultStore::new(&config.vault.path)),
            transport_factories,
            chain: Arc::new(EthersSafeClient::new()),
            safe_service: Arc::new(SafeServiceClient::new(&config.multisig)?),
            networks: NetworkRegistry::new(&config.networks),
            extra_address_stores: Vec::new(),
        };
        Ok(Self::new(config, deps))
    }
}
