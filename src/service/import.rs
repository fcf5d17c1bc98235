//! 账户导入服务
//!
//! 组合注册表、暂存区与重试控制器：
//! - 助记词：先进暂存区，由界面预览、选择后 `commit`
//! - 私钥 / 助记词首地址 / 硬件首地址：一步导入，已导入时返回 `None`
//! - 观察地址、多签地址：直接进入对应的单例密钥环

use std::sync::{Arc, Mutex};

use crate::{
    domain::account::{Address, HardwareBrand, KeyringType},
    error::{KeyringError, Result},
    infrastructure::{event_bus::{ImportScene, SubscriptionHandle}, log_redact::redact_address},
    service::{
        keyring::{DeviceEvent, HdKeyring, Keyring, KeyringOp, SimpleKeyring},
        registry::KeyringRegistry,
        retry::RetryController,
    },
};

pub struct ImportService {
    registry: Arc<KeyringRegistry>,
    retry: RetryController,
    device_listeners: Mutex<Vec<SubscriptionHandle>>,
}

impl ImportService {
    pub fn new(registry: Arc<KeyringRegistry>, retry: RetryController) -> Self {
        Self {
            registry,
            retry,
            device_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<KeyringRegistry> {
        &self.registry
    }

    /// 助记词导入第一步：构造 HD 密钥环并暂存，返回暂存 ID
    pub fn import_mnemonic(&self, mnemonic: &str, passphrase: &str) -> Result<u64> {
        let keyring = HdKeyring::new(mnemonic, passphrase)?;
        let id = self.registry.stash(Keyring::Hd(keyring))?;
        tracing::info!(stash_id = id, "Mnemonic keyring stashed");
        Ok(id)
    }

    /// 导入助记词的第一个地址并直接提交
    pub async fn import_mnemonic_first_address(
        &self,
        mnemonic: &str,
        passphrase: &str,
    ) -> Result<Option<Address>> {
        let keyring = HdKeyring::new(mnemonic, passphrase)?;
        let first = keyring.activate_indexes(&[0])?;
        self.commit_new(Keyring::Hd(keyring), KeyringType::Hd, first)
            .await
    }

    pub async fn import_private_key(&self, private_key: &str) -> Result<Option<Address>> {
        let keyring = SimpleKeyring::new(private_key)?;
        let accounts = keyring.accounts()?;
        self.commit_new(Keyring::Simple(keyring), KeyringType::Simple, accounts)
            .await
    }

    async fn commit_new(
        &self,
        keyring: Keyring,
        keyring_type: KeyringType,
        addresses: Vec<Address>,
    ) -> Result<Option<Address>> {
        match self
            .registry
            .check_for_duplicate(keyring_type, &addresses)
            .await
        {
            Err(e) if e.is_duplicate_import() => {
                tracing::info!(keyring_type = %keyring_type, "Credential already imported");
                return Ok(None);
            }
            other => other?,
        }

        let id = self.registry.stash(keyring)?;
        match self.registry.commit(id, true).await {
            Ok(outcome) => Ok(outcome
                .added_accounts
                .into_iter()
                .next()
                .map(|a| a.address)
                .or_else(|| addresses.into_iter().next())),
            Err(e) => {
                let _ = self.registry.discard(id);
                if e.is_duplicate_import() {
                    return Ok(None);
                }
                Err(e)
            }
        }
    }

    /// 硬件钱包导入第一个地址
    ///
    /// 新的导入意图会丢弃队列里尚未开始的旧命令，被丢弃的导入返回
    /// `QueueCleared`；已导入返回 `None`，其它失败按重试上限重试后抛出
    pub async fn import_first_address(
        &self,
        brand: HardwareBrand,
        device_id: &str,
        retry_count: u32,
    ) -> Result<Option<Address>> {
        let keyring_type = brand.keyring_type();
        let keyring = self
            .registry
            .get_or_create_with(keyring_type, |k| self.bind_device_events(k))
            .await?;
        let hardware = keyring
            .as_hardware()
            .ok_or_else(|| KeyringError::InvalidState(format!("{} is not hardware", keyring_type)))?;
        hardware.set_device_id(device_id)?;
        hardware.queue().clear();

        let retry = self.retry.with_attempts(retry_count);
        retry
            .run("importFirstAddress", |attempt| {
                let keyring = keyring.clone();
                let registry = self.registry.clone();
                async move {
                    tracing::debug!(keyring_type = %keyring_type, attempt, "Reading first hardware address");
                    let address = keyring
                        .invoke(KeyringOp::GetAddresses { start: 0, end: 1 })
                        .await?
                        .into_addresses()?
                        .into_iter()
                        .next()
                        .map(|d| d.address)
                        .ok_or_else(|| {
                            KeyringError::InvalidState("device returned no address".into())
                        })?;

                    registry
                        .check_for_duplicate(keyring_type, &[address.clone()])
                        .await?;
                    registry
                        .add_new_accounts(
                            &keyring,
                            KeyringOp::ActivateIndexes { indexes: vec![0] },
                            Some(ImportScene::Hardware),
                        )
                        .await?;

                    tracing::info!(
                        keyring_type = %keyring_type,
                        address = %redact_address(address.as_str()),
                        "Hardware address imported"
                    );
                    Ok::<_, KeyringError>(address)
                }
            })
            .await
    }

    fn bind_device_events(&self, keyring: &Arc<Keyring>) {
        let Some(hardware) = keyring.as_hardware() else {
            return;
        };
        let brand = hardware.brand();
        let handle = hardware.on_device_event(move |event| async move {
            match event {
                DeviceEvent::Connected { device_id } => {
                    tracing::debug!(brand = ?brand, device_id = %device_id, "Device connected");
                }
                DeviceEvent::Disconnected { device_id } => {
                    tracing::info!(brand = ?brand, device_id = %device_id, "Device disconnected");
                }
            }
        });
        if let Ok(mut listeners) = self.device_listeners.lock() {
            listeners.push(handle);
        }
    }

    pub fn device_listener_count(&self) -> usize {
        self.device_listeners
            .lock()
            .map(|l| l.iter().filter(|h| h.is_active()).count())
            .unwrap_or(0)
    }

    /// 观察地址；已存在返回 `None`
    pub async fn import_watch_address(&self, address: &str) -> Result<Option<Address>> {
        let address = Address::parse(address)?;
        match self
            .registry
            .check_for_duplicate(KeyringType::Watch, &[address.clone()])
            .await
        {
            Err(e) if e.is_duplicate_import() => return Ok(None),
            other => other?,
        }

        let keyring = self.registry.get_or_create(KeyringType::Watch).await?;
        self.registry
            .add_new_accounts(
                &keyring,
                KeyringOp::AddAddresses {
                    addresses: vec![address.clone()],
                },
                None,
            )
            .await?;
        Ok(Some(address))
    }

    /// 多签地址连同其所在网络一起导入
    pub async fn import_gnosis_address(
        &self,
        address: &str,
        network_ids: Vec<String>,
    ) -> Result<Option<Address>> {
        let address = Address::parse(address)?;
        match self
            .registry
            .check_for_duplicate(KeyringType::Gnosis, &[address.clone()])
            .await
        {
            Err(e) if e.is_duplicate_import() => return Ok(None),
            other => other?,
        }

        let keyring = self.registry.get_or_create(KeyringType::Gnosis).await?;
        keyring
            .invoke(KeyringOp::SetNetworkIds {
                address: address.clone(),
                network_ids,
            })
            .await?;
        self.registry
            .add_new_accounts(
                &keyring,
                KeyringOp::AddAddresses {
                    addresses: vec![address.clone()],
                },
                None,
            )
            .await?;

        tracing::info!(address = %redact_address(address.as_str()), "Multisig address imported");
        Ok(Some(address))
    }
}
