//! 硬件钱包密钥环
//!
//! Ledger / Trezor / OneKey / Keystone 共用一套实现，差异由平台侧的
//! `TransportFactory` 吸收。每条传输命令都经过本密钥环的 `TransportQueue`，
//! 保证同一设备任意时刻只有一个在途命令。

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{lock_state, next_index_range};
use crate::{
    domain::{
        account::{Address, HardwareBrand, KeyringType},
        derivation::{DerivedAddress, HdPathType},
    },
    error::{KeyringError, Result},
    infrastructure::{
        event_bus::{spawn_listener, SubscriptionHandle},
        log_redact::redact_address,
        transport_queue::TransportQueue,
    },
};

const DEVICE_EVENT_CAPACITY: usize = 32;

/// 设备传输通道（由平台实现：BLE / USB / QR）
#[async_trait]
pub trait HardwareTransport: Send + Sync {
    async fn get_address(&self, hd_path: &str) -> Result<Address>;
    async fn sign_hash(&self, hd_path: &str, hash: &[u8; 32]) -> Result<Vec<u8>>;
    async fn sign_personal_message(&self, hd_path: &str, message: &[u8]) -> Result<Vec<u8>>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// 按设备 ID 打开传输通道
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, device_id: &str) -> Result<Arc<dyn HardwareTransport>>;
}

pub type TransportFactories = HashMap<HardwareBrand, Arc<dyn TransportFactory>>;

/// 设备事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected { device_id: String },
    Disconnected { device_id: String },
}

/// 设备会话
pub struct DeviceSession {
    pub device_id: String,
    transport: Arc<dyn HardwareTransport>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareAccount {
    pub address: Address,
    /// 派生索引（从 0 开始）
    pub index: u32,
    pub hd_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSerialized {
    pub brand: HardwareBrand,
    pub device_id: Option<String>,
    #[serde(default)]
    pub hd_path_type: HdPathType,
    pub accounts: Vec<HardwareAccount>,
}

struct HardwareState {
    device_id: Option<String>,
    path_type: HdPathType,
    accounts: Vec<HardwareAccount>,
    /// 已读取的地址，按 (设备, 路径类型, 索引) 缓存
    cache: HashMap<(String, HdPathType, u32), Address>,
}

pub struct HardwareKeyring {
    brand: HardwareBrand,
    queue: TransportQueue,
    factory: Arc<dyn TransportFactory>,
    session: Mutex<Option<DeviceSession>>,
    state: Mutex<HardwareState>,
    events: broadcast::Sender<DeviceEvent>,
}

impl HardwareKeyring {
    pub fn new(brand: HardwareBrand, factory: Arc<dyn TransportFactory>) -> Self {
        let (events, _) = broadcast::channel(DEVICE_EVENT_CAPACITY);
        Self {
            brand,
            queue: TransportQueue::new(brand.keyring_type().as_str()),
            factory,
            session: Mutex::new(None),
            state: Mutex::new(HardwareState {
                device_id: None,
                path_type: HdPathType::default(),
                accounts: Vec::new(),
                cache: HashMap::new(),
            }),
            events,
        }
    }

    pub fn restore(serialized: HardwareSerialized, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let keyring = Self::new(serialized.brand, factory);
        {
            let mut state = lock_state(&keyring.state)?;
            state.device_id = serialized.device_id;
            state.path_type = serialized.hd_path_type;
            state.accounts = serialized.accounts;
        }
        Ok(keyring)
    }

    pub fn serialize(&self) -> Result<HardwareSerialized> {
        let state = lock_state(&self.state)?;
        Ok(HardwareSerialized {
            brand: self.brand,
            device_id: state.device_id.clone(),
            hd_path_type: state.path_type,
            accounts: state.accounts.clone(),
        })
    }

    pub fn brand(&self) -> HardwareBrand {
        self.brand
    }

    pub fn keyring_type(&self) -> KeyringType {
        self.brand.keyring_type()
    }

    pub fn queue(&self) -> &TransportQueue {
        &self.queue
    }

    pub fn device_id(&self) -> Result<Option<String>> {
        Ok(lock_state(&self.state)?.device_id.clone())
    }

    /// 选择设备；切换设备后旧会话在下一条命令时被替换
    pub fn set_device_id(&self, device_id: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        let mut state = lock_state(&self.state)?;
        if state.device_id.as_deref() != Some(device_id.as_str()) {
            tracing::debug!(brand = ?self.brand, device_id = %device_id, "Hardware device selected");
        }
        state.device_id = Some(device_id);
        Ok(())
    }

    fn selected_device(&self) -> Result<String> {
        lock_state(&self.state)?.device_id.clone().ok_or_else(|| {
            KeyringError::TransportDisconnected(format!("no {:?} device selected", self.brand))
        })
    }

    pub fn set_hd_path_type(&self, path_type: HdPathType) -> Result<()> {
        lock_state(&self.state)?.path_type = path_type;
        Ok(())
    }

    pub fn last_used(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(lock_state(&self.session)?.as_ref().map(|s| s.last_used))
    }

    /// 注册设备事件监听，丢弃返回的句柄即退订
    pub fn on_device_event<F, Fut>(&self, f: F) -> SubscriptionHandle
    where
        F: FnMut(DeviceEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        spawn_listener(self.events.subscribe(), f)
    }

    pub fn accounts(&self) -> Result<Vec<Address>> {
        Ok(lock_state(&self.state)?
            .accounts
            .iter()
            .map(|a| a.address.clone())
            .collect())
    }

    pub fn hardware_accounts(&self) -> Result<Vec<HardwareAccount>> {
        Ok(lock_state(&self.state)?.accounts.clone())
    }

    pub fn remove_account(&self, address: &Address) -> Result<bool> {
        let mut state = lock_state(&self.state)?;
        let before = state.accounts.len();
        state.accounts.retain(|a| a.address != *address);
        Ok(state.accounts.len() != before)
    }

    fn current_transport(&self, device_id: &str) -> Result<Option<Arc<dyn HardwareTransport>>> {
        let session = lock_state(&self.session)?;
        Ok(session
            .as_ref()
            .filter(|s| s.device_id == device_id && s.transport.is_connected())
            .map(|s| s.transport.clone()))
    }

    /// 复用或重新打开会话，只在队列任务内调用
    async fn ensure_transport(&self) -> Result<Arc<dyn HardwareTransport>> {
        let device_id = self.selected_device()?;

        if let Some(transport) = self.current_transport(&device_id)? {
            return Ok(transport);
        }

        // 旧会话（设备已切换或已断开）先关闭
        self.teardown_session().await;

        let transport = self.factory.open(&device_id).await?;
        *lock_state(&self.session)? = Some(DeviceSession {
            device_id: device_id.clone(),
            transport: transport.clone(),
            last_used: Utc::now(),
        });
        tracing::info!(brand = ?self.brand, device_id = %device_id, "Hardware device connected");
        let _ = self.events.send(DeviceEvent::Connected { device_id });
        Ok(transport)
    }

    async fn teardown_session(&self) {
        let session = match lock_state(&self.session) {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(session) = session else {
            return;
        };

        if let Err(e) = session.transport.disconnect().await {
            tracing::warn!(
                brand = ?self.brand,
                device_id = %session.device_id,
                error = %e,
                "Best-effort device disconnect failed"
            );
        }
        let _ = self.events.send(DeviceEvent::Disconnected {
            device_id: session.device_id,
        });
    }

    /// 经队列执行一条传输命令；传输失败时先断开会话再返回错误
    async fn run_command<T, F, Fut>(&self, command: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn HardwareTransport>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.queue
            .run(|| async move {
                let result = match self.ensure_transport().await {
                    Ok(transport) => f(transport).await,
                    Err(e) => Err(e),
                };

                match &result {
                    Ok(_) => {
                        if let Ok(mut session) = lock_state(&self.session) {
                            if let Some(session) = session.as_mut() {
                                session.last_used = Utc::now();
                            }
                        }
                    }
                    Err(e) if e.is_transport_failure() => {
                        tracing::warn!(
                            brand = ?self.brand,
                            command,
                            error = %e,
                            "Transport failure, disconnecting device"
                        );
                        self.teardown_session().await;
                    }
                    Err(_) => {}
                }
                result
            })
            .await
    }

    async fn address_at(&self, index: u32) -> Result<(Address, String)> {
        let device_id = self.selected_device()?;
        let (path_type, cached) = {
            let state = lock_state(&self.state)?;
            let key = (device_id.clone(), state.path_type, index);
            (state.path_type, state.cache.get(&key).cloned())
        };
        let hd_path = path_type.path(index);
        if let Some(address) = cached {
            return Ok((address, hd_path));
        }

        let path = hd_path.clone();
        let address = self
            .run_command("getAddress", move |transport| async move {
                transport.get_address(&path).await
            })
            .await?;

        // 读取期间设备被切换时结果不入缓存
        let mut state = lock_state(&self.state)?;
        if state.device_id.as_deref() == Some(device_id.as_str()) {
            state.cache.insert((device_id, path_type, index), address.clone());
        }
        Ok((address, hd_path))
    }

    /// 读取 `[start, end)` 区间的地址，index 从 1 开始
    pub async fn get_addresses(&self, start: u32, end: u32) -> Result<Vec<DerivedAddress>> {
        let mut addresses = Vec::with_capacity(end.saturating_sub(start) as usize);
        for i in start..end {
            let (address, _) = self.address_at(i).await?;
            addresses.push(DerivedAddress {
                address,
                index: i + 1,
            });
        }
        Ok(addresses)
    }

    pub async fn activate_indexes(&self, indexes: &[u32]) -> Result<Vec<Address>> {
        let mut added = Vec::new();
        for &index in indexes {
            let (address, hd_path) = self.address_at(index).await?;
            let mut state = lock_state(&self.state)?;
            if state.accounts.iter().any(|a| a.address == address) {
                continue;
            }
            state.accounts.push(HardwareAccount {
                address: address.clone(),
                index,
                hd_path,
            });
            added.push(address);
        }
        Ok(added)
    }

    /// 并入已读取过地址的账户（不访问设备）
    pub fn add_known_accounts(&self, accounts: Vec<HardwareAccount>) -> Result<Vec<Address>> {
        let mut state = lock_state(&self.state)?;
        let mut added = Vec::new();
        for account in accounts {
            if state.accounts.iter().any(|a| a.address == account.address) {
                continue;
            }
            added.push(account.address.clone());
            state.accounts.push(account);
        }
        Ok(added)
    }

    pub async fn add_accounts(&self, count: u32) -> Result<Vec<Address>> {
        let max_active = lock_state(&self.state)?
            .accounts
            .iter()
            .map(|a| a.index)
            .max();
        let indexes: Vec<u32> = next_index_range(max_active, count)?.collect();
        self.activate_indexes(&indexes).await
    }

    /// 建立会话，返回设备 ID
    pub async fn unlock(&self) -> Result<String> {
        self.run_command("unlock", |_| async { Ok(()) }).await?;
        self.device_id()?
            .ok_or_else(|| KeyringError::TransportDisconnected("no device selected".into()))
    }

    pub fn is_connected(&self, address: &Address) -> Result<bool> {
        let owns = lock_state(&self.state)?
            .accounts
            .iter()
            .any(|a| a.address == *address);
        if !owns {
            return Ok(false);
        }
        Ok(lock_state(&self.session)?
            .as_ref()
            .map(|s| s.transport.is_connected())
            .unwrap_or(false))
    }

    fn hd_path_of(&self, address: &Address) -> Result<String> {
        lock_state(&self.state)?
            .accounts
            .iter()
            .find(|a| a.address == *address)
            .map(|a| a.hd_path.clone())
            .ok_or_else(|| KeyringError::NotFoundKeyring(address.to_string()))
    }

    pub async fn sign_hash(&self, address: &Address, hash: [u8; 32]) -> Result<Vec<u8>> {
        let hd_path = self.hd_path_of(address)?;
        tracing::debug!(brand = ?self.brand, address = %redact_address(address.as_str()), "Signing hash on device");
        self.run_command("signHash", move |transport| async move {
            transport.sign_hash(&hd_path, &hash).await
        })
        .await
    }

    pub async fn sign_personal_message(&self, address: &Address, message: Vec<u8>) -> Result<Vec<u8>> {
        let hd_path = self.hd_path_of(address)?;
        self.run_command("signPersonalMessage", move |transport| async move {
            transport.sign_personal_message(&hd_path, &message).await
        })
        .await
    }

    /// 经队列断开设备（尽力而为）
    pub async fn disconnect(&self) {
        let result = self
            .queue
            .run(|| async {
                self.teardown_session().await;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::debug!(brand = ?self.brand, error = %e, "Disconnect skipped");
        }
    }

    /// 忘记设备：丢弃排队命令、断开会话并清空账户
    pub async fn forget_device(&self) -> Result<()> {
        self.queue.clear();
        self.disconnect().await;
        let mut state = lock_state(&self.state)?;
        state.device_id = None;
        state.accounts.clear();
        state.cache.clear();
        tracing::info!(brand = ?self.brand, "Hardware device forgotten");
        Ok(())
    }
}
