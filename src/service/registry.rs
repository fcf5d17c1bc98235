//! 密钥环注册表
//!
//! 持有全部已提交的密钥环，以及保险库的解锁状态。
//! - 所有账户增删都经过注册表，改动后整体加密持久化
//! - 持久化的读-改-写由 tokio `Mutex` 串行化；硬件 I/O 不在锁内进行
//! - 锁顺序：注册表 → 单个密钥环
//! - 事件在释放注册表锁之后发布

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::{
    config::{StashConfig, VaultConfig},
    domain::account::{Account, Address, KeyringType},
    error::{KeyringError, Result},
    infrastructure::{
        address_store::AddressScopedStore,
        encryption::{decrypt_data, encrypt_data, EncryptionKey},
        event_bus::{AccountEvent, AccountEventBus, ImportScene},
        log_redact::redact_address,
        password::{ensure_valid_password, hash_password, Password},
        pbkdf2::{derive_key_with_salt, generate_salt},
        vault_store::{VaultBlob, VaultStore, VAULT_FORMAT_VERSION},
    },
    service::{
        keyring::{
            GnosisKeyring, HardwareKeyring, Keyring, KeyringOp, KeyringReply, SerializedKeyring,
            TransportFactories, WatchKeyring,
        },
        stash::ImportStash,
    },
};

/// `invoke` 的目标：暂存条目或已提交的某类密钥环
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringTarget {
    Stash(u64),
    Type(KeyringType),
}

/// 提交结果
pub struct CommitOutcome {
    pub keyring: Arc<Keyring>,
    /// 同一身份的密钥环已存在，本次并入
    pub is_existed_kr: bool,
    pub added_accounts: Vec<Account>,
}

impl std::fmt::Debug for CommitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitOutcome")
            .field("keyring_type", &self.keyring.keyring_type())
            .field("is_existed_kr", &self.is_existed_kr)
            .field("added_accounts", &self.added_accounts)
            .finish()
    }
}

struct UnlockedVault {
    key: EncryptionKey,
    salt: Vec<u8>,
    kdf_iterations: u32,
    password_hash: String,
}

#[derive(Default)]
struct RegistryState {
    keyrings: Vec<Arc<Keyring>>,
    vault: Option<UnlockedVault>,
}

impl RegistryState {
    fn ensure_unlocked(&self) -> Result<&UnlockedVault> {
        self.vault.as_ref().ok_or(KeyringError::Locked)
    }

    fn check_for_duplicate(&self, keyring_type: KeyringType, addresses: &[Address]) -> Result<()> {
        for keyring in self.keyrings.iter().filter(|k| k.keyring_type() == keyring_type) {
            let existing = keyring.accounts()?;
            if let Some(duplicate) = addresses.iter().find(|a| existing.contains(a)) {
                return Err(KeyringError::DuplicateImport {
                    address: duplicate.to_string(),
                });
            }
        }
        Ok(())
    }

    fn is_referenced(&self, address: &Address) -> bool {
        self.keyrings
            .iter()
            .any(|k| matches!(k.has_account(address), Ok(true)))
    }
}

pub struct KeyringRegistry {
    state: Mutex<RegistryState>,
    stash: ImportStash,
    store: Arc<dyn VaultStore>,
    vault_config: VaultConfig,
    factories: TransportFactories,
    address_stores: Vec<Arc<dyn AddressScopedStore>>,
    events: Arc<AccountEventBus>,
}

fn scene_for(keyring_type: KeyringType, by_import: bool) -> Option<ImportScene> {
    if !by_import {
        return Some(ImportScene::Sync);
    }
    match keyring_type {
        KeyringType::Hd => Some(ImportScene::Mnemonics),
        KeyringType::Simple => Some(ImportScene::PrivateKey),
        t if t.is_hardware() => Some(ImportScene::Hardware),
        _ => None,
    }
}

impl KeyringRegistry {
    pub fn new(
        store: Arc<dyn VaultStore>,
        vault_config: VaultConfig,
        stash_config: &StashConfig,
        factories: TransportFactories,
        address_stores: Vec<Arc<dyn AddressScopedStore>>,
        events: Arc<AccountEventBus>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            stash: ImportStash::from_config(stash_config),
            store,
            vault_config,
            factories,
            address_stores,
            events,
        }
    }

    pub fn events(&self) -> &Arc<AccountEventBus> {
        &self.events
    }

    // ============ 保险库 ============

    /// 首次设置密码并创建空保险库
    pub async fn boot(&self, password: &Password) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.store.load().await?.is_some() {
            return Err(KeyringError::InvalidState("vault already initialized".into()));
        }

        let password_hash = hash_password(password.as_str(), self.vault_config.bcrypt_cost)?;
        let salt = generate_salt().to_vec();
        let key = derive_key_with_salt(password.as_str(), &salt, self.vault_config.kdf_iterations)?;

        state.keyrings.clear();
        state.vault = Some(UnlockedVault {
            key,
            salt,
            kdf_iterations: self.vault_config.kdf_iterations,
            password_hash,
        });
        self.persist_locked(&state).await?;

        tracing::info!("Keyring vault initialized");
        Ok(())
    }

    /// 校验密码、解密并恢复全部密钥环
    pub async fn unlock(&self, password: &Password) -> Result<()> {
        let blob = self
            .store
            .load()
            .await?
            .ok_or_else(|| KeyringError::InvalidState("vault not initialized".into()))?;
        ensure_valid_password(password.as_str(), &blob.password_hash)?;

        let salt = BASE64
            .decode(&blob.salt)
            .map_err(|e| KeyringError::Vault(format!("corrupted salt: {}", e)))?;
        let key = derive_key_with_salt(password.as_str(), &salt, blob.kdf_iterations)?;

        let mut keyrings = Vec::with_capacity(blob.keyrings.len());
        for entry in &blob.keyrings {
            let ciphertext = BASE64
                .decode(entry)
                .map_err(|e| KeyringError::Vault(format!("corrupted keyring entry: {}", e)))?;
            let plaintext = Zeroizing::new(decrypt_data(&ciphertext, &key)?);
            let serialized: SerializedKeyring = serde_json::from_slice(&plaintext)?;
            keyrings.push(Arc::new(Keyring::restore(serialized, &self.factories)?));
        }

        let mut state = self.state.lock().await;
        state.keyrings = keyrings;
        state.vault = Some(UnlockedVault {
            key,
            salt,
            kdf_iterations: blob.kdf_iterations,
            password_hash: blob.password_hash,
        });

        tracing::info!(keyrings = state.keyrings.len(), "Keyring vault unlocked");
        Ok(())
    }

    /// 清除内存中的密钥与密钥环
    pub async fn lock(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for keyring in &state.keyrings {
            if let Some(hardware) = keyring.as_hardware() {
                hardware.queue().clear();
            }
        }
        state.keyrings.clear();
        state.vault = None;
        self.stash.clear()?;
        tracing::info!("Keyring vault locked");
        Ok(())
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.lock().await.vault.is_some()
    }

    /// 导出敏感信息前的密码校验
    pub async fn verify_password(&self, password: &Password) -> Result<()> {
        let cached = self
            .state
            .lock()
            .await
            .vault
            .as_ref()
            .map(|v| v.password_hash.clone());
        let hash = match cached {
            Some(hash) => hash,
            None => {
                self.store
                    .load()
                    .await?
                    .ok_or_else(|| KeyringError::InvalidState("vault not initialized".into()))?
                    .password_hash
            }
        };
        ensure_valid_password(password.as_str(), &hash)
    }

    pub async fn persist_all_keyrings(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.persist_locked(&state).await
    }

    async fn persist_locked(&self, state: &RegistryState) -> Result<()> {
        let vault = state.ensure_unlocked()?;

        let mut entries = Vec::with_capacity(state.keyrings.len());
        for keyring in &state.keyrings {
            let plaintext = Zeroizing::new(serde_json::to_vec(&keyring.serialize()?)?);
            let ciphertext = encrypt_data(&plaintext, &vault.key)?;
            entries.push(BASE64.encode(ciphertext));
        }

        let blob = VaultBlob {
            version: VAULT_FORMAT_VERSION,
            password_hash: vault.password_hash.clone(),
            salt: BASE64.encode(&vault.salt),
            kdf_iterations: vault.kdf_iterations,
            keyrings: entries,
            updated_at: chrono::Utc::now(),
        };
        self.store.save(&blob).await
    }

    // ============ 查询 ============

    pub async fn keyrings(&self) -> Vec<Arc<Keyring>> {
        self.state.lock().await.keyrings.clone()
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let keyrings = self.keyrings().await;
        let mut accounts = Vec::new();
        for keyring in keyrings {
            accounts.extend(keyring.account_list()?);
        }
        Ok(accounts)
    }

    pub async fn find_keyring(&self, keyring_type: KeyringType) -> Option<Arc<Keyring>> {
        self.state
            .lock()
            .await
            .keyrings
            .iter()
            .find(|k| k.keyring_type() == keyring_type)
            .cloned()
    }

    /// 找不到时返回 `NotFoundKeyring`
    pub async fn get_keyring(&self, keyring_type: KeyringType) -> Result<Arc<Keyring>> {
        self.find_keyring(keyring_type)
            .await
            .ok_or_else(|| KeyringError::NotFoundKeyring(keyring_type.to_string()))
    }

    pub async fn gnosis_keyring(&self) -> Result<Arc<Keyring>> {
        self.find_keyring(KeyringType::Gnosis)
            .await
            .ok_or(KeyringError::NotFoundGnosisKeyring)
    }

    /// 持有该账户的密钥环
    pub async fn keyring_for_account(&self, account: &Account) -> Result<Arc<Keyring>> {
        let state = self.state.lock().await;
        state
            .keyrings
            .iter()
            .find(|k| {
                k.keyring_type() == account.keyring_type
                    && k.brand_name() == account.brand_name
                    && matches!(k.has_account(&account.address), Ok(true))
            })
            .cloned()
            .ok_or_else(|| KeyringError::NotFoundKeyring(account.address.to_string()))
    }

    pub async fn check_for_duplicate(
        &self,
        keyring_type: KeyringType,
        addresses: &[Address],
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .check_for_duplicate(keyring_type, addresses)
    }

    // ============ 创建 / 暂存 / 提交 ============

    fn construct(&self, keyring_type: KeyringType) -> Result<Keyring> {
        if let Some(brand) = keyring_type.hardware_brand() {
            let factory = self.factories.get(&brand).cloned().ok_or_else(|| {
                KeyringError::InvalidState(format!("no transport factory for {}", keyring_type))
            })?;
            return Ok(Keyring::Hardware(HardwareKeyring::new(brand, factory)));
        }
        match keyring_type {
            KeyringType::Watch => Ok(Keyring::Watch(WatchKeyring::new())),
            KeyringType::Gnosis => Ok(Keyring::Gnosis(GnosisKeyring::new())),
            other => Err(KeyringError::unsupported(other, "getOrCreate")),
        }
    }

    pub async fn get_or_create(&self, keyring_type: KeyringType) -> Result<Arc<Keyring>> {
        self.get_or_create_with(keyring_type, |_| {}).await
    }

    /// 已存在则直接返回；否则构造、调用一次 `on_first_create`（绑定设备监听）并注册
    pub async fn get_or_create_with<F>(
        &self,
        keyring_type: KeyringType,
        on_first_create: F,
    ) -> Result<Arc<Keyring>>
    where
        F: FnOnce(&Arc<Keyring>),
    {
        // HD 与私钥密钥环只能经暂存区提交
        if !keyring_type.is_singleton() {
            return Err(KeyringError::unsupported(keyring_type, "getOrCreate"));
        }

        let mut state = self.state.lock().await;
        state.ensure_unlocked()?;

        if let Some(existing) = state
            .keyrings
            .iter()
            .find(|k| k.keyring_type() == keyring_type)
        {
            return Ok(existing.clone());
        }

        let keyring = Arc::new(self.construct(keyring_type)?);
        on_first_create(&keyring);
        state.keyrings.push(keyring.clone());
        tracing::info!(keyring_type = %keyring_type, "Keyring created");
        Ok(keyring)
    }

    pub fn stash(&self, keyring: Keyring) -> Result<u64> {
        self.stash.stash(keyring)
    }

    pub fn discard(&self, id: u64) -> Result<bool> {
        self.stash.discard(id)
    }

    pub fn stash_len(&self) -> Result<usize> {
        self.stash.len()
    }

    async fn resolve(&self, target: KeyringTarget) -> Result<Arc<Keyring>> {
        match target {
            KeyringTarget::Stash(id) => self
                .stash
                .get(id)?
                .ok_or(KeyringError::StashEntryNotFound(id)),
            KeyringTarget::Type(keyring_type) => self.get_keyring(keyring_type).await,
        }
    }

    /// 对暂存或已提交的密钥环执行操作；对已提交密钥环的账户变更会持久化并发布事件
    pub async fn invoke(&self, target: KeyringTarget, op: KeyringOp) -> Result<KeyringReply> {
        let keyring = self.resolve(target).await?;
        match target {
            KeyringTarget::Type(_) if op.mutates_accounts() => {
                let added = self.add_new_accounts(&keyring, op, None).await?;
                Ok(KeyringReply::Accounts(
                    added.into_iter().map(|a| a.address).collect(),
                ))
            }
            _ => keyring.invoke(op).await,
        }
    }

    /// 把暂存条目提交到注册表
    pub async fn commit(&self, id: u64, by_import: bool) -> Result<CommitOutcome> {
        let staged = self
            .stash
            .get(id)?
            .ok_or(KeyringError::StashEntryNotFound(id))?;

        // 未选择任何账户时默认激活第一个
        if staged.accounts()?.is_empty() {
            match staged.as_ref() {
                Keyring::Hd(k) => {
                    k.activate_indexes(&[0])?;
                }
                Keyring::Hardware(k) => {
                    k.activate_indexes(&[0]).await?;
                }
                _ => {}
            }
        }

        let keyring_type = staged.keyring_type();
        let identity = staged.identity()?;

        let (keyring, is_existed_kr, added) = {
            let mut state = self.state.lock().await;
            state.ensure_unlocked()?;

            let mut existing = None;
            for keyring in &state.keyrings {
                if keyring.identity()? == identity {
                    existing = Some(keyring.clone());
                    break;
                }
            }

            let outcome = match existing {
                Some(existing) => {
                    let added = existing.merge_from(&staged)?;
                    (existing, true, added)
                }
                None => {
                    let accounts = staged.accounts()?;
                    state.check_for_duplicate(keyring_type, &accounts)?;
                    state.keyrings.push(staged.clone());
                    (staged.clone(), false, accounts)
                }
            };
            self.persist_locked(&state).await?;
            outcome
        };

        // 已提交，条目可能已被并发放弃
        let _ = self.stash.take(id);

        let brand = keyring.brand_name();
        let added_accounts: Vec<Account> = added
            .into_iter()
            .map(|address| Account::new(address, keyring_type, brand))
            .collect();

        tracing::info!(
            stash_id = id,
            keyring_type = %keyring_type,
            is_existed_kr,
            added = added_accounts.len(),
            "Stash entry committed"
        );

        if !added_accounts.is_empty() {
            self.events.publish(AccountEvent::AccountAdded {
                accounts: added_accounts.clone(),
                scene: scene_for(keyring_type, by_import),
            });
        }

        Ok(CommitOutcome {
            keyring,
            is_existed_kr,
            added_accounts,
        })
    }

    /// 给已注册（或新建）的密钥环增加账户，持久化后发布 `ACCOUNT_ADDED`
    pub async fn add_new_accounts(
        &self,
        keyring: &Arc<Keyring>,
        op: KeyringOp,
        scene: Option<ImportScene>,
    ) -> Result<Vec<Account>> {
        if !op.mutates_accounts() {
            return Err(KeyringError::InvalidState(format!(
                "{} does not add accounts",
                op.name()
            )));
        }

        // 设备 I/O 在注册表锁之外完成
        let added = keyring.invoke(op).await?.into_accounts()?;

        {
            let mut state = self.state.lock().await;
            state.ensure_unlocked()?;
            if !state.keyrings.iter().any(|k| Arc::ptr_eq(k, keyring)) {
                state.keyrings.push(keyring.clone());
            }
            self.persist_locked(&state).await?;
        }

        let keyring_type = keyring.keyring_type();
        let brand = keyring.brand_name();
        let accounts: Vec<Account> = added
            .into_iter()
            .map(|address| Account::new(address, keyring_type, brand))
            .collect();

        if !accounts.is_empty() {
            self.events.publish(AccountEvent::AccountAdded {
                accounts: accounts.clone(),
                scene,
            });
        }
        Ok(accounts)
    }

    // ============ 删除 ============

    /// 从所属密钥环移除账户；密钥环变空则一并移除，地址不再被任何密钥环引用时级联清理
    pub async fn remove(
        &self,
        address: &Address,
        keyring_type: KeyringType,
        brand_name: &str,
    ) -> Result<()> {
        let (emptied, still_referenced) = {
            let mut state = self.state.lock().await;
            state.ensure_unlocked()?;

            let index = state
                .keyrings
                .iter()
                .position(|k| {
                    k.keyring_type() == keyring_type
                        && k.brand_name() == brand_name
                        && matches!(k.has_account(address), Ok(true))
                })
                .ok_or_else(|| {
                    KeyringError::NotFoundKeyring(format!("{} {}", keyring_type, address))
                })?;

            let keyring = state.keyrings[index].clone();
            keyring.remove_account(address)?;

            let mut emptied = None;
            if keyring.accounts()?.is_empty() {
                state.keyrings.remove(index);
                emptied = Some(keyring);
            }

            self.persist_locked(&state).await?;
            (emptied, state.is_referenced(address))
        };

        if let Some(keyring) = emptied {
            tracing::info!(keyring_type = %keyring_type, "Empty keyring removed");
            if let Some(hardware) = keyring.as_hardware() {
                if let Err(e) = hardware.forget_device().await {
                    tracing::warn!(error = %e, "Failed to forget hardware device");
                }
            }
        }

        if !still_referenced {
            self.cascade_remove(address).await;
        }

        tracing::info!(
            address = %redact_address(address.as_str()),
            keyring_type = %keyring_type,
            cascaded = !still_referenced,
            "Account removed"
        );

        self.events.publish(AccountEvent::AccountRemoved {
            removed_accounts: vec![Account::new(address.clone(), keyring_type, brand_name)],
        });
        Ok(())
    }

    async fn cascade_remove(&self, address: &Address) {
        for store in &self.address_stores {
            if let Err(e) = store.remove(address).await {
                tracing::warn!(
                    store = store.name(),
                    address = %redact_address(address.as_str()),
                    error = %e,
                    "Address-scoped cleanup failed"
                );
            }
        }
    }

    // ============ 导出 ============

    pub async fn export_mnemonic(
        &self,
        password: &Password,
        address: &Address,
    ) -> Result<Zeroizing<String>> {
        self.verify_password(password).await?;
        let keyring = self.owning_keyring(address, &[KeyringType::Hd]).await?;
        match keyring.as_hd() {
            Some(hd) => hd.mnemonic(),
            None => Err(KeyringError::unsupported(keyring.keyring_type(), "exportMnemonic")),
        }
    }

    pub async fn export_private_key(
        &self,
        password: &Password,
        address: &Address,
    ) -> Result<Zeroizing<String>> {
        self.verify_password(password).await?;
        let keyring = self
            .owning_keyring(address, &[KeyringType::Hd, KeyringType::Simple])
            .await?;
        match keyring.as_ref() {
            Keyring::Hd(k) => k.private_key(address),
            Keyring::Simple(k) => k.private_key(address),
            other => Err(KeyringError::unsupported(other.keyring_type(), "exportPrivateKey")),
        }
    }

    async fn owning_keyring(
        &self,
        address: &Address,
        types: &[KeyringType],
    ) -> Result<Arc<Keyring>> {
        let state = self.state.lock().await;
        state.ensure_unlocked()?;
        state
            .keyrings
            .iter()
            .find(|k| {
                types.contains(&k.keyring_type()) && matches!(k.has_account(address), Ok(true))
            })
            .cloned()
            .ok_or_else(|| KeyringError::NotFoundKeyring(address.to_string()))
    }
}
