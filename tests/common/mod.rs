//! 测试辅助模块
//! 可观测的假传输层、假链上客户端、假多签服务，以及预先初始化的上下文

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    types::{transaction::eip2718::TypedTransaction, Bytes, Eip1559TransactionRequest, U256},
    utils::rlp::Rlp,
};
use ironkeyring::{
    config::Config,
    domain::{
        account::Address,
        derivation::{
            address_from_signing_key, derive_signing_key, hash_personal_message,
            mnemonic_to_seed, parse_private_key, sign_hash, HdPathType,
        },
        network::{Network, NetworkRegistry},
        proposal::SafeTransactionData,
    },
    error::{KeyringError, Result},
    infrastructure::{
        password::Password,
        safe_api::{
            ProposeMessageRequest, ProposeTransactionRequest, SafeConfirmation, SafeMessageItem,
            SafeTransactionItem, SafeTransactionService,
        },
        safe_contract::SafeChainClient,
        vault_store::InMemoryVaultStore,
    },
    service::keyring::{HardwareTransport, TransportFactories, TransportFactory},
    ContextDeps, KeyringContext,
};
use rand::Rng;
use zeroize::Zeroizing;

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const TEST_MNEMONIC_INDEX0: &str = "0x9858effd232b4033e47d90003d23ec58e053e11f";
pub const TEST_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
/// 假硬件设备使用的助记词
pub const DEVICE_MNEMONIC: &str = "test test test test test test test test test test test junk";
pub const TEST_PASSWORD: &str = "correct horse battery staple";

pub fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

pub fn password() -> Password {
    Password::new(TEST_PASSWORD.to_string())
}

/// HD 测试助记词第 `index` 个地址
pub fn hd_address(index: u32) -> Address {
    let seed = mnemonic_to_seed(TEST_MNEMONIC, "").unwrap();
    let key = derive_signing_key(&seed[..], &HdPathType::Bip44.path(index)).unwrap();
    address_from_signing_key(&key)
}

pub fn private_key_address() -> Address {
    address_from_signing_key(&parse_private_key(TEST_PRIVATE_KEY).unwrap())
}

// ============ 硬件传输 ============

/// 记录在途并发数与调用顺序的假设备
pub struct FakeTransport {
    seed: Zeroizing<[u8; 64]>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
    fail_next: AtomicU32,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    paused: AtomicBool,
    max_delay_ms: u64,
}

impl FakeTransport {
    pub fn new(max_delay_ms: u64) -> Self {
        Self::with_mnemonic(DEVICE_MNEMONIC, max_delay_ms)
    }

    /// 以指定助记词为种子的设备
    pub fn with_mnemonic(mnemonic: &str, max_delay_ms: u64) -> Self {
        Self {
            seed: mnemonic_to_seed(mnemonic, "").unwrap(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            max_delay_ms,
        }
    }

    /// 设备在 `index` 处的地址（BIP44）
    pub fn address_at(&self, index: u32) -> Address {
        let key = derive_signing_key(&self.seed[..], &HdPathType::Bip44.path(index)).unwrap();
        address_from_signing_key(&key)
    }

    /// 接下来 `n` 次调用返回 `TransportDisconnected`
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// 暂停后命令停在设备上，直到 `resume`
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_connected_now(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn instrumented<T>(&self, call: String, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);

        while self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        } else {
            tokio::task::yield_now().await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if failing {
            Err(KeyringError::TransportDisconnected("device unplugged".into()))
        } else {
            f()
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn key(&self, hd_path: &str) -> Result<k256::ecdsa::SigningKey> {
        derive_signing_key(&self.seed[..], hd_path)
    }
}

#[async_trait]
impl HardwareTransport for FakeTransport {
    async fn get_address(&self, hd_path: &str) -> Result<Address> {
        self.instrumented(format!("getAddress {}", hd_path), || {
            Ok(address_from_signing_key(&self.key(hd_path)?))
        })
        .await
    }

    async fn sign_hash(&self, hd_path: &str, hash: &[u8; 32]) -> Result<Vec<u8>> {
        self.instrumented(format!("signHash {}", hex::encode(hash)), || {
            sign_hash(&self.key(hd_path)?, hash)
        })
        .await
    }

    async fn sign_personal_message(&self, hd_path: &str, message: &[u8]) -> Result<Vec<u8>> {
        self.instrumented(
            format!("signPersonalMessage {}", String::from_utf8_lossy(message)),
            || sign_hash(&self.key(hd_path)?, &hash_personal_message(message)),
        )
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// 未登记的设备 ID 都打开默认设备
pub struct FakeTransportFactory {
    pub transport: Arc<FakeTransport>,
    attached: Mutex<HashMap<String, Arc<FakeTransport>>>,
    opens: AtomicUsize,
    devices: Mutex<Vec<String>>,
}

impl FakeTransportFactory {
    pub fn new(transport: Arc<FakeTransport>) -> Self {
        Self {
            transport,
            attached: Mutex::new(HashMap::new()),
            opens: AtomicUsize::new(0),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// 登记另一台物理设备
    pub fn attach(&self, device_id: &str, transport: Arc<FakeTransport>) {
        self.attached
            .lock()
            .unwrap()
            .insert(device_id.to_string(), transport);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn opened_devices(&self) -> Vec<String> {
        self.devices.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn open(&self, device_id: &str) -> Result<Arc<dyn HardwareTransport>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.devices.lock().unwrap().push(device_id.to_string());
        let transport = self
            .attached
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| self.transport.clone());
        transport.mark_connected();
        Ok(transport)
    }
}

// ============ 链上读取 ============

#[derive(Debug, Clone)]
pub struct SafeInfo {
    pub owners: Vec<Address>,
    pub threshold: usize,
    pub version: String,
    pub nonce: U256,
}

struct PreparedExecution {
    network_id: String,
    safe: Address,
    tx: SafeTransactionData,
    signatures: Bytes,
}

/// 广播成功的执行交易，`sender` 从原始交易的签名中恢复
#[derive(Debug, Clone)]
pub struct ExecutedTransaction {
    pub network_id: String,
    pub safe: Address,
    pub tx: SafeTransactionData,
    pub signatures: Bytes,
    pub sender: Address,
}

#[derive(Default)]
struct ChainState {
    safes: HashMap<(String, Address), SafeInfo>,
    failing_networks: HashSet<String>,
    exec_failures: u32,
    prepared: Option<PreparedExecution>,
    executed: Vec<ExecutedTransaction>,
    owner_reads: usize,
}

#[derive(Default)]
pub struct FakeSafeChain {
    state: Mutex<ChainState>,
}

impl FakeSafeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_safe(&self, network_id: &str, safe: &Address, owners: Vec<Address>, threshold: usize) {
        self.state.lock().unwrap().safes.insert(
            (network_id.to_string(), safe.clone()),
            SafeInfo {
                owners,
                threshold,
                version: "1.3.0".to_string(),
                nonce: U256::from(7u64),
            },
        );
    }

    pub fn set_threshold(&self, network_id: &str, safe: &Address, threshold: usize) {
        if let Some(info) = self
            .state
            .lock()
            .unwrap()
            .safes
            .get_mut(&(network_id.to_string(), safe.clone()))
        {
            info.threshold = threshold;
        }
    }

    pub fn fail_network(&self, network_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_networks
            .insert(network_id.to_string());
    }

    pub fn fail_next_exec(&self, n: u32) {
        self.state.lock().unwrap().exec_failures = n;
    }

    pub fn executed_count(&self) -> usize {
        self.state.lock().unwrap().executed.len()
    }

    pub fn last_executed_signatures(&self) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .executed
            .last()
            .map(|e| e.signatures.clone())
    }

    pub fn last_executed(&self) -> Option<ExecutedTransaction> {
        self.state.lock().unwrap().executed.last().cloned()
    }

    pub fn owner_reads(&self) -> usize {
        self.state.lock().unwrap().owner_reads
    }

    fn info(&self, network: &Network, safe: &Address) -> Result<Option<SafeInfo>> {
        let state = self.state.lock().unwrap();
        if state.failing_networks.contains(&network.network_id) {
            return Err(KeyringError::Chain(format!("{} rpc down", network.network_id)));
        }
        Ok(state
            .safes
            .get(&(network.network_id.clone(), safe.clone()))
            .cloned())
    }

    fn require(&self, network: &Network, safe: &Address) -> Result<SafeInfo> {
        self.info(network, safe)?.ok_or_else(|| {
            KeyringError::Chain(format!("no contract at {} on {}", safe, network.network_id))
        })
    }
}

#[async_trait]
impl SafeChainClient for FakeSafeChain {
    async fn get_owners(&self, network: &Network, safe: &Address) -> Result<Vec<Address>> {
        self.state.lock().unwrap().owner_reads += 1;
        Ok(self
            .info(network, safe)?
            .map(|info| info.owners)
            .unwrap_or_default())
    }

    async fn get_threshold(&self, network: &Network, safe: &Address) -> Result<usize> {
        Ok(self.require(network, safe)?.threshold)
    }

    async fn get_version(&self, network: &Network, safe: &Address) -> Result<String> {
        Ok(self.require(network, safe)?.version)
    }

    async fn get_nonce(&self, network: &Network, safe: &Address) -> Result<U256> {
        Ok(self.require(network, safe)?.nonce)
    }

    async fn prepare_execution(
        &self,
        network: &Network,
        safe: &Address,
        tx: &SafeTransactionData,
        signatures: Bytes,
        executor: &Address,
    ) -> Result<TypedTransaction> {
        self.require(network, safe)?;
        let typed: TypedTransaction = Eip1559TransactionRequest::new()
            .from(executor.to_h160())
            .to(safe.to_h160())
            .data(signatures.clone())
            .nonce(3u64)
            .gas(250_000u64)
            .max_fee_per_gas(30_000_000_000u64)
            .max_priority_fee_per_gas(1_000_000_000u64)
            .chain_id(network.chain_id)
            .into();
        self.state.lock().unwrap().prepared = Some(PreparedExecution {
            network_id: network.network_id.clone(),
            safe: safe.clone(),
            tx: tx.clone(),
            signatures,
        });
        Ok(typed)
    }

    async fn send_raw_transaction(&self, network: &Network, raw: Bytes) -> Result<String> {
        let (decoded, signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
            .map_err(|e| KeyringError::Chain(format!("malformed raw transaction: {}", e)))?;
        let sender = signature
            .recover(decoded.sighash())
            .map_err(|e| KeyringError::Chain(format!("invalid sender signature: {}", e)))?;

        let mut state = self.state.lock().unwrap();
        let prepared = state
            .prepared
            .take()
            .filter(|p| p.network_id == network.network_id)
            .ok_or_else(|| KeyringError::Chain("no prepared execution".into()))?;
        if state.exec_failures > 0 {
            state.exec_failures -= 1;
            return Err(KeyringError::Chain("execution reverted: GS013".into()));
        }
        state.executed.push(ExecutedTransaction {
            network_id: prepared.network_id,
            safe: prepared.safe,
            tx: prepared.tx,
            signatures: prepared.signatures,
            sender: Address::from_h160(sender),
        });
        Ok(format!("0x{:064x}", state.executed.len()))
    }
}

// ============ 多签服务 ============

#[derive(Default)]
pub struct FakeSafeService {
    pending: Mutex<HashMap<String, Vec<SafeTransactionItem>>>,
    messages: Mutex<HashMap<String, Vec<SafeMessageItem>>>,
    failing: Mutex<HashSet<String>>,
    proposed: Mutex<Vec<ProposeTransactionRequest>>,
    proposed_messages: Mutex<Vec<ProposeMessageRequest>>,
    requests: AtomicUsize,
}

impl FakeSafeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending(&self, network_id: &str, items: Vec<SafeTransactionItem>) {
        self.pending
            .lock()
            .unwrap()
            .insert(network_id.to_string(), items);
    }

    pub fn set_messages(&self, network_id: &str, items: Vec<SafeMessageItem>) {
        self.messages
            .lock()
            .unwrap()
            .insert(network_id.to_string(), items);
    }

    pub fn fail_network(&self, network_id: &str) {
        self.failing.lock().unwrap().insert(network_id.to_string());
    }

    pub fn proposed(&self) -> Vec<ProposeTransactionRequest> {
        self.proposed.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn check(&self, network: &Network) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&network.network_id) {
            return Err(KeyringError::network_fetch(&network.network_id, "HTTP 502"));
        }
        Ok(())
    }
}

#[async_trait]
impl SafeTransactionService for FakeSafeService {
    async fn pending_transactions(
        &self,
        network: &Network,
        _safe: &Address,
        current_nonce: U256,
    ) -> Result<Vec<SafeTransactionItem>> {
        self.check(network)?;
        Ok(self
            .pending
            .lock()
            .unwrap()
            .get(&network.network_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|t| U256::from(t.nonce) >= current_nonce)
            .collect())
    }

    async fn messages(&self, network: &Network, _safe: &Address) -> Result<Vec<SafeMessageItem>> {
        self.check(network)?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&network.network_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn propose_transaction(
        &self,
        network: &Network,
        _safe: &Address,
        request: &ProposeTransactionRequest,
    ) -> Result<()> {
        self.check(network)?;
        self.proposed.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn propose_message(
        &self,
        network: &Network,
        _safe: &Address,
        request: &ProposeMessageRequest,
    ) -> Result<()> {
        self.check(network)?;
        self.proposed_messages.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn add_message_signature(
        &self,
        network: &Network,
        _message_hash: &str,
        _signature: &str,
    ) -> Result<()> {
        self.check(network)
    }
}

pub fn pending_tx(safe: &Address, nonce: u64) -> SafeTransactionItem {
    SafeTransactionItem {
        safe: safe.to_checksum(),
        to: safe.to_checksum(),
        value: "0".into(),
        data: None,
        operation: 0,
        nonce,
        safe_tx_hash: format!("0x{:064x}", nonce),
        confirmations_required: Some(2),
        confirmations: Vec::new(),
        is_executed: false,
        submission_date: None,
    }
}

pub fn message_item(hash: &str, confirmations: usize) -> SafeMessageItem {
    SafeMessageItem {
        message_hash: hash.to_string(),
        message: serde_json::Value::String("hello".into()),
        confirmations: (0..confirmations)
            .map(|i| SafeConfirmation {
                owner: format!("0x{:040x}", i + 1),
                signature: None,
                submission_date: None,
            })
            .collect(),
        prepared_signature: None,
        created: None,
    }
}

// ============ 上下文 ============

pub fn test_networks() -> NetworkRegistry {
    let network = |id: &str, chain_id: u64| Network {
        network_id: id.to_string(),
        chain_id,
        name: id.to_uppercase(),
        symbol: "ETH".to_string(),
        rpc_url: format!("http://{}.invalid", id),
        safe_service_url: Some(format!("http://safe-{}.invalid", id)),
        is_testnet: false,
    };
    NetworkRegistry::from_networks([network("eth", 1), network("bsc", 56), network("polygon", 137)])
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.vault.kdf_iterations = 1000;
    config.vault.bcrypt_cost = 4;
    config.hardware.import_retry_count = 3;
    config.hardware.retry_backoff_ms = 0;
    config.stash.max_age_secs = 600;
    config.multisig.pending_interval_ms = 20;
    config.multisig.pending_interval_cap = 5;
    config.multisig.pending_concurrency = 2;
    config
}

pub struct TestHarness {
    pub ctx: KeyringContext,
    pub store: Arc<InMemoryVaultStore>,
    pub transport: Arc<FakeTransport>,
    pub factory: Arc<FakeTransportFactory>,
    pub chain: Arc<FakeSafeChain>,
    pub service: Arc<FakeSafeService>,
}

/// 已初始化并解锁的上下文；所有硬件品牌共用同一个假设备
pub async fn harness_with_delay(max_delay_ms: u64) -> TestHarness {
    let store = Arc::new(InMemoryVaultStore::new());
    let transport = Arc::new(FakeTransport::new(max_delay_ms));
    let factory = Arc::new(FakeTransportFactory::new(transport.clone()));
    let chain = Arc::new(FakeSafeChain::new());
    let service = Arc::new(FakeSafeService::new());

    let mut factories = TransportFactories::new();
    for brand in ironkeyring::domain::HardwareBrand::ALL {
        factories.insert(brand, factory.clone() as Arc<dyn TransportFactory>);
    }

    let ctx = KeyringContext::new(
        test_config(),
        ContextDeps {
            vault_store: store.clone(),
            transport_factories: factories,
            chain: chain.clone(),
            safe_service: service.clone(),
            networks: test_networks(),
            extra_address_stores: Vec::new(),
        },
    );
    ctx.registry.boot(&password()).await.unwrap();

    TestHarness {
        ctx,
        store,
        transport,
        factory,
        chain,
        service,
    }
}

/// 轮询直到条件成立
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

pub async fn harness() -> TestHarness {
    harness_with_delay(0).await
}
