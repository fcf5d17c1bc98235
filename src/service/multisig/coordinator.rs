//! 多签提案协调器
//!
//! 同一时刻只维护一个进行中的提案（及其会话：owner 列表、网络）。
//! 状态转换统一经过 `ProposalStatus::can_transition_to` 校验；
//! 链上读取与签名都在提案锁之外完成，回写前确认提案未被替换。

use std::{collections::BTreeMap, sync::Arc};

use ethers::types::{Bytes, Signature, U256};
use tokio::sync::Mutex;

use crate::{
    domain::{
        account::{Account, Address, KeyringType},
        derivation::{hash_personal_message, recover_address},
        network::{Network, NetworkRegistry},
        proposal::{
            proposal_hash, MultisigProposal, ProposalPayload, ProposalStatus, SafeMessage,
            SafeTransactionData,
        },
    },
    error::{KeyringError, Result},
    infrastructure::{
        log_redact::redact_address,
        safe_api::{ProposeMessageRequest, ProposeTransactionRequest, SafeTransactionService},
        safe_contract::SafeChainClient,
        task_pool::RateLimitedPool,
    },
    service::{
        keyring::{Keyring, KeyringOp},
        registry::KeyringRegistry,
    },
};

/// `eth_sign` 签名的 v 比普通签名大 4
const ETH_SIGN_V_OFFSET: u8 = 4;

/// 提案会话：构建时读取的 owner 列表
struct ProposalSession {
    proposal: MultisigProposal,
    owners: Vec<Address>,
}

pub struct MultisigCoordinator {
    pub(super) registry: Arc<KeyringRegistry>,
    pub(super) networks: Arc<NetworkRegistry>,
    pub(super) chain: Arc<dyn SafeChainClient>,
    pub(super) service: Arc<dyn SafeTransactionService>,
    pub(super) pool: RateLimitedPool,
    current: Mutex<Option<ProposalSession>>,
}

impl MultisigCoordinator {
    pub fn new(
        registry: Arc<KeyringRegistry>,
        networks: Arc<NetworkRegistry>,
        chain: Arc<dyn SafeChainClient>,
        service: Arc<dyn SafeTransactionService>,
        pool: RateLimitedPool,
    ) -> Self {
        Self {
            registry,
            networks,
            chain,
            service,
            pool,
            current: Mutex::new(None),
        }
    }

    pub(super) fn network(&self, network_id: &str) -> Result<Network> {
        self.networks.require(network_id).cloned()
    }

    /// 目标地址必须已导入多签密钥环
    async fn ensure_imported(&self, safe: &Address) -> Result<()> {
        let keyring = self.registry.gnosis_keyring().await?;
        let gnosis = keyring
            .as_gnosis()
            .ok_or(KeyringError::NotFoundGnosisKeyring)?;
        if !gnosis.contains(safe)? {
            return Err(KeyringError::NotFoundGnosisKeyring);
        }
        Ok(())
    }

    /// 多签合约当前 nonce
    pub async fn next_nonce(&self, safe: &Address, network_id: &str) -> Result<U256> {
        let network = self.network(network_id)?;
        self.chain.get_nonce(&network, safe).await
    }

    /// 构建交易提案（Idle → Built）
    pub async fn build_proposal(
        &self,
        safe: &Address,
        tx: SafeTransactionData,
        network_id: &str,
        version: Option<&str>,
    ) -> Result<MultisigProposal> {
        self.build(safe, ProposalPayload::Transaction(tx), network_id, version)
            .await
    }

    /// 构建消息提案；消息达到阈值即完成，不上链执行
    pub async fn build_message_proposal(
        &self,
        safe: &Address,
        message: impl Into<String>,
        network_id: &str,
        version: Option<&str>,
    ) -> Result<MultisigProposal> {
        let payload = ProposalPayload::Message(SafeMessage {
            message: message.into(),
        });
        self.build(safe, payload, network_id, version).await
    }

    async fn build(
        &self,
        safe: &Address,
        payload: ProposalPayload,
        network_id: &str,
        version: Option<&str>,
    ) -> Result<MultisigProposal> {
        self.ensure_imported(safe).await?;
        let network = self.network(network_id)?;

        let version = match version {
            Some(v) => v.to_string(),
            None => self.chain.get_version(&network, safe).await?,
        };
        let owners = self.chain.get_owners(&network, safe).await?;
        let threshold = self.chain.get_threshold(&network, safe).await?;

        let hash = proposal_hash(&payload, &version, network.chain_id, safe);
        let proposal = MultisigProposal {
            target_account_address: safe.clone(),
            network: network.network_id.clone(),
            version,
            payload,
            proposal_hash: hash,
            signatures: BTreeMap::new(),
            threshold,
            status: ProposalStatus::Built,
            execution_tx_hash: None,
        };

        tracing::info!(
            safe = %redact_address(safe.as_str()),
            network = %network.network_id,
            threshold,
            owners = owners.len(),
            is_message = proposal.payload.is_message(),
            "Multisig proposal built"
        );

        // 新提案替换旧会话
        *self.current.lock().await = Some(ProposalSession {
            proposal: proposal.clone(),
            owners,
        });
        Ok(proposal)
    }

    pub async fn current_proposal(&self) -> Option<MultisigProposal> {
        self.current.lock().await.as_ref().map(|s| s.proposal.clone())
    }

    pub async fn status(&self) -> ProposalStatus {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.proposal.status)
            .unwrap_or(ProposalStatus::Idle)
    }

    pub async fn proposal_hash(&self) -> Result<[u8; 32]> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.proposal.proposal_hash)
            .ok_or(KeyringError::NoCurrentProposal)
    }

    pub async fn get_signatures(&self) -> Result<BTreeMap<Address, Bytes>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.proposal.signatures.clone())
            .ok_or(KeyringError::NoCurrentProposal)
    }

    /// 校验签名后加入（本地签名路径）
    pub async fn add_signature(&self, signer: &Address, signature: Bytes) -> Result<ProposalStatus> {
        self.insert_signature(signer, signature, true).await
    }

    /// 只校验 owner 身份（转发对方签名）
    pub async fn add_pure_signature(
        &self,
        signer: &Address,
        signature: Bytes,
    ) -> Result<ProposalStatus> {
        self.insert_signature(signer, signature, false).await
    }

    async fn insert_signature(
        &self,
        signer: &Address,
        signature: Bytes,
        validate: bool,
    ) -> Result<ProposalStatus> {
        let mut current = self.current.lock().await;
        let session = current.as_mut().ok_or(KeyringError::NoCurrentProposal)?;
        let proposal = &mut session.proposal;

        if !proposal.status.accepts_signatures() {
            return Err(KeyringError::InvalidState(format!(
                "proposal is {}, signatures are closed",
                proposal.status
            )));
        }
        if !session.owners.contains(signer) {
            return Err(KeyringError::NotOwner {
                signer: signer.to_string(),
                safe: proposal.target_account_address.to_string(),
            });
        }
        if validate {
            let recovered = recover_signer(&proposal.proposal_hash, &signature)?;
            if recovered != *signer {
                return Err(KeyringError::InvalidSignature(format!(
                    "signature recovers to {}, expected {}",
                    recovered, signer
                )));
            }
        }

        proposal.signatures.insert(signer.clone(), signature);

        let next = if proposal.signature_count() >= proposal.threshold {
            ProposalStatus::Ready
        } else {
            ProposalStatus::Collecting
        };
        transition(proposal, next)?;

        tracing::info!(
            signer = %redact_address(signer.as_str()),
            collected = proposal.signature_count(),
            threshold = proposal.threshold,
            validated = validate,
            status = %proposal.status,
            "Multisig signature added"
        );
        Ok(proposal.status)
    }

    /// 用本地密钥环（软件或硬件）为当前提案签名并加入
    pub async fn confirm_with_account(&self, account: &Account) -> Result<ProposalStatus> {
        let hash = self.proposal_hash().await?;
        let keyring = self.registry.keyring_for_account(account).await?;

        let signature = match account.keyring_type {
            KeyringType::Hd | KeyringType::Simple => {
                keyring
                    .invoke(KeyringOp::SignHash {
                        address: account.address.clone(),
                        hash,
                    })
                    .await?
                    .into_signature()?
            }
            t if t.is_hardware() => {
                // 硬件设备只支持 personal_sign，按 eth_sign 格式提交
                let signed = keyring
                    .invoke(KeyringOp::SignPersonalMessage {
                        address: account.address.clone(),
                        message: hash.to_vec(),
                    })
                    .await?
                    .into_signature()?;
                to_eth_sign(signed)?
            }
            other => return Err(KeyringError::unsupported(other, "signProposal")),
        };

        self.add_signature(&account.address, signature).await
    }

    /// 重新读取链上阈值，判断签名数是否足够
    pub async fn can_execute(&self) -> Result<bool> {
        let (network, safe, collected) = self.snapshot().await?;
        let threshold = self.chain.get_threshold(&network, &safe).await?;
        Ok(collected >= threshold)
    }

    async fn snapshot(&self) -> Result<(Network, Address, usize)> {
        let current = self.current.lock().await;
        let proposal = &current
            .as_ref()
            .ok_or(KeyringError::NoCurrentProposal)?
            .proposal;
        Ok((
            self.network(&proposal.network)?,
            proposal.target_account_address.clone(),
            proposal.signature_count(),
        ))
    }

    /// 提交链上执行（Ready/Failed → Executing → Executed|Failed）
    ///
    /// 执行交易由 `executor` 所在的本地密钥环签名（硬件签名同样经过传输队列），
    /// 再以原始交易广播。
    pub async fn execute(&self, executor: &Account) -> Result<String> {
        let signable = executor.is_directly_signable() || executor.is_hardware();
        if !signable {
            return Err(KeyringError::unsupported(
                executor.keyring_type,
                "execTransaction",
            ));
        }
        let keyring = self.registry.keyring_for_account(executor).await?;

        let (network, safe, collected) = self.snapshot().await?;
        let threshold = self.chain.get_threshold(&network, &safe).await?;
        if collected < threshold {
            return Err(KeyringError::ThresholdNotMet {
                collected,
                threshold,
            });
        }

        let (hash, tx, signatures) = {
            let mut current = self.current.lock().await;
            let proposal = &mut current
                .as_mut()
                .ok_or(KeyringError::NoCurrentProposal)?
                .proposal;
            let tx = match &proposal.payload {
                ProposalPayload::Transaction(tx) => tx.clone(),
                ProposalPayload::Message(_) => {
                    return Err(KeyringError::unsupported(KeyringType::Gnosis, "executeMessage"))
                }
            };
            // 链上阈值可能已下调
            proposal.threshold = threshold;
            if matches!(
                proposal.status,
                ProposalStatus::Built | ProposalStatus::Collecting
            ) {
                transition(proposal, ProposalStatus::Ready)?;
            }
            transition(proposal, ProposalStatus::Executing)?;
            (proposal.proposal_hash, tx, proposal.packed_signatures())
        };

        tracing::info!(
            safe = %redact_address(safe.as_str()),
            network = %network.network_id,
            executor = %redact_address(executor.address.as_str()),
            signatures = collected,
            "Executing multisig transaction"
        );

        let result = self
            .submit_execution(&network, &safe, &tx, signatures, executor, &keyring)
            .await;

        let mut current = self.current.lock().await;
        let proposal = current
            .as_mut()
            .map(|s| &mut s.proposal)
            .filter(|p| p.proposal_hash == hash);

        match result {
            Ok(tx_hash) => {
                if let Some(proposal) = proposal {
                    transition(proposal, ProposalStatus::Executed)?;
                    proposal.execution_tx_hash = Some(tx_hash.clone());
                }
                tracing::info!(tx_hash = %tx_hash, "Multisig transaction executed");
                Ok(tx_hash)
            }
            Err(e) => {
                if let Some(proposal) = proposal {
                    transition(proposal, ProposalStatus::Failed)?;
                }
                tracing::error!(error = %e, "Multisig execution failed, signatures kept");
                Err(e)
            }
        }
    }

    async fn submit_execution(
        &self,
        network: &Network,
        safe: &Address,
        tx: &SafeTransactionData,
        signatures: Bytes,
        executor: &Account,
        keyring: &Arc<Keyring>,
    ) -> Result<String> {
        let mut typed = self
            .chain
            .prepare_execution(network, safe, tx, signatures, &executor.address)
            .await?;
        let chain_id = typed
            .chain_id()
            .map(|id| id.as_u64())
            .unwrap_or(network.chain_id);
        typed.set_chain_id(chain_id);

        let sighash = typed.sighash();
        let signed = keyring
            .invoke(KeyringOp::SignHash {
                address: executor.address.clone(),
                hash: sighash.0,
            })
            .await?
            .into_signature()?;
        let signature = transaction_signature(&signed, chain_id)?;

        let recovered = signature
            .recover(sighash)
            .map_err(|e| KeyringError::InvalidSignature(e.to_string()))?;
        if Address::from_h160(recovered) != executor.address {
            return Err(KeyringError::InvalidSignature(format!(
                "execution signed by {}, expected {}",
                Address::from_h160(recovered),
                executor.address
            )));
        }

        self.chain
            .send_raw_transaction(network, typed.rlp_signed(&signature))
            .await
    }

    /// 丢弃当前提案与会话；已广播的链上交易不受影响
    pub async fn clear(&self) {
        if let Some(session) = self.current.lock().await.take() {
            tracing::debug!(
                status = %session.proposal.status,
                "Multisig proposal cleared"
            );
        }
    }

    /// 重新计算提案哈希并与给定值比较
    pub async fn validate_proposal(&self, expected_hash: &str) -> Result<bool> {
        let current = self.current.lock().await;
        let proposal = &current
            .as_ref()
            .ok_or(KeyringError::NoCurrentProposal)?
            .proposal;
        let network = self.network(&proposal.network)?;
        let hash = proposal_hash(
            &proposal.payload,
            &proposal.version,
            network.chain_id,
            &proposal.target_account_address,
        );
        let expected = expected_hash.trim_start_matches("0x").to_lowercase();
        Ok(hash == proposal.proposal_hash && hex::encode(hash) == expected)
    }

    /// 把提案连同 `sender` 的签名发布到远程多签服务
    pub async fn post_proposal(&self, sender: &Address) -> Result<()> {
        let (network, safe, payload, hash, signature) = {
            let current = self.current.lock().await;
            let proposal = &current
                .as_ref()
                .ok_or(KeyringError::NoCurrentProposal)?
                .proposal;
            let signature = proposal.signatures.get(sender).cloned().ok_or_else(|| {
                KeyringError::InvalidState(format!("{} has not signed the proposal", sender))
            })?;
            (
                self.network(&proposal.network)?,
                proposal.target_account_address.clone(),
                proposal.payload.clone(),
                proposal.proposal_hash_hex(),
                signature,
            )
        };

        match payload {
            ProposalPayload::Transaction(tx) => {
                let request = ProposeTransactionRequest {
                    to: tx.to.to_checksum(),
                    value: tx.value.to_string(),
                    data: (!tx.data.is_empty()).then(|| format!("0x{}", hex::encode(&tx.data))),
                    operation: tx.operation.as_u8(),
                    safe_tx_gas: tx.safe_tx_gas.to_string(),
                    base_gas: tx.base_gas.to_string(),
                    gas_price: tx.gas_price.to_string(),
                    gas_token: tx.gas_token.to_checksum(),
                    refund_receiver: tx.refund_receiver.to_checksum(),
                    nonce: tx.nonce.to_string(),
                    contract_transaction_hash: hash,
                    sender: sender.to_checksum(),
                    signature: format!("0x{}", hex::encode(&signature)),
                    origin: None,
                };
                self.service
                    .propose_transaction(&network, &safe, &request)
                    .await?;
            }
            ProposalPayload::Message(message) => {
                let request = ProposeMessageRequest {
                    message: message.message,
                    signature: format!("0x{}", hex::encode(&signature)),
                };
                self.service.propose_message(&network, &safe, &request).await?;
            }
        }

        tracing::info!(
            safe = %redact_address(safe.as_str()),
            network = %network.network_id,
            "Multisig proposal posted"
        );
        Ok(())
    }
}

fn transition(proposal: &mut MultisigProposal, next: ProposalStatus) -> Result<()> {
    if !proposal.status.can_transition_to(&next) {
        return Err(KeyringError::InvalidState(format!(
            "invalid proposal transition {} -> {}",
            proposal.status, next
        )));
    }
    proposal.status = next;
    Ok(())
}

/// v > 30 为 eth_sign：签的是 personal_sign(hash)
fn recover_signer(hash: &[u8; 32], signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(KeyringError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }
    let v = signature[64];
    if v > 30 {
        let mut adjusted = signature.to_vec();
        adjusted[64] = v - ETH_SIGN_V_OFFSET;
        recover_address(&hash_personal_message(hash), &adjusted)
    } else {
        recover_address(hash, signature)
    }
}

/// 65 字节签名转为交易签名，v 按 EIP-155 编码（类型化交易编码时自行归一）
fn transaction_signature(signature: &[u8], chain_id: u64) -> Result<Signature> {
    if signature.len() != 65 {
        return Err(KeyringError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }
    let v = signature[64];
    let recovery_id = if v >= 27 { v - 27 } else { v };
    if recovery_id > 1 {
        return Err(KeyringError::InvalidSignature(format!("bad recovery id {}", v)));
    }
    let v = chain_id
        .checked_mul(2)
        .and_then(|n| n.checked_add(35 + u64::from(recovery_id)))
        .ok_or_else(|| KeyringError::InvalidSignature(format!("chain id {} too large", chain_id)))?;
    Ok(Signature {
        r: U256::from_big_endian(&signature[..32]),
        s: U256::from_big_endian(&signature[32..64]),
        v,
    })
}

fn to_eth_sign(signature: Bytes) -> Result<Bytes> {
    let mut bytes = signature.to_vec();
    let v = bytes
        .last_mut()
        .ok_or_else(|| KeyringError::InvalidSignature("empty signature".into()))?;
    if *v < 27 {
        *v += 27;
    }
    *v += ETH_SIGN_V_OFFSET;
    Ok(Bytes::from(bytes))
}
