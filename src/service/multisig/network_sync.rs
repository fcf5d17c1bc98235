//! 多签地址网络归属同步
//!
//! 探测尚未记录的网络上该地址是否是有效的多签合约（能读到 owner），
//! 与已记录集合取并集；集合无变化时不写保险库。

use futures::future::join_all;

use super::coordinator::MultisigCoordinator;
use crate::{
    domain::{account::Address, network::Network},
    error::{KeyringError, Result},
    infrastructure::log_redact::redact_address,
};

impl MultisigCoordinator {
    async fn has_deployment(&self, network: &Network, safe: &Address) -> bool {
        match self.chain.get_owners(network, safe).await {
            Ok(owners) => !owners.is_empty(),
            Err(e) => {
                tracing::debug!(
                    network = %network.network_id,
                    safe = %redact_address(safe.as_str()),
                    error = %e,
                    "Safe deployment check failed"
                );
                false
            }
        }
    }

    /// 同步单个地址，返回是否写入了新的网络集合
    pub async fn sync_networks(&self, safe: &Address) -> Result<bool> {
        let keyring = self.registry.gnosis_keyring().await?;
        let gnosis = keyring
            .as_gnosis()
            .ok_or(KeyringError::NotFoundGnosisKeyring)?;
        if !gnosis.contains(safe)? {
            return Err(KeyringError::NotFoundGnosisKeyring);
        }

        let recorded = gnosis.recorded_network_ids(safe)?;
        let known = recorded.clone().unwrap_or_default();

        let candidates: Vec<&Network> = self
            .networks
            .safe_networks()
            .into_iter()
            .filter(|n| !known.contains(&n.network_id))
            .collect();

        let checks = candidates.iter().map(|network| async move {
            self.has_deployment(network, safe)
                .await
                .then(|| network.network_id.clone())
        });
        let found: Vec<String> = join_all(checks).await.into_iter().flatten().collect();

        if found.is_empty() && recorded.is_some() {
            tracing::debug!(safe = %redact_address(safe.as_str()), "Network set unchanged");
            return Ok(false);
        }

        let mut union = known;
        union.extend(found.iter().cloned());
        gnosis.set_network_ids(safe, union)?;
        self.registry.persist_all_keyrings().await?;

        tracing::info!(
            safe = %redact_address(safe.as_str()),
            added = found.len(),
            "Multisig network set updated"
        );
        Ok(true)
    }

    /// 同步全部多签地址，返回有变化的地址数；单个地址失败只记日志
    pub async fn sync_all_networks(&self) -> Result<usize> {
        let keyring = self.registry.gnosis_keyring().await?;
        let addresses = keyring.accounts()?;

        let mut changed = 0;
        for safe in &addresses {
            match self.sync_networks(safe).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        safe = %redact_address(safe.as_str()),
                        error = %e,
                        "Network sync failed"
                    );
                }
            }
        }

        tracing::info!(total = addresses.len(), changed, "Multisig network sync finished");
        Ok(changed)
    }

    /// 已记录的网络
    pub async fn get_network_ids(&self, safe: &Address) -> Result<Vec<String>> {
        let keyring = self.registry.gnosis_keyring().await?;
        keyring
            .as_gnosis()
            .ok_or(KeyringError::NotFoundGnosisKeyring)?
            .get_network_ids(safe)
    }
}
