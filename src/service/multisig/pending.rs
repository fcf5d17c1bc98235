//! 多网络待签项查询
//!
//! 每个网络一个分支，经限速任务池并发执行；单个网络失败只让该网络结果为空并记录日志，
//! 不影响其它分支，也不让整体调用失败。

use futures::future::join_all;
use serde::Serialize;

use super::coordinator::MultisigCoordinator;
use crate::{
    domain::account::Address,
    error::Result,
    infrastructure::{
        log_redact::redact_address,
        safe_api::{SafeMessageItem, SafeTransactionItem},
    },
};

/// 单个网络的查询结果（失败时 `items` 为空）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPending<T> {
    pub network_id: String,
    pub items: Vec<T>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary<T> {
    /// 成功分支的条目总数
    pub total: usize,
    pub results: Vec<NetworkPending<T>>,
}

impl<T> PendingSummary<T> {
    fn from_results(results: Vec<NetworkPending<T>>) -> Self {
        let total = results.iter().map(|r| r.items.len()).sum();
        Self { total, results }
    }

    pub fn for_network(&self, network_id: &str) -> Option<&NetworkPending<T>> {
        self.results.iter().find(|r| r.network_id == network_id)
    }
}

fn isolate<T>(network_id: String, safe: &Address, kind: &str, result: Result<Vec<T>>) -> NetworkPending<T> {
    match result {
        Ok(items) => NetworkPending {
            network_id,
            items,
            failed: false,
        },
        Err(e) => {
            tracing::warn!(
                network = %network_id,
                safe = %redact_address(safe.as_str()),
                kind,
                error = %e,
                "Pending query failed for network"
            );
            NetworkPending {
                network_id,
                items: Vec::new(),
                failed: true,
            }
        }
    }
}

impl MultisigCoordinator {
    async fn recorded_networks(&self, safe: &Address) -> Result<Option<Vec<String>>> {
        let keyring = self.registry.gnosis_keyring().await?;
        match keyring.as_gnosis() {
            Some(gnosis) => gnosis.recorded_network_ids(safe),
            None => Ok(None),
        }
    }

    /// 各网络上待执行的多签交易；地址没有记录网络时返回 `None`
    pub async fn list_all_pending(
        &self,
        safe: &Address,
    ) -> Result<Option<PendingSummary<SafeTransactionItem>>> {
        let Some(network_ids) = self.recorded_networks(safe).await? else {
            return Ok(None);
        };

        let branches = network_ids.into_iter().map(|network_id| async move {
            let result: Result<Vec<SafeTransactionItem>> = self
                .pool
                .add(async {
                    let network = self.network(&network_id)?;
                    let nonce = self.chain.get_nonce(&network, safe).await?;
                    self.service
                        .pending_transactions(&network, safe, nonce)
                        .await
                })
                .await;
            isolate(network_id, safe, "transactions", result)
        });

        let summary = PendingSummary::from_results(join_all(branches).await);
        tracing::debug!(
            safe = %redact_address(safe.as_str()),
            total = summary.total,
            networks = summary.results.len(),
            "Pending multisig transactions listed"
        );
        Ok(Some(summary))
    }

    /// 各网络上待签的多签消息，已达当前阈值的消息被过滤
    pub async fn list_all_pending_messages(
        &self,
        safe: &Address,
    ) -> Result<Option<PendingSummary<SafeMessageItem>>> {
        let Some(network_ids) = self.recorded_networks(safe).await? else {
            return Ok(None);
        };

        let branches = network_ids.into_iter().map(|network_id| async move {
            let result: Result<Vec<SafeMessageItem>> = self
                .pool
                .add(async {
                    let network = self.network(&network_id)?;
                    let threshold = self.chain.get_threshold(&network, safe).await?;
                    let messages = self.service.messages(&network, safe).await?;
                    Ok(messages
                        .into_iter()
                        .filter(|m| m.confirmations.len() < threshold)
                        .collect())
                })
                .await;
            isolate(network_id, safe, "messages", result)
        });

        Ok(Some(PendingSummary::from_results(join_all(branches).await)))
    }
}
