//! 账户展示服务
//!
//! 合并所有密钥环的账户与余额、别名、置顶数据，按 `(小写地址, 类型)` 去重。

use std::{cmp::Ordering, collections::HashSet, sync::Arc};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    domain::account::{Account, AccountClass, Address},
    error::Result,
    infrastructure::address_store::AddressDataStore,
    service::registry::KeyringRegistry,
};

/// 排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountSort {
    /// 置顶优先，其次按余额降序
    #[default]
    PinnedThenBalance,
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountFilter {
    #[default]
    All,
    OnlyMine,
    OnlyOthers,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayAccount {
    #[serde(flatten)]
    pub account: Account,
    pub balance: Decimal,
    pub alias: Option<String>,
    pub pinned: bool,
}

pub struct AccountService {
    registry: Arc<KeyringRegistry>,
    address_data: Arc<AddressDataStore>,
}

impl AccountService {
    pub fn new(registry: Arc<KeyringRegistry>, address_data: Arc<AddressDataStore>) -> Self {
        Self {
            registry,
            address_data,
        }
    }

    pub async fn list_display_accounts(
        &self,
        sort: AccountSort,
        filter: AccountFilter,
    ) -> Result<Vec<DisplayAccount>> {
        let accounts = self.registry.accounts().await?;

        let mut seen = HashSet::new();
        let mut display = Vec::with_capacity(accounts.len());
        for account in accounts {
            let keep = match filter {
                AccountFilter::All => true,
                AccountFilter::OnlyMine => account.is_mine(),
                AccountFilter::OnlyOthers => !account.is_mine(),
            };
            if !keep || !seen.insert(account.display_key()) {
                continue;
            }

            let balance = self
                .address_data
                .balance(&account.address)?
                .unwrap_or(Decimal::ZERO);
            let alias = self.address_data.alias(&account.address)?;
            let pinned = self
                .address_data
                .is_pinned(&account.address, &account.brand_name)?;
            display.push(DisplayAccount {
                account,
                balance,
                alias,
                pinned,
            });
        }

        display.sort_by(|a, b| compare(sort, a, b));
        Ok(display)
    }

    pub fn classify(&self, account: &Account) -> AccountClass {
        account.classify()
    }

    pub fn pin(&self, address: &Address, brand_name: &str) -> Result<()> {
        self.address_data.pin(address, brand_name)
    }

    pub fn unpin(&self, address: &Address, brand_name: &str) -> Result<()> {
        self.address_data.unpin(address, brand_name)
    }

    pub fn set_alias(&self, address: &Address, alias: &str) -> Result<()> {
        self.address_data.set_alias(address, alias)
    }
}

fn compare(sort: AccountSort, a: &DisplayAccount, b: &DisplayAccount) -> Ordering {
    let by_balance = b.balance.cmp(&a.balance);
    match sort {
        AccountSort::Balance => by_balance,
        AccountSort::PinnedThenBalance => b.pinned.cmp(&a.pinned).then(by_balance),
    }
}
