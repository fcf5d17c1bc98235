//! 账户删除级联与展示列表集成测试

mod common;

use chrono::Utc;
use common::*;
use ironkeyring::{
    domain::KeyringType,
    infrastructure::{address_store::HistoryEntry, event_bus::AccountEvent},
    service::{AccountFilter, AccountSort},
    KeyringError,
};
use rust_decimal::Decimal;

const WATCHED: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

#[tokio::test]
async fn test_cascade_runs_only_when_last_reference_removed() {
    let h = harness().await;
    let address = private_key_address();
    h.ctx.imports.import_private_key(TEST_PRIVATE_KEY).await.unwrap();
    h.ctx
        .imports
        .import_watch_address(address.as_str())
        .await
        .unwrap();

    let data = &h.ctx.address_data;
    data.set_balance(&address, Decimal::new(1234, 2)).unwrap();
    data.set_alias(&address, "savings").unwrap();
    data.pin(&address, "Simple Key Pair").unwrap();
    data.add_whitelist(&address).unwrap();
    data.add_history(
        &address,
        HistoryEntry {
            tx_hash: "0xabc".into(),
            network: "eth".into(),
            created_at: Utc::now(),
        },
    )
    .unwrap();

    // 观察密钥环仍引用该地址
    h.ctx
        .registry
        .remove(&address, KeyringType::Simple, "Simple Key Pair")
        .await
        .unwrap();
    assert!(data.has_any_data(&address).unwrap());
    assert_eq!(data.alias(&address).unwrap().as_deref(), Some("savings"));

    h.ctx
        .registry
        .remove(&address, KeyringType::Watch, "Watch Address")
        .await
        .unwrap();
    assert!(!data.has_any_data(&address).unwrap());
    assert!(!data.is_whitelisted(&address).unwrap());
    assert!(data.history(&address).unwrap().is_empty());
    assert!(h.ctx.registry.keyrings().await.is_empty());
}

#[tokio::test]
async fn test_remove_publishes_event_and_persists() {
    let h = harness().await;
    let watched = addr(WATCHED);
    h.ctx.imports.import_watch_address(WATCHED).await.unwrap();
    let mut rx = h.ctx.events.subscribe();
    let writes = h.store.write_count();

    h.ctx
        .registry
        .remove(&watched, KeyringType::Watch, "Watch Address")
        .await
        .unwrap();
    assert_eq!(h.store.write_count(), writes + 1);

    match rx.try_recv().unwrap().event {
        AccountEvent::AccountRemoved { removed_accounts } => {
            assert_eq!(removed_accounts.len(), 1);
            assert_eq!(removed_accounts[0].address, watched);
            assert_eq!(removed_accounts[0].keyring_type, KeyringType::Watch);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_unknown_account() {
    let h = harness().await;
    let err = h
        .ctx
        .registry
        .remove(&addr(WATCHED), KeyringType::Watch, "Watch Address")
        .await
        .unwrap_err();
    assert!(matches!(err, KeyringError::NotFoundKeyring(_)));
}

#[tokio::test]
async fn test_export_is_password_gated() {
    let h = harness().await;
    h.ctx
        .imports
        .import_mnemonic_first_address(TEST_MNEMONIC, "")
        .await
        .unwrap();
    let hd0 = hd_address(0);

    let wrong = ironkeyring::infrastructure::password::Password::new("nope".into());
    assert!(matches!(
        h.ctx.registry.export_mnemonic(&wrong, &hd0).await.unwrap_err(),
        KeyringError::InvalidPassword
    ));

    let mnemonic = h.ctx.registry.export_mnemonic(&password(), &hd0).await.unwrap();
    assert_eq!(mnemonic.as_str(), TEST_MNEMONIC);

    // 导出的私钥可以作为独立密钥对再次导入，类型不同不算重复
    let key = h.ctx.registry.export_private_key(&password(), &hd0).await.unwrap();
    let imported = h.ctx.imports.import_private_key(key.as_str()).await.unwrap();
    assert_eq!(imported, Some(hd0.clone()));
    assert_eq!(h.ctx.registry.accounts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_display_accounts_sort_and_filter() {
    let h = harness().await;
    h.ctx
        .imports
        .import_mnemonic_first_address(TEST_MNEMONIC, "")
        .await
        .unwrap();
    h.ctx.imports.import_private_key(TEST_PRIVATE_KEY).await.unwrap();
    h.ctx.imports.import_watch_address(WATCHED).await.unwrap();

    let data = &h.ctx.address_data;
    data.set_balance(&hd_address(0), Decimal::new(10, 0)).unwrap();
    data.set_balance(&private_key_address(), Decimal::new(500, 0)).unwrap();
    data.set_balance(&addr(WATCHED), Decimal::new(90, 0)).unwrap();
    h.ctx.accounts.pin(&hd_address(0), "HD Key Tree").unwrap();
    h.ctx.accounts.set_alias(&addr(WATCHED), "vitalik").unwrap();

    let list = h
        .ctx
        .accounts
        .list_display_accounts(AccountSort::PinnedThenBalance, AccountFilter::All)
        .await
        .unwrap();
    let order: Vec<_> = list.iter().map(|d| d.account.address.clone()).collect();
    assert_eq!(order, vec![hd_address(0), private_key_address(), addr(WATCHED)]);
    assert!(list[0].pinned);
    assert_eq!(list[2].alias.as_deref(), Some("vitalik"));

    let by_balance = h
        .ctx
        .accounts
        .list_display_accounts(AccountSort::Balance, AccountFilter::All)
        .await
        .unwrap();
    assert_eq!(by_balance[0].account.address, private_key_address());
    assert_eq!(by_balance[2].account.address, hd_address(0));

    let mine = h
        .ctx
        .accounts
        .list_display_accounts(AccountSort::default(), AccountFilter::OnlyMine)
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|d| d.account.is_mine()));

    let others = h
        .ctx
        .accounts
        .list_display_accounts(AccountSort::default(), AccountFilter::OnlyOthers)
        .await
        .unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].account.keyring_type, KeyringType::Watch);
}

#[tokio::test]
async fn test_display_accounts_keep_distinct_types() {
    let h = harness().await;
    // 同一地址在两个类型下各出现一次
    h.ctx
        .imports
        .import_mnemonic_first_address(TEST_MNEMONIC, "")
        .await
        .unwrap();
    h.ctx
        .imports
        .import_watch_address(hd_address(0).as_str())
        .await
        .unwrap();

    let list = h
        .ctx
        .accounts
        .list_display_accounts(AccountSort::default(), AccountFilter::All)
        .await
        .unwrap();
    assert_eq!(list.len(), 2);

    let json = serde_json::to_value(&list[0]).unwrap();
    assert!(json.get("address").is_some());
    assert!(json.get("balance").is_some());
    assert!(json.get("pinned").is_some());
}
