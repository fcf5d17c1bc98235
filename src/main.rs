//! IronKeyring 命令行入口
//! 解锁保险库、打印账户列表并同步多签地址的网络归属

use anyhow::{Context, Result};
use ironkeyring::{
    config::Config,
    infrastructure::{logging::init_logging, password::Password},
    service::{keyring::TransportFactories, AccountFilter, AccountSort},
    KeyringContext, KeyringError,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量与配置文件
    dotenvy::dotenv().ok();
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate()?;

    // 2. 初始化日志
    init_logging(&config.logging)?;
    tracing::info!("Starting IronKeyring");

    // 3. 构建上下文（命令行环境没有硬件传输层）
    let context = KeyringContext::from_config(config, TransportFactories::new())?;

    // 4. 解锁保险库，不存在则初始化
    let password = Password::new(
        std::env::var("VAULT_PASSWORD").context("VAULT_PASSWORD must be set")?,
    );
    match context.registry.unlock(&password).await {
        Ok(()) => {}
        Err(KeyringError::InvalidState(_)) => {
            tracing::info!(path = %context.config.vault.path, "No vault found, creating a new one");
            context.registry.boot(&password).await?;
        }
        Err(e) => return Err(e.into()),
    }

    // 5. 账户列表
    let accounts = context
        .accounts
        .list_display_accounts(AccountSort::PinnedThenBalance, AccountFilter::All)
        .await?;
    for display in &accounts {
        println!(
            "{}  {:<26} {}",
            display.account.address,
            display.account.brand_name,
            display.alias.as_deref().unwrap_or("-")
        );
    }
    tracing::info!(count = accounts.len(), "Accounts listed");

    // 6. 多签网络同步
    match context.multisig.sync_all_networks().await {
        Ok(changed) => tracing::info!(changed, "Network sync completed"),
        Err(KeyringError::NotFoundGnosisKeyring) => {
            tracing::debug!("No multisig keyring, network sync skipped")
        }
        Err(e) => tracing::warn!(error = %e, "Network sync failed"),
    }

    context.registry.lock().await?;
    Ok(())
}
