//! 日志系统配置模块
//! 支持结构化日志（JSON）与文本日志，`RUST_LOG` 优先于配置的日志级别

use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

/// 初始化日志系统
///
/// 重复初始化返回错误而不是 panic。
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_timer(ChronoUtc::rfc_3339()))
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true),
            )
            .try_init()?;
    }

    Ok(())
}
