// 导入重试控制
//
// 有界重试：
// - "已导入"（DuplicateImport）是良性终止，直接返回 None，不重试也不报错
// - 其它不可重试的错误立即返回
// - 瞬时错误重试到上限，最后一次的错误原样抛出

use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::{
    config::HardwareConfig,
    error::{KeyringError, Result},
};

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大尝试次数（含第一次），至少为 1
    pub max_attempts: u32,
    /// 两次尝试之间的等待
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&HardwareConfig> for RetryConfig {
    fn from(config: &HardwareConfig) -> Self {
        Self {
            max_attempts: config.import_retry_count.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_attempts(&self, max_attempts: u32) -> Self {
        Self::new(RetryConfig {
            max_attempts: max_attempts.max(1),
            backoff: self.config.backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// 执行任务；`Ok(None)` 表示凭证已导入
    pub async fn run<T, F, Fut>(&self, operation: &str, mut task: F) -> Result<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<KeyringError> = None;

        for attempt in 1..=max_attempts {
            tracing::debug!(operation, attempt, max_attempts, "Attempting import task");

            match task(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Import task succeeded after retry");
                    }
                    return Ok(Some(value));
                }
                Err(e) if e.is_duplicate_import() => {
                    tracing::info!(operation, "Credential already imported");
                    return Ok(None);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(operation, error_code = %e.code(), "Import task failed, not retryable");
                    return Err(e);
                }
                Err(e) => {
                    if attempt < max_attempts {
                        tracing::warn!(
                            operation,
                            attempt,
                            error_code = %e.code(),
                            error = %e,
                            next_retry_in_ms = self.config.backoff.as_millis() as u64,
                            "Import task failed, will retry"
                        );
                        if !self.config.backoff.is_zero() {
                            sleep(self.config.backoff).await;
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            KeyringError::InvalidState(format!("{} made no attempts", operation))
        });
        tracing::error!(
            operation,
            max_attempts,
            error = %error,
            "Import task failed after all retries"
        );
        Err(error)
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
