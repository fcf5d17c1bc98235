//! 限速任务池
//!
//! 固定并发 + 固定窗口限流：每个 `interval` 窗口内最多启动 `interval_cap` 个任务。
//! 只统计窗口内"启动"的任务，上个窗口仍在运行的任务不计入新窗口。

use std::{future::Future, time::Duration};

use tokio::{
    sync::{Mutex, Semaphore},
    time::Instant,
};

use crate::config::MultisigConfig;

struct Window {
    started: Instant,
    count: usize,
}

pub struct RateLimitedPool {
    concurrency: Semaphore,
    interval: Duration,
    interval_cap: usize,
    window: Mutex<Window>,
}

impl RateLimitedPool {
    pub fn new(concurrency: usize, interval: Duration, interval_cap: usize) -> Self {
        Self {
            concurrency: Semaphore::new(concurrency.max(1)),
            interval,
            interval_cap: interval_cap.max(1),
            window: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn from_config(config: &MultisigConfig) -> Self {
        Self::new(
            config.pending_concurrency,
            Duration::from_millis(config.pending_interval_ms),
            config.pending_interval_cap,
        )
    }

    /// 排队执行任务，返回任务结果
    pub async fn add<Fut, T>(&self, task: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        // 信号量从不关闭
        let _permit = self.concurrency.acquire().await.ok();
        self.wait_for_slot().await;
        task.await
    }

    async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                if now.duration_since(window.started) >= self.interval {
                    window.started = now;
                    window.count = 0;
                }
                if window.count < self.interval_cap {
                    window.count += 1;
                    return;
                }
                (window.started + self.interval).saturating_duration_since(now)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
