//! 硬件传输队列
//!
//! 并发度为 1 的 FIFO 队列：同一设备的传输通道任意时刻最多一个在途命令。
//! tokio `Mutex` 按请求顺序授予锁，提供 FIFO；`clear()` 通过代号递增让
//! 尚未开始的任务在拿到锁后直接返回 `QueueCleared`，已在执行的任务不受影响。

use std::{
    future::Future,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use tokio::sync::Mutex;

use crate::error::{KeyringError, Result};

pub struct TransportQueue {
    label: String,
    gate: Mutex<()>,
    generation: AtomicU64,
    waiting: AtomicUsize,
}

/// 排队计数，任务被取消（future 被丢弃）时也能正确回收
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TransportQueue {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// 提交任务并等待结果
    pub async fn run<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = self.generation.load(Ordering::SeqCst);

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let waiting = WaitingGuard(&self.waiting);
        let _permit = self.gate.lock().await;
        drop(waiting);

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(queue = %self.label, "Dropping task superseded by clear()");
            return Err(KeyringError::QueueCleared);
        }

        task().await
    }

    /// 丢弃所有尚未开始的任务
    pub fn clear(&self) {
        let dropped = self.waiting.load(Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if dropped > 0 {
            tracing::info!(queue = %self.label, dropped, "Hardware queue cleared");
        }
    }

    /// 排队中（未开始）的任务数
    pub fn pending(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn test_one_in_flight_fifo() {
        let queue = TransportQueue::new("test");
        let in_flight = AtomicUsize::new(0);
        let max_in_flight = AtomicUsize::new(0);
        let order = std::sync::Mutex::new(Vec::new());

        let tasks = (0..8).map(|i| {
            let queue = &queue;
            let in_flight = &in_flight;
            let max_in_flight = &max_in_flight;
            let order = &order;
            async move {
                queue
                    .run(|| async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        order.lock().unwrap().push(i);
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(i)
                    })
                    .await
            }
        });

        let results = futures::future::join_all(tasks).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_clear_drops_only_waiting_tasks() {
        let queue = Arc::new(TransportQueue::new("test"));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let running = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .run(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok("first")
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run(|| async { Ok("second") }).await })
        };
        while queue.pending() == 0 {
            tokio::task::yield_now().await;
        }

        queue.clear();
        let _ = release_tx.send(());

        assert_eq!(running.await.unwrap().unwrap(), "first");
        assert!(matches!(
            waiting.await.unwrap(),
            Err(KeyringError::QueueCleared)
        ));

        // 清空后提交的任务正常执行
        assert_eq!(queue.run(|| async { Ok(3) }).await.unwrap(), 3);
    }
}
