// Account Event Bus
// 账户增删事件的发布/订阅：广播通道 + 显式订阅句柄（丢弃或 unsubscribe 即退订）

use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinHandle};
use uuid::Uuid;

use crate::domain::account::Account;

const CHANNEL_CAPACITY: usize = 256;
const HISTORY_LIMIT: usize = 128;

// ============ 事件类型定义 ============

/// 导入来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportScene {
    PrivateKey,
    Mnemonics,
    Hardware,
    Sync,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    #[serde(rename = "ACCOUNT_ADDED")]
    AccountAdded {
        accounts: Vec<Account>,
        scene: Option<ImportScene>,
    },
    #[serde(rename = "ACCOUNT_REMOVED")]
    AccountRemoved {
        #[serde(rename = "removedAccounts")]
        removed_accounts: Vec<Account>,
    },
}

impl AccountEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AccountAdded { .. } => "ACCOUNT_ADDED",
            Self::AccountRemoved { .. } => "ACCOUNT_REMOVED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: AccountEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

// ============ Event Handler Trait ============

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &AccountEvent) -> Result<()>;
    fn event_types(&self) -> Vec<&'static str>;
}

// ============ 订阅句柄 ============

/// 监听任务句柄；`unsubscribe()` 或丢弃句柄都会停止监听
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Uuid,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop 负责终止任务
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 在独立任务中消费广播通道，直到通道关闭或句柄被丢弃
pub fn spawn_listener<T, F, Fut>(mut rx: broadcast::Receiver<T>, mut f: F) -> SubscriptionHandle
where
    T: Clone + Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(item) => f(item).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    SubscriptionHandle {
        id: Uuid::new_v4(),
        task,
    }
}

// ============ Event Bus ============

pub struct AccountEventBus {
    sender: broadcast::Sender<EventEnvelope>,
    history: Mutex<VecDeque<EventEnvelope>>,
}

impl Default for AccountEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// 发布事件（无订阅者时仅记录历史）
    pub fn publish(&self, event: AccountEvent) {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        };

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = envelope.event.event_type(),
            "Publishing account event"
        );

        if let Ok(mut history) = self.history.lock() {
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
    }

    /// 通道订阅：接收端被丢弃即退订
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// 处理器订阅，按 `event_types()` 过滤
    pub fn subscribe_handler(&self, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        spawn_listener(self.sender.subscribe(), move |envelope: EventEnvelope| {
            let handler = handler.clone();
            async move {
                if !handler.event_types().contains(&envelope.event.event_type()) {
                    return;
                }
                if let Err(e) = handler.handle(&envelope.event).await {
                    tracing::error!(
                        event_id = %envelope.event_id,
                        error = ?e,
                        "Event handler error"
                    );
                }
            }
        })
    }

    /// 最近的事件（新 → 旧）
    pub fn recent_events(&self, limit: usize) -> Vec<EventEnvelope> {
        self.history
            .lock()
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::account::{Address, KeyringType};

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &AccountEvent) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn event_types(&self) -> Vec<&'static str> {
            vec!["ACCOUNT_REMOVED"]
        }
    }

    fn sample_account() -> Account {
        Account::with_default_brand(
            Address::parse("0x742d35cc6634c0532925a3b844bc9e7595f0beb0").unwrap(),
            KeyringType::Hd,
        )
    }

    #[tokio::test]
    async fn test_channel_subscriber_receives_events() {
        let bus = AccountEventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(AccountEvent::AccountAdded {
            accounts: vec![sample_account()],
            scene: Some(ImportScene::Mnemonics),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event.event_type(), "ACCOUNT_ADDED");
        assert_eq!(bus.recent_events(10).len(), 1);
    }

    #[tokio::test]
    async fn test_handler_filter_and_unsubscribe() {
        let bus = AccountEventBus::new();
        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
        });

        let handle = bus.subscribe_handler(handler.clone());
        bus.publish(AccountEvent::AccountAdded {
            accounts: vec![sample_account()],
            scene: None,
        });
        bus.publish(AccountEvent::AccountRemoved {
            removed_accounts: vec![sample_account()],
        });

        // 等待后台任务处理
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);

        handle.unsubscribe();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        bus.publish(AccountEvent::AccountRemoved {
            removed_accounts: vec![sample_account()],
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = AccountEvent::AccountRemoved {
            removed_accounts: vec![sample_account()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ACCOUNT_REMOVED");
        assert!(json["data"]["removedAccounts"].is_array());
    }
}
