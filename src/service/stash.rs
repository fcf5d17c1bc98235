//! 导入暂存区
//!
//! 多步导入（输入凭证 → 预览账户 → 确认）期间的密钥环放在这里，按递增整数 ID 索引。
//! 生命周期：提交时移除；界面放弃时 `discard`；超过 `max_age` 的条目在下一次
//! `stash()` 时被清理。

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    config::StashConfig,
    error::{KeyringError, Result},
    service::keyring::Keyring,
};

struct StashEntry {
    keyring: Arc<Keyring>,
    created_at: Instant,
}

#[derive(Default)]
struct StashArena {
    next_id: u64,
    entries: BTreeMap<u64, StashEntry>,
}

pub struct ImportStash {
    arena: Mutex<StashArena>,
    max_age: Duration,
}

impl ImportStash {
    pub fn new(max_age: Duration) -> Self {
        Self {
            arena: Mutex::new(StashArena::default()),
            max_age,
        }
    }

    pub fn from_config(config: &StashConfig) -> Self {
        Self::new(Duration::from_secs(config.max_age_secs))
    }

    fn arena(&self) -> Result<MutexGuard<'_, StashArena>> {
        self.arena
            .lock()
            .map_err(|_| KeyringError::InvalidState("stash poisoned".into()))
    }

    /// 暂存密钥环，返回新分配的 ID
    pub fn stash(&self, keyring: Keyring) -> Result<u64> {
        let mut arena = self.arena()?;

        let max_age = self.max_age;
        let before = arena.entries.len();
        arena
            .entries
            .retain(|_, entry| entry.created_at.elapsed() < max_age);
        let swept = before - arena.entries.len();
        if swept > 0 {
            tracing::info!(swept, "Expired stash entries discarded");
        }

        arena.next_id += 1;
        let id = arena.next_id;
        arena.entries.insert(
            id,
            StashEntry {
                keyring: Arc::new(keyring),
                created_at: Instant::now(),
            },
        );
        tracing::debug!(stash_id = id, "Keyring stashed");
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Result<Option<Arc<Keyring>>> {
        Ok(self.arena()?.entries.get(&id).map(|e| e.keyring.clone()))
    }

    /// 取出条目（提交时调用）
    pub fn take(&self, id: u64) -> Result<Arc<Keyring>> {
        self.arena()?
            .entries
            .remove(&id)
            .map(|e| e.keyring)
            .ok_or(KeyringError::StashEntryNotFound(id))
    }

    /// 放弃导入
    pub fn discard(&self, id: u64) -> Result<bool> {
        Ok(self.arena()?.entries.remove(&id).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        self.arena()?.entries.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.arena()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
