//! 同步状态管理
//!
//! 协调器的三态状态机（Online / Offline / Syncing）以及回放统计：
//! - 状态切换（返回旧状态，便于发事件）
//! - 回放计数与最近一次错误
//! - 状态摘要（用于日志打印）

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// 在线：读写直达远端
    Online,
    /// 离线：读镜像表，写入事务日志
    Offline,
    /// 回放中（只能从离线恢复进入，结束后回到 Online）
    Syncing,
}

impl SyncState {
    pub fn is_offline(self) -> bool {
        matches!(self, SyncState::Offline)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Online => write!(f, "在线"),
            SyncState::Offline => write!(f, "离线"),
            SyncState::Syncing => write!(f, "同步中"),
        }
    }
}

/// 回放统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// 完整跑完的回放轮数
    pub passes_completed: u64,
    /// 因断网中止的回放轮数
    pub passes_abandoned: u64,
    /// 成功回放的事务数
    pub transactions_replayed: u64,
    /// 回放失败（保留在日志中）的次数
    pub transactions_failed: u64,
    /// 判定为永久不可应用而丢弃的事务数
    pub transactions_dropped: u64,
    /// 最近一次完成回放的时间（UTC毫秒时间戳）
    pub last_sync_at: Option<i64>,
    /// 最近一次回放错误
    pub last_error: Option<String>,
}

/// 状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub state: SyncState,
    /// 进入当前状态的时间（UTC毫秒时间戳）
    pub since: i64,
    /// 每次进入 Syncing 加一，用于识别过期的回放轮次
    pub sync_epoch: u64,
    pub stats: SyncStats,
    pub sdk_version: String,
}

impl SyncSnapshot {
    fn enter(&mut self, state: SyncState) {
        self.state = state;
        self.since = Utc::now().timestamp_millis();
        if state == SyncState::Syncing {
            self.sync_epoch += 1;
        }
    }

    fn new(state: SyncState) -> Self {
        Self {
            state,
            since: Utc::now().timestamp_millis(),
            sync_epoch: 0,
            stats: SyncStats::default(),
            sdk_version: crate::version::SDK_VERSION.to_string(),
        }
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        let last_sync = self
            .stats
            .last_sync_at
            .and_then(chrono::DateTime::<Utc>::from_timestamp_millis)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "从未".to_string());

        format!(
            "【同步状态】\n\
             状态: {}\n\
             回放: 完成{}轮/中止{}轮\n\
             事务: 成功{}条/失败{}次/丢弃{}条\n\
             最近同步: {}\n\
             SDK版本: {}",
            self.state,
            self.stats.passes_completed,
            self.stats.passes_abandoned,
            self.stats.transactions_replayed,
            self.stats.transactions_failed,
            self.stats.transactions_dropped,
            last_sync,
            self.sdk_version
        )
    }
}

/// 同步状态管理器（线程安全）
#[derive(Debug, Clone)]
pub struct SyncStateManager {
    inner: Arc<RwLock<SyncSnapshot>>,
}

impl SyncStateManager {
    pub fn new(initial: SyncState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SyncSnapshot::new(initial))),
        }
    }

    pub async fn state(&self) -> SyncState {
        self.inner.read().await.state
    }

    /// 切换状态，返回旧状态
    pub async fn set_state(&self, state: SyncState) -> SyncState {
        let mut inner = self.inner.write().await;
        let old = inner.state;
        if old != state {
            inner.enter(state);
        }
        old
    }

    /// 仅当当前状态为 `expected` 时切换
    pub async fn transition(&self, expected: SyncState, state: SyncState) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != expected {
            return false;
        }
        inner.enter(state);
        true
    }

    pub async fn sync_epoch(&self) -> u64 {
        self.inner.read().await.sync_epoch
    }

    /// 仍处于第 `epoch` 轮的 Syncing（中途断网再恢复会进入新的一轮）
    pub async fn is_syncing(&self, epoch: u64) -> bool {
        let inner = self.inner.read().await;
        inner.state == SyncState::Syncing && inner.sync_epoch == epoch
    }

    /// 第 `epoch` 轮回放结束后回到 Online
    pub async fn finish_pass(&self, epoch: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != SyncState::Syncing || inner.sync_epoch != epoch {
            return false;
        }
        inner.enter(SyncState::Online);
        true
    }

    pub async fn record_replayed(&self) {
        self.inner.write().await.stats.transactions_replayed += 1;
    }

    pub async fn record_failed(&self, error: &str) {
        let mut inner = self.inner.write().await;
        inner.stats.transactions_failed += 1;
        inner.stats.last_error = Some(error.to_string());
    }

    pub async fn record_dropped(&self, error: &str) {
        let mut inner = self.inner.write().await;
        inner.stats.transactions_dropped += 1;
        inner.stats.last_error = Some(error.to_string());
    }

    pub async fn record_pass_completed(&self) {
        let mut inner = self.inner.write().await;
        inner.stats.passes_completed += 1;
        inner.stats.last_sync_at = Some(Utc::now().timestamp_millis());
    }

    pub async fn record_pass_abandoned(&self) {
        self.inner.write().await.stats.passes_abandoned += 1;
    }

    pub async fn get_stats(&self) -> SyncStats {
        self.inner.read().await.stats.clone()
    }

    /// 获取当前状态快照
    pub async fn get_snapshot(&self) -> SyncSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn get_summary(&self) -> String {
        self.inner.read().await.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_transitions() {
        let manager = SyncStateManager::new(SyncState::Online);

        assert_eq!(manager.set_state(SyncState::Offline).await, SyncState::Online);
        assert!(manager.state().await.is_offline());

        // 只有离线时才能进入同步
        assert!(!manager.transition(SyncState::Online, SyncState::Syncing).await);
        assert!(manager.transition(SyncState::Offline, SyncState::Syncing).await);
        assert_eq!(manager.state().await, SyncState::Syncing);
        assert!(!manager.transition(SyncState::Offline, SyncState::Syncing).await);
    }

    #[tokio::test]
    async fn test_sync_epoch() {
        let manager = SyncStateManager::new(SyncState::Offline);
        assert!(manager.transition(SyncState::Offline, SyncState::Syncing).await);
        let first = manager.sync_epoch().await;
        assert!(manager.is_syncing(first).await);

        // 回放中断网又恢复：旧轮次失效
        manager.set_state(SyncState::Offline).await;
        assert!(manager.transition(SyncState::Offline, SyncState::Syncing).await);
        assert!(!manager.is_syncing(first).await);
        assert!(!manager.finish_pass(first).await);

        let second = manager.sync_epoch().await;
        assert!(manager.finish_pass(second).await);
        assert_eq!(manager.state().await, SyncState::Online);
    }

    #[tokio::test]
    async fn test_stats_and_summary() {
        let manager = SyncStateManager::new(SyncState::Syncing);
        manager.record_replayed().await;
        manager.record_replayed().await;
        manager.record_failed("hero 2: gateway offline").await;
        manager.record_dropped("hero 9 not on server").await;
        manager.record_pass_completed().await;

        let stats = manager.get_stats().await;
        assert_eq!(stats.transactions_replayed, 2);
        assert_eq!(stats.transactions_failed, 1);
        assert_eq!(stats.transactions_dropped, 1);
        assert_eq!(stats.passes_completed, 1);
        assert!(stats.last_sync_at.is_some());
        assert_eq!(stats.last_error.as_deref(), Some("hero 9 not on server"));

        let summary = manager.get_summary().await;
        assert!(summary.contains("成功2条"));
        assert!(summary.contains("同步中"));
    }
}
