//! 事件系统模块 - 同步协调器对外的通知通道
//!
//! 功能包括：
//! - 连通性与状态机变化事件
//! - 单条事务回放结果
//! - 回放完成通知（仅在一轮回放清空日志时发出）
//! - 回放未清空日志的通知（仍有条目保留待重试）
//! - 读路径回退到镜像表的诊断事件
//! - 事件广播和订阅机制

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::connection_state::SyncState;
use crate::network::NetworkStatus;
use crate::storage::entities::TransactionKind;
use crate::sync::replay::ReplayReport;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 连通性信号读数
    ConnectivityChanged {
        status: NetworkStatus,
        timestamp: i64,
    },
    /// 协调器状态变更
    StateChanged {
        old_state: SyncState,
        new_state: SyncState,
        timestamp: i64,
    },
    /// 事务回放成功
    TransactionReplayed {
        log_id: u64,
        kind: TransactionKind,
        /// 日志中记录的 id（可能是临时 id）
        entity_id: i64,
        /// 实际发往远端的 id（新增时为服务端分配的 id）
        remote_id: i64,
        timestamp: i64,
    },
    /// 事务回放失败
    TransactionFailed {
        log_id: u64,
        kind: TransactionKind,
        entity_id: i64,
        reason: String,
        /// true 表示仍保留在日志中等待下次重试
        retained: bool,
        timestamp: i64,
    },
    /// 一轮回放结束且日志已清空
    ReplayCompleted {
        report: ReplayReport,
        timestamp: i64,
    },
    /// 一轮回放结束，但仍有条目保留在日志中
    ReplayIncomplete {
        report: ReplayReport,
        timestamp: i64,
    },
    /// 回放因断网中止
    ReplayAbandoned {
        report: ReplayReport,
        timestamp: i64,
    },
    /// 读路径远端失败，已回退到镜像表
    GatewayFallback {
        operation: String,
        error: String,
        timestamp: i64,
    },
    /// 镜像表整体刷新
    MirrorRefreshed {
        count: usize,
        timestamp: i64,
    },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SyncEvent::StateChanged { .. } => "state_changed",
            SyncEvent::TransactionReplayed { .. } => "transaction_replayed",
            SyncEvent::TransactionFailed { .. } => "transaction_failed",
            SyncEvent::ReplayCompleted { .. } => "replay_completed",
            SyncEvent::ReplayIncomplete { .. } => "replay_incomplete",
            SyncEvent::ReplayAbandoned { .. } => "replay_abandoned",
            SyncEvent::GatewayFallback { .. } => "gateway_fallback",
            SyncEvent::MirrorRefreshed { .. } => "mirror_refreshed",
        }
    }

    /// 获取事件时间戳（UTC毫秒）
    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::ConnectivityChanged { timestamp, .. }
            | SyncEvent::StateChanged { timestamp, .. }
            | SyncEvent::TransactionReplayed { timestamp, .. }
            | SyncEvent::TransactionFailed { timestamp, .. }
            | SyncEvent::ReplayCompleted { timestamp, .. }
            | SyncEvent::ReplayIncomplete { timestamp, .. }
            | SyncEvent::ReplayAbandoned { timestamp, .. }
            | SyncEvent::GatewayFallback { timestamp, .. }
            | SyncEvent::MirrorRefreshed { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 事件监听器映射（"*" 为通用监听器）
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn connectivity_changed(status: NetworkStatus) -> SyncEvent {
        SyncEvent::ConnectivityChanged {
            status,
            timestamp: now(),
        }
    }

    pub fn state_changed(old_state: SyncState, new_state: SyncState) -> SyncEvent {
        SyncEvent::StateChanged {
            old_state,
            new_state,
            timestamp: now(),
        }
    }

    pub fn transaction_replayed(
        log_id: u64,
        kind: TransactionKind,
        entity_id: i64,
        remote_id: i64,
    ) -> SyncEvent {
        SyncEvent::TransactionReplayed {
            log_id,
            kind,
            entity_id,
            remote_id,
            timestamp: now(),
        }
    }

    pub fn transaction_failed(
        log_id: u64,
        kind: TransactionKind,
        entity_id: i64,
        reason: String,
        retained: bool,
    ) -> SyncEvent {
        SyncEvent::TransactionFailed {
            log_id,
            kind,
            entity_id,
            reason,
            retained,
            timestamp: now(),
        }
    }

    pub fn replay_completed(report: ReplayReport) -> SyncEvent {
        SyncEvent::ReplayCompleted {
            report,
            timestamp: now(),
        }
    }

    pub fn replay_incomplete(report: ReplayReport) -> SyncEvent {
        SyncEvent::ReplayIncomplete {
            report,
            timestamp: now(),
        }
    }

    pub fn replay_abandoned(report: ReplayReport) -> SyncEvent {
        SyncEvent::ReplayAbandoned {
            report,
            timestamp: now(),
        }
    }

    pub fn gateway_fallback(operation: &str, error: String) -> SyncEvent {
        SyncEvent::GatewayFallback {
            operation: operation.to_string(),
            error,
            timestamp: now(),
        }
    }

    pub fn mirror_refreshed(count: usize) -> SyncEvent {
        SyncEvent::MirrorRefreshed {
            count,
            timestamp: now(),
        }
    }
}
