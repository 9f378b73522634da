use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

impl From<bool> for NetworkStatus {
    fn from(online: bool) -> Self {
        if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }
}

/// 连通性变化事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub status: NetworkStatus,
    /// UTC 毫秒
    pub timestamp: i64,
}

impl ConnectivityEvent {
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// 连通性信号（由平台层实现，如浏览器 online/offline 事件、系统网络回调）
///
/// 只保证事件按发生顺序（FIFO）送达；同一状态可能被重复报告。
#[async_trait]
pub trait ConnectivitySignal: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<ConnectivityEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 手动驱动的连通性信号
///
/// 应用层把平台回调转发到 `set_online`；测试用它模拟断网与恢复。
#[derive(Debug)]
pub struct ManualConnectivity {
    status: RwLock<NetworkStatus>,
    sender: broadcast::Sender<ConnectivityEvent>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            status: RwLock::new(NetworkStatus::from(online)),
            sender,
        }
    }

    /// 报告一次读数；即使状态未变也会广播
    pub fn set_online(&self, online: bool) {
        let status = NetworkStatus::from(online);
        *self.status.write() = status;
        if self.sender.send(ConnectivityEvent::new(status)).is_err() {
            debug!("connectivity event dropped (no active receivers): {:?}", status);
        }
    }

    pub fn go_online(&self) {
        self.set_online(true);
    }

    pub fn go_offline(&self) {
        self.set_online(false);
    }

    pub fn is_online(&self) -> bool {
        self.status.read().is_online()
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectivitySignal for ManualConnectivity {
    async fn current_status(&self) -> NetworkStatus {
        *self.status.read()
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<ConnectivityEvent>> {
        Ok(self.sender.subscribe())
    }

    async fn stop_monitoring(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_connectivity_broadcasts_every_reading() {
        let signal = ManualConnectivity::new(true);
        let mut rx = signal.start_monitoring().await.unwrap();

        signal.go_offline();
        signal.go_online();
        signal.go_online();

        assert_eq!(rx.recv().await.unwrap().status, NetworkStatus::Offline);
        assert_eq!(rx.recv().await.unwrap().status, NetworkStatus::Online);
        assert_eq!(rx.recv().await.unwrap().status, NetworkStatus::Online);
        assert_eq!(signal.current_status().await, NetworkStatus::Online);
    }

    #[test]
    fn test_status_from_bool() {
        assert!(NetworkStatus::from(true).is_online());
        assert!(!NetworkStatus::from(false).is_online());
    }
}
